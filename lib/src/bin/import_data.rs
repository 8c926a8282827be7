use cis_household_analysis::{Store, StudyConfig};
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;

/// Import the csv extract into the binary cache.
#[derive(Parser)]
struct Opt {
    /// Study config file. Defaults are used if not given.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = StudyConfig::load_or_default(opt.config.as_deref())?;
    let store = Store::load_orig(&config.extract_dir)?;
    store.save(&config.cache_dir)?;
    event!(
        Level::INFO,
        "imported \"{}\" into \"{}\"",
        config.extract_dir.display(),
        config.cache_dir.display()
    );
    Ok(())
}
