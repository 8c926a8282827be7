use cis_household_analysis::{Dataset, Store, StudyCodelists, StudyConfig};
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;

/// Build the study dataset and write it as csv.
#[derive(Parser)]
struct Opt {
    /// Study config file. Defaults are used if not given.
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Read the csv extract directly rather than the imported cache.
    #[clap(long)]
    from_csv: bool,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = StudyConfig::load_or_default(opt.config.as_deref())?;
    let store = if opt.from_csv {
        Store::load_orig(&config.extract_dir)?
    } else {
        Store::load(&config.cache_dir)
            .context("try running `import_data` first, or pass --from-csv")?
    };
    let lists = StudyCodelists::load(&config.codelists_dir)?;

    let dataset = Dataset::build(&store, &lists, &config);
    dataset.save(&config.output)?;
    event!(
        Level::INFO,
        "wrote {} rows to \"{}\"",
        dataset.len(),
        config.output.display()
    );
    Ok(())
}
