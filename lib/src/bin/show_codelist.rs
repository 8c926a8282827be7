use cis_household_analysis::{codelists, CodeSystem, Codelist, StudyConfig};
use clap::Parser;
use qu::ick_use::*;
use std::path::PathBuf;
use term_data_table::{Cell, Row, Table};

/// Print the contents of a codelist.
#[derive(Parser)]
struct Opt {
    /// A codelist csv file. Not needed with `--name`.
    path: Option<PathBuf>,
    /// The name of one of the study's codelists, e.g. `asthma`.
    #[clap(short, long)]
    name: Option<String>,
    /// Study config file, used to find the codelists directory with `--name`.
    #[clap(long)]
    config: Option<PathBuf>,
    /// One of `snomed`, `ctv3` or `dmd`.
    #[clap(short, long)]
    system: Option<CodeSystem>,
    /// The column holding the codes.
    #[clap(long)]
    column: Option<String>,
    #[clap(long)]
    category_column: Option<String>,
}

#[qu::ick]
fn main(opt: Opt) -> Result {
    let list = match (&opt.name, &opt.path) {
        (Some(name), None) => {
            let file = match codelists::find(name) {
                Some(file) => file,
                None => bail!(
                    "no codelist called \"{}\", expected one of: {}",
                    name,
                    codelists::ALL
                        .iter()
                        .map(|file| file.name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            let config = StudyConfig::load_or_default(opt.config.as_deref())?;
            file.load(&config.codelists_dir)?
        }
        (None, Some(path)) => {
            let (system, column) = match (opt.system, &opt.column) {
                (Some(system), Some(column)) => (system, column),
                _ => bail!("--system and --column are required when reading a file"),
            };
            Codelist::from_csv(path, system, column, opt.category_column.as_deref())?
        }
        _ => bail!("please supply exactly one of a path or --name"),
    };

    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from(format!("{} code", list.system())))
            .with_cell(Cell::from("Category")),
    );
    for (code, category) in list.iter() {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(code))
                .with_cell(Cell::from(category.unwrap_or(""))),
        );
    }
    println!("{}", table);
    println!("{} codes", list.len());
    Ok(())
}
