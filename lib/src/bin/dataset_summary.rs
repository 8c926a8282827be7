use cis_household_analysis::{header, Dataset, Range, RangeSet, StudyConfig};
use clap::Parser;
use qu::ick_use::*;
use std::{fmt, path::PathBuf};
use term_data_table::{Cell, Row, Table};

/// Summarise a built dataset.
#[derive(Parser)]
struct Opt {
    /// Study config file. Defaults are used if not given.
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Read the dataset from here instead of the configured output path.
    #[clap(long)]
    dataset: Option<PathBuf>,
}

/// IMD ranks in England run from 1 to 32,844.
const IMD_MAX: u32 = 32_844;

#[qu::ick]
fn main(opt: Opt) -> Result {
    let config = StudyConfig::load_or_default(opt.config.as_deref())?;
    let path = opt.dataset.as_ref().unwrap_or(&config.output);
    let dataset = Dataset::load(path)?;
    let total = dataset.len();

    header("Dataset");
    println!("patients: {}", total);
    println!("index date: {}", config.index_date);
    println!(
        "in CIS: {}",
        dataset.iter().filter(|row| row.in_cis).count()
    );

    header("Sex");
    print_counts("Sex", dataset.count_by(|row| row.sex), total);

    header("Age");
    let ages = RangeSet::new(vec![
        Range::new(18, Some(40)),
        Range::new(40, Some(50)),
        Range::new(50, Some(60)),
        Range::new(60, Some(70)),
        Range::new(70, Some(80)),
        Range::new(80, None),
    ])
    .bucket_values(dataset.iter().filter_map(|row| row.age));
    print_counts(
        "Age range",
        ages.iter().map(|(range, count)| (range.to_string(), count)),
        total,
    );

    header("Ethnicity");
    print_counts("Ethnicity", dataset.count_by(|row| row.ethnicity), total);

    header("Region");
    print_counts(
        "Region",
        dataset.count_by(|row| row.region.clone().unwrap_or_else(|| "missing".into())),
        total,
    );

    header("Index of multiple deprivation");
    let fifth = IMD_MAX / 5 + 1;
    let quintiles = RangeSet::new(
        (0..5)
            .map(|idx| {
                let to = if idx == 4 { None } else { Some((idx + 1) * fifth) };
                Range::new(idx * fifth, to)
            })
            .collect(),
    )
    .bucket_values_with_missing(dataset.iter().map(|row| row.index_of_multiple_deprivation));
    print_counts(
        "IMD rank",
        quintiles
            .for_display()
            .map(|(range, count)| (range.to_string(), count)),
        total,
    );

    header("Household size");
    let sizes = RangeSet::new(vec![
        Range::new(1, Some(2)),
        Range::new(2, Some(3)),
        Range::new(3, Some(5)),
        Range::new(5, Some(10)),
        Range::new(10, None),
    ])
    .bucket_values_with_missing(dataset.iter().map(|row| row.household_size));
    print_counts(
        "Household size",
        sizes
            .for_display()
            .map(|(range, count)| (range.to_string(), count)),
        total,
    );

    header("Smoking");
    print_counts(
        "Smoking status",
        dataset.count_by(|row| row.smoking_status),
        total,
    );

    header("Shielding");
    print_counts(
        "Shielded",
        dataset.count_by(|row| if row.shielded { "yes" } else { "no" }),
        total,
    );
    Ok(())
}

fn print_counts<K: fmt::Display>(
    label: &str,
    counts: impl IntoIterator<Item = (K, usize)>,
    total: usize,
) {
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from(label))
            .with_cell(Cell::from("Count"))
            .with_cell(Cell::from("Percentage")),
    );
    for (key, count) in counts {
        let pc = if total == 0 {
            0.
        } else {
            count as f64 / total as f64 * 100.
        };
        table.add_row(
            Row::new()
                .with_cell(Cell::from(key.to_string()))
                .with_cell(Cell::from(count.to_string()))
                .with_cell(Cell::from(format!("{:.1}%", pc))),
        );
    }
    println!("{}", table);
}
