//! Study parameters, read from a toml file.
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate};
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudyConfig {
    /// The date the dataset describes.
    pub index_date: NaiveDate,
    /// The date households were identified.
    pub household_ident_date: NaiveDate,
    /// BMI readings after this date are ignored.
    pub bmi_measured_before: NaiveDate,
    /// Start of the window for temporary immunosuppression codes.
    pub temporary_immunosuppression_from: NaiveDate,
    /// Days a patient must have been registered before the index date.
    pub follow_up_days: u32,
    /// Directory holding the csv extract.
    pub extract_dir: PathBuf,
    /// Directory for the imported (binary) tables.
    pub cache_dir: PathBuf,
    pub codelists_dir: PathBuf,
    /// Where to write the dataset.
    pub output: PathBuf,
}

impl Default for StudyConfig {
    fn default() -> Self {
        StudyConfig {
            index_date: ymd(2022, 9, 1),
            household_ident_date: ymd(2020, 2, 1),
            bmi_measured_before: ymd(2010, 3, 1),
            temporary_immunosuppression_from: ymd(2019, 3, 1),
            follow_up_days: 90,
            extract_dir: "../data/extract".into(),
            cache_dir: "../data/cache".into(),
            codelists_dir: "../data/codelists".into(),
            output: "../data/output/dataset.csv".into(),
        }
    }
}

impl StudyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file \"{}\"", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("parsing config file \"{}\"", path.display()))?;
        event!(Level::INFO, "loaded config from \"{}\"", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load from `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                event!(Level::INFO, "no config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Latest registration start date that still gives enough follow-up.
    pub fn follow_up_from(&self) -> NaiveDate {
        days_before(self.index_date, self.follow_up_days.into())
    }
}

/// For date literals only. Panics on an invalid date.
pub(crate) fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// `date` moved back by whole years. 29th February becomes 1st March in a non-leap year.
///
/// Saturates at the earliest representable date.
pub fn years_before(date: NaiveDate, years: u32) -> NaiveDate {
    i32::try_from(years)
        .ok()
        .and_then(|years| shift_years(date, -years))
        .unwrap_or(NaiveDate::MIN)
}

/// `date` moved forward by whole years, rolling 29th February forward the same way.
pub fn years_after(date: NaiveDate, years: u32) -> NaiveDate {
    i32::try_from(years)
        .ok()
        .and_then(|years| shift_years(date, years))
        .unwrap_or(NaiveDate::MAX)
}

fn shift_years(date: NaiveDate, years: i32) -> Option<NaiveDate> {
    let year = date.year().checked_add(years)?;
    NaiveDate::from_ymd_opt(year, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
}

pub fn days_before(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_sub_signed(Duration::days(days))
        .unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod test {
    use super::{days_before, years_after, years_before, ymd, StudyConfig};
    use chrono::NaiveDate;

    #[test]
    fn partial_toml_uses_defaults() {
        let config = StudyConfig::from_toml(
            "index_date = \"2023-01-01\"\n\
             follow_up_days = 30\n\
             output = \"out.csv\"\n",
        )
        .unwrap();
        assert_eq!(config.index_date, ymd(2023, 1, 1));
        assert_eq!(config.follow_up_days, 30);
        assert_eq!(config.output.to_str(), Some("out.csv"));
        assert_eq!(config.household_ident_date, ymd(2020, 2, 1));
        assert_eq!(config.codelists_dir.to_str(), Some("../data/codelists"));

        assert_eq!(StudyConfig::from_toml("").unwrap(), StudyConfig::default());
        assert!(StudyConfig::from_toml("index_dat = \"2023-01-01\"").is_err());
    }

    #[test]
    fn follow_up() {
        let config = StudyConfig::default();
        assert_eq!(config.follow_up_from(), ymd(2022, 6, 3));
    }

    #[test]
    fn date_arithmetic() {
        assert_eq!(years_before(ymd(2022, 9, 1), 3), ymd(2019, 9, 1));
        assert_eq!(years_before(ymd(2024, 2, 29), 1), ymd(2023, 3, 1));
        assert_eq!(years_before(ymd(2024, 2, 29), 4), ymd(2020, 2, 29));
        assert_eq!(years_after(ymd(2000, 2, 29), 16), ymd(2016, 2, 29));
        assert_eq!(years_after(ymd(2000, 2, 29), 17), ymd(2017, 3, 1));
        assert_eq!(years_after(ymd(2022, 1, 1), u32::MAX), NaiveDate::MAX);
        assert_eq!(days_before(ymd(2022, 9, 1), 365), ymd(2021, 9, 1));
    }
}
