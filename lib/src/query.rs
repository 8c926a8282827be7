//! Building blocks for per-patient lookups over event tables.
//!
//! Filters are closures for use with [`Iterator::filter`], so a lookup reads as a chain:
//!
//! ```ignore
//! query::latest(
//!     store.clinical_events.for_patient(id)
//!         .filter(query::in_codelist(&lists.stroke))
//!         .filter(query::on_or_before(index_date)),
//! )
//! ```
//!
//! A row with no date never passes a date filter and is never the earliest or latest.
use crate::{
    tables::{CisVisit, ClinicalEvent, CovidTest, Death, Medication, Vaccination},
    CodeSystem, Codelist,
};
use chrono::NaiveDate;

/// A row that (usually) happened on a particular day.
pub trait Dated {
    fn date(&self) -> Option<NaiveDate>;
}

/// A row carrying a code from one or more code systems.
pub trait Coded {
    fn code(&self, system: CodeSystem) -> Option<&str>;
}

impl Dated for ClinicalEvent {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

impl Dated for Medication {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

impl Dated for Vaccination {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

impl Dated for Death {
    fn date(&self) -> Option<NaiveDate> {
        self.date
    }
}

impl Dated for CisVisit {
    fn date(&self) -> Option<NaiveDate> {
        self.visit_date
    }
}

impl Dated for CovidTest {
    fn date(&self) -> Option<NaiveDate> {
        self.specimen_taken_date
    }
}

impl Coded for ClinicalEvent {
    fn code(&self, system: CodeSystem) -> Option<&str> {
        match system {
            CodeSystem::Snomed => self.snomedct_code.as_deref(),
            CodeSystem::Ctv3 => self.ctv3_code.as_deref(),
            CodeSystem::Dmd => None,
        }
    }
}

impl Coded for Medication {
    fn code(&self, system: CodeSystem) -> Option<&str> {
        match system {
            CodeSystem::Dmd => self.dmd_code.as_deref(),
            _ => None,
        }
    }
}

/// Rows whose code (in the codelist's system) is in the codelist.
pub fn in_codelist<'a, T: Coded>(list: &'a Codelist) -> impl Fn(&&T) -> bool + 'a {
    move |row| matches!(row.code(list.system()), Some(code) if list.contains(code))
}

fn date_passes<T: Dated>(row: &T, f: impl Fn(NaiveDate) -> bool) -> bool {
    row.date().map(f).unwrap_or(false)
}

pub fn on_or_before<T: Dated>(date: NaiveDate) -> impl Fn(&&T) -> bool {
    move |row| date_passes(*row, |d| d <= date)
}

pub fn on_or_after<T: Dated>(date: NaiveDate) -> impl Fn(&&T) -> bool {
    move |row| date_passes(*row, |d| d >= date)
}

/// `from <= date <= to`
pub fn on_or_between<T: Dated>(from: NaiveDate, to: NaiveDate) -> impl Fn(&&T) -> bool {
    move |row| date_passes(*row, |d| from <= d && d <= to)
}

/// `from < date < to`
pub fn between<T: Dated>(from: NaiveDate, to: NaiveDate) -> impl Fn(&&T) -> bool {
    move |row| date_passes(*row, |d| from < d && d < to)
}

pub fn on_date<T: Dated>(date: NaiveDate) -> impl Fn(&&T) -> bool {
    move |row| row.date() == Some(date)
}

/// The row with the earliest date. Where several share it, the first is returned.
pub fn earliest<'a, T: Dated + 'a>(rows: impl IntoIterator<Item = &'a T>) -> Option<&'a T> {
    rows.into_iter()
        .filter_map(|row| Some((row.date()?, row)))
        // `min_by_key` keeps the first of equal minima
        .min_by_key(|(date, _)| *date)
        .map(|(_, row)| row)
}

/// The row with the latest date. Where several share it, the last is returned.
pub fn latest<'a, T: Dated + 'a>(rows: impl IntoIterator<Item = &'a T>) -> Option<&'a T> {
    rows.into_iter()
        .filter_map(|row| Some((row.date()?, row)))
        .max_by_key(|(date, _)| *date)
        .map(|(_, row)| row)
}

/// The mean of the values present, or `None` if there are none.
pub fn mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0., 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
