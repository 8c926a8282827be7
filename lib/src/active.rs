//! Picking the single record that is "active" for a patient on a given date.
//!
//! Registrations and addresses are recorded as date ranges, and the source system allows a patient
//! to have several overlapping ranges of the same kind. Where more than one range covers the date
//! we need one answer, and it has to be the same answer every time so that extracts are
//! reproducible.
//!
//! Both record kinds prefer, in order:
//!
//! 1. the most recently started record,
//! 2. then the longest running one (an open-ended record runs longest),
//! 3. for addresses only, one with a postcode,
//! 4. then an identifier tie-break.
//!
//! The identifier tie-breaks point in opposite directions. For registrations the highest practice
//! ID wins, for addresses the lowest address ID wins. Historical extracts were produced this way,
//! so each kind gets its own comparator and the two must not be merged.
use crate::{
    tables::{Address, PracticeRegistration},
    Range,
};
use chrono::NaiveDate;
use std::cmp::Ordering;

/// A record that applies over a date range.
///
/// The range starts on `start_date` (inclusive) and finishes on `end_date` (exclusive), or never.
pub trait TimeRanged {
    fn period(&self) -> Range<NaiveDate>;

    fn is_active_at(&self, date: NaiveDate) -> bool {
        self.period().contains(&date)
    }
}

impl TimeRanged for PracticeRegistration {
    fn period(&self) -> Range<NaiveDate> {
        Range::from_bounds(self.start_date, self.end_date)
    }
}

impl TimeRanged for Address {
    fn period(&self) -> Range<NaiveDate> {
        Range::from_bounds(self.start_date, self.end_date)
    }
}

/// The records covering `date`, in their original order.
pub fn active_at<'a, T: TimeRanged + 'a>(
    records: impl IntoIterator<Item = &'a T>,
    date: NaiveDate,
) -> impl Iterator<Item = &'a T> {
    records
        .into_iter()
        .filter(move |record| record.is_active_at(date))
}

/// The patient's active practice registration on `date`, if any.
pub fn select_active_registration<'a>(
    records: impl IntoIterator<Item = &'a PracticeRegistration>,
    date: NaiveDate,
) -> Option<&'a PracticeRegistration> {
    // `max_by` returns the last of several equal maxima.
    active_at(records, date).max_by(|a, b| registration_order(a, b))
}

/// The patient's active address on `date`, if any.
pub fn select_active_address<'a>(
    records: impl IntoIterator<Item = &'a Address>,
    date: NaiveDate,
) -> Option<&'a Address> {
    active_at(records, date).max_by(|a, b| address_order(a, b))
}

/// Start date, then end date (open-ended greatest), then practice ID. Greatest wins.
fn registration_order(a: &PracticeRegistration, b: &PracticeRegistration) -> Ordering {
    let (pa, pb) = (a.period(), b.period());
    pa.start()
        .cmp(pb.start())
        .then_with(|| pa.cmp_end(&pb))
        .then_with(|| a.practice_pseudo_id.cmp(&b.practice_pseudo_id))
}

/// Start date, then end date (open-ended greatest), then postcode present, then *negated* address
/// ID. Greatest wins, so among otherwise equal addresses the lowest ID is picked.
fn address_order(a: &Address, b: &Address) -> Ordering {
    let (pa, pb) = (a.period(), b.period());
    pa.start()
        .cmp(pb.start())
        .then_with(|| pa.cmp_end(&pb))
        .then_with(|| a.has_postcode.cmp(&b.has_postcode))
        // reversed comparison rather than `-address_id`, which overflows on `i64::MIN`
        .then_with(|| b.address_id.cmp(&a.address_id))
}
