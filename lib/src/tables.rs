//! The record tables of the extract, each indexed by patient.
use crate::{load, load_orig, save, util, ArcStr, Patient, PatientId, Result};
use chrono::NaiveDate;
use itertools::Either;
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{collections::BTreeMap, iter, ops::Deref, path::Path, sync::Arc};

/// Anything stored against a patient.
pub trait PatientRow {
    fn patient_id(&self) -> PatientId;
}

impl PatientRow for Patient {
    fn patient_id(&self) -> PatientId {
        self.patient_id
    }
}

macro_rules! patient_row {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PatientRow for $ty {
                fn patient_id(&self) -> PatientId {
                    self.patient_id
                }
            }
        )*
    };
}

patient_row!(
    ClinicalEvent,
    Medication,
    Vaccination,
    Death,
    CisVisit,
    CovidTest,
    HouseholdMembership,
    PracticeRegistration,
    Address,
);

/// A coded event from the primary care record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalEvent {
    pub patient_id: PatientId,
    pub date: Option<NaiveDate>,
    pub snomedct_code: Option<ArcStr>,
    pub ctv3_code: Option<ArcStr>,
    pub numeric_value: Option<f64>,
}

/// A prescription, coded with dm+d.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub patient_id: PatientId,
    pub date: Option<NaiveDate>,
    pub dmd_code: Option<ArcStr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccination {
    pub patient_id: PatientId,
    pub date: Option<NaiveDate>,
    pub target_disease: Option<ArcStr>,
}

/// A registered death (ONS).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Death {
    pub patient_id: PatientId,
    pub date: Option<NaiveDate>,
}

/// A visit recorded by the COVID-19 Infection Survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CisVisit {
    pub patient_id: PatientId,
    pub visit_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct CovidTestRaw {
    patient_id: PatientId,
    specimen_taken_date: Option<NaiveDate>,
    #[serde(deserialize_with = "util::optional_flag")]
    is_positive: Option<bool>,
}

/// A SARS-CoV-2 test result from SGSS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovidTest {
    pub patient_id: PatientId,
    pub specimen_taken_date: Option<NaiveDate>,
    pub is_positive: bool,
}

impl CovidTest {
    fn from_raw(raw: CovidTestRaw) -> Option<Self> {
        Some(CovidTest {
            patient_id: raw.patient_id,
            specimen_taken_date: raw.specimen_taken_date,
            // an unknown result is not a positive one
            is_positive: raw.is_positive.unwrap_or(false),
        })
    }
}

/// Household membership as identified on 1st February 2020.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdMembership {
    pub patient_id: PatientId,
    pub household_pseudo_id: Option<u64>,
    pub household_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PracticeRegistrationRaw {
    patient_id: PatientId,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    practice_pseudo_id: i64,
    #[serde(deserialize_with = "util::optional_string")]
    practice_stp: Option<ArcStr>,
    #[serde(deserialize_with = "util::optional_string")]
    practice_nuts1_region_name: Option<ArcStr>,
}

/// A period of registration with a GP practice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeRegistration {
    pub patient_id: PatientId,
    pub start_date: NaiveDate,
    /// `None` means the registration has not ended.
    pub end_date: Option<NaiveDate>,
    pub practice_pseudo_id: i64,
    pub practice_stp: Option<ArcStr>,
    pub practice_nuts1_region_name: Option<ArcStr>,
}

impl PracticeRegistration {
    fn from_raw(raw: PracticeRegistrationRaw) -> Option<Self> {
        Some(PracticeRegistration {
            patient_id: raw.patient_id,
            start_date: raw.start_date?,
            end_date: raw.end_date,
            practice_pseudo_id: raw.practice_pseudo_id,
            practice_stp: raw.practice_stp,
            practice_nuts1_region_name: raw.practice_nuts1_region_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AddressRaw {
    patient_id: PatientId,
    address_id: i64,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    #[serde(deserialize_with = "util::optional_flag")]
    has_postcode: Option<bool>,
    imd_rounded: Option<u32>,
    rural_urban_classification: Option<u8>,
}

/// A period of residence at an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub patient_id: PatientId,
    /// Opaque identifier, only meaningful as a tie-breaker.
    pub address_id: i64,
    pub start_date: NaiveDate,
    /// `None` means the patient is still resident.
    pub end_date: Option<NaiveDate>,
    pub has_postcode: bool,
    /// Index of multiple deprivation rank, rounded to the nearest 100.
    pub imd_rounded: Option<u32>,
    pub rural_urban_classification: Option<u8>,
}

impl Address {
    fn from_raw(raw: AddressRaw) -> Option<Self> {
        Some(Address {
            patient_id: raw.patient_id,
            address_id: raw.address_id,
            start_date: raw.start_date?,
            end_date: raw.end_date,
            has_postcode: raw.has_postcode.unwrap_or(false),
            imd_rounded: raw.imd_rounded,
            rural_urban_classification: raw.rural_urban_classification,
        })
    }
}

/// A list of rows, with a pre-built index for the `patient_id` field.
pub struct Table<T> {
    els: Arc<Vec<T>>,
    id_idx: BTreeMap<PatientId, Vec<usize>>,
}

impl<T: PatientRow> Table<T> {
    pub fn new(els: Vec<T>) -> Self {
        let mut this = Table {
            els: Arc::new(els),
            id_idx: BTreeMap::new(),
        };
        this.rebuild_id_map();
        this
    }

    /// All rows for one patient, in table order.
    pub fn for_patient(&self, patient_id: PatientId) -> impl Iterator<Item = &T> + Clone + '_ {
        let idxs = match self.id_idx.get(&patient_id) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent patient_id index")
        }))
    }

    /// The number of distinct patients with at least one row.
    pub fn patient_count(&self) -> usize {
        self.id_idx.len()
    }

    /// Get a table containing only rows that match the filter.
    pub fn filter(&self, f: impl Fn(&T) -> bool) -> Self
    where
        T: Clone,
    {
        Table::new(self.els.iter().filter(|row| f(row)).cloned().collect())
    }

    fn rebuild_id_map(&mut self) {
        self.id_idx.clear();
        for (idx, row) in self.els.iter().enumerate() {
            self.id_idx
                .entry(row.patient_id())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl<T: PatientRow + Serialize + DeserializeOwned> Table<T> {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Table {
            els: self.els.clone(),
            id_idx: self.id_idx.clone(),
        }
    }
}

impl<T: PatientRow> Default for Table<T> {
    fn default() -> Self {
        Table::new(vec![])
    }
}

impl<T> Deref for Table<T> {
    type Target = [T];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a, T> IntoIterator for &'a Table<T> {
    type IntoIter = std::slice::Iter<'a, T>;
    type Item = &'a T;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl<T: PatientRow> FromIterator<T> for Table<T> {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// Every table the study reads, loaded into memory.
#[derive(Clone, Default)]
pub struct Store {
    pub patients: Table<Patient>,
    pub clinical_events: Table<ClinicalEvent>,
    pub medications: Table<Medication>,
    pub vaccinations: Table<Vaccination>,
    pub ons_deaths: Table<Death>,
    pub ons_cis: Table<CisVisit>,
    pub sgss_covid_all_tests: Table<CovidTest>,
    pub household_memberships_2020: Table<HouseholdMembership>,
    pub practice_registrations: Table<PracticeRegistration>,
    pub addresses: Table<Address>,
}

impl Store {
    /// Load the original extract: one `<table>.csv` per table in `dir`.
    pub fn load_orig(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        ensure!(
            util::path_exists(dir)?,
            "extract directory \"{}\" does not exist",
            dir.display()
        );
        let store = Store {
            patients: orig_table(dir, "patients", Some)?,
            clinical_events: orig_table(dir, "clinical_events", Some)?,
            medications: orig_table(dir, "medications", Some)?,
            vaccinations: orig_table(dir, "vaccinations", Some)?,
            ons_deaths: orig_table(dir, "ons_deaths", Some)?,
            ons_cis: orig_table(dir, "ons_cis", Some)?,
            sgss_covid_all_tests: orig_table(dir, "sgss_covid_all_tests", CovidTest::from_raw)?,
            household_memberships_2020: orig_table(dir, "household_memberships_2020", Some)?,
            practice_registrations: orig_table(
                dir,
                "practice_registrations",
                PracticeRegistration::from_raw,
            )?,
            addresses: orig_table(dir, "addresses", Address::from_raw)?,
        };
        store.log_sizes();
        Ok(store)
    }

    /// Load a store previously written with [`Store::save`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let store = Store {
            patients: Table::load(dir.join("patients.bin"))?,
            clinical_events: Table::load(dir.join("clinical_events.bin"))?,
            medications: Table::load(dir.join("medications.bin"))?,
            vaccinations: Table::load(dir.join("vaccinations.bin"))?,
            ons_deaths: Table::load(dir.join("ons_deaths.bin"))?,
            ons_cis: Table::load(dir.join("ons_cis.bin"))?,
            sgss_covid_all_tests: Table::load(dir.join("sgss_covid_all_tests.bin"))?,
            household_memberships_2020: Table::load(dir.join("household_memberships_2020.bin"))?,
            practice_registrations: Table::load(dir.join("practice_registrations.bin"))?,
            addresses: Table::load(dir.join("addresses.bin"))?,
        };
        store.log_sizes();
        Ok(store)
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result {
        let dir = dir.as_ref();
        self.patients.save(dir.join("patients.bin"))?;
        self.clinical_events.save(dir.join("clinical_events.bin"))?;
        self.medications.save(dir.join("medications.bin"))?;
        self.vaccinations.save(dir.join("vaccinations.bin"))?;
        self.ons_deaths.save(dir.join("ons_deaths.bin"))?;
        self.ons_cis.save(dir.join("ons_cis.bin"))?;
        self.sgss_covid_all_tests
            .save(dir.join("sgss_covid_all_tests.bin"))?;
        self.household_memberships_2020
            .save(dir.join("household_memberships_2020.bin"))?;
        self.practice_registrations
            .save(dir.join("practice_registrations.bin"))?;
        self.addresses.save(dir.join("addresses.bin"))?;
        Ok(())
    }

    fn log_sizes(&self) {
        event!(Level::INFO, "patients: {}", self.patients.len());
        event!(Level::INFO, "clinical events: {}", self.clinical_events.len());
        event!(Level::INFO, "medications: {}", self.medications.len());
        event!(Level::INFO, "vaccinations: {}", self.vaccinations.len());
        event!(Level::INFO, "deaths: {}", self.ons_deaths.len());
        event!(Level::INFO, "CIS visits: {}", self.ons_cis.len());
        event!(Level::INFO, "covid tests: {}", self.sgss_covid_all_tests.len());
        event!(
            Level::INFO,
            "household memberships: {}",
            self.household_memberships_2020.len()
        );
        event!(
            Level::INFO,
            "practice registrations: {}",
            self.practice_registrations.len()
        );
        event!(Level::INFO, "addresses: {}", self.addresses.len());
    }
}

/// Load `<dir>/<name>.csv`, converting each raw row and dropping those that can't be used.
///
/// A missing file gives an empty table.
fn orig_table<R, T>(dir: &Path, name: &str, from_raw: impl Fn(R) -> Option<T>) -> Result<Table<T>>
where
    R: DeserializeOwned,
    T: PatientRow,
{
    let path = dir.join(format!("{}.csv", name));
    if !util::path_exists(&path)? {
        event!(
            Level::WARN,
            "no \"{}\" table in the extract, treating it as empty",
            name
        );
        return Ok(Table::default());
    }
    let raw: Vec<R> = load_orig(&path)?;
    let raw_len = raw.len();
    let rows: Vec<T> = raw.into_iter().filter_map(from_raw).collect();
    if rows.len() < raw_len {
        event!(
            Level::WARN,
            "dropped {} rows from \"{}\" with missing required fields",
            raw_len - rows.len(),
            path.display()
        );
    }
    Ok(Table::new(rows))
}

#[cfg(test)]
mod test {
    use super::{ClinicalEvent, Store, Table};
    use crate::{select_active_address, Sex};
    use chrono::NaiveDate;
    use std::{env, fs, path::Path, process};

    fn write_table(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(format!("{}.csv", name)), contents).unwrap();
    }

    fn event(patient_id: u64, day: u32) -> ClinicalEvent {
        ClinicalEvent {
            patient_id,
            date: NaiveDate::from_ymd_opt(2020, 1, day),
            snomedct_code: None,
            ctv3_code: Some("XaPbt".into()),
            numeric_value: None,
        }
    }

    #[test]
    fn index_by_patient() {
        let table: Table<_> = vec![event(2, 1), event(1, 2), event(2, 3)]
            .into_iter()
            .collect();
        assert_eq!(table.len(), 3);
        assert_eq!(table.patient_count(), 2);
        let days = table
            .for_patient(2)
            .map(|evt| evt.date.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 1, 3).unwrap()
            ]
        );
        assert_eq!(table.for_patient(3).count(), 0);

        let filtered = table.filter(|evt| evt.patient_id == 1);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.for_patient(2).count(), 0);
    }

    #[test]
    fn load_extract() {
        let dir = env::temp_dir().join(format!("extract-test-{}", process::id()));
        let extract = dir.join("extract");
        fs::create_dir_all(&extract).unwrap();
        write_table(
            &extract,
            "patients",
            "patient_id,date_of_birth,sex\n\
             1,1980-05-01,female\n\
             2,,M\n\
             3,2001-11-01,unknown\n",
        );
        write_table(
            &extract,
            "practice_registrations",
            "patient_id,start_date,end_date,practice_pseudo_id,practice_stp,practice_nuts1_region_name\n\
             1,2010-01-01,,4,E54000005,null\n\
             2,,2015-01-01,6,E54000010,London\n",
        );
        write_table(
            &extract,
            "addresses",
            "patient_id,address_id,start_date,end_date,has_postcode,imd_rounded,rural_urban_classification\n\
             1,7,2015-01-01,,T,1200,3\n\
             1,2,2015-01-01,,,5600,3\n\
             1,9,2015-01-01,,0,,\n",
        );
        write_table(
            &extract,
            "sgss_covid_all_tests",
            "patient_id,specimen_taken_date,is_positive\n\
             1,2021-01-05,true\n\
             3,2021-02-10,\n",
        );

        let store = Store::load_orig(&extract).unwrap();
        assert_eq!(store.patients.len(), 3);
        assert_eq!(store.patients[1].date_of_birth, None);
        assert_eq!(store.patients[1].sex, Sex::Male);
        // the registration without a start date is dropped
        assert_eq!(store.practice_registrations.len(), 1);
        assert_eq!(store.practice_registrations[0].practice_nuts1_region_name, None);
        assert_eq!(
            store.addresses.iter().map(|a| a.has_postcode).collect::<Vec<_>>(),
            vec![true, false, false]
        );
        let address = select_active_address(
            store.addresses.for_patient(1),
            NaiveDate::from_ymd_opt(2022, 9, 1).unwrap(),
        )
        .unwrap();
        assert_eq!(address.address_id, 7);
        assert_eq!(
            store
                .sgss_covid_all_tests
                .iter()
                .map(|t| t.is_positive)
                .collect::<Vec<_>>(),
            vec![true, false]
        );
        // no file for these
        assert_eq!(store.ons_cis.len(), 0);
        assert_eq!(store.clinical_events.len(), 0);

        let cache = dir.join("cache");
        store.save(&cache).unwrap();
        let reloaded = Store::load(&cache).unwrap();
        assert_eq!(&*reloaded.patients, &*store.patients);
        assert_eq!(&*reloaded.addresses, &*store.addresses);
        assert_eq!(
            &*reloaded.practice_registrations,
            &*store.practice_registrations
        );
        assert_eq!(reloaded.addresses.patient_count(), 1);
        assert_eq!(reloaded.ons_deaths.len(), 0);

        write_table(&extract, "ons_deaths", "patient_id,date\nx,2020-01-01\n");
        let err = Store::load_orig(&extract).err().unwrap();
        assert!(format!("{:#}", err).contains("ons_deaths.csv"));

        assert!(Store::load_orig(dir.join("missing")).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
