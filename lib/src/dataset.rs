//! The study dataset: one row of derived variables per patient in the study population.
use crate::{
    config::{days_before, years_after, years_before},
    query::{self, between, in_codelist, on_date, on_or_after, on_or_before, on_or_between},
    select_active_address, select_active_registration,
    tables::{ClinicalEvent, Store},
    util, ArcStr, Codelist, Patient, PatientId, Result, Sex, StudyCodelists, StudyConfig,
};
use chrono::NaiveDate;
use qu::ick_use::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, ops::Deref, path::Path};

const COVID_VACCINE_TARGET: &str = "SARS-2 CORONAVIRUS";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeBand {
    #[serde(rename = "18-39")]
    From18To39,
    #[serde(rename = "40-49")]
    From40To49,
    #[serde(rename = "50-59")]
    From50To59,
    #[serde(rename = "60-69")]
    From60To69,
    #[serde(rename = "70-79")]
    From70To79,
    #[serde(rename = "80+")]
    From80,
    /// Under 18, 120 or over, or unknown.
    #[serde(rename = "0")]
    Other,
}

impl AgeBand {
    pub fn from_age(age: Option<i32>) -> Self {
        match age {
            Some(18..=39) => AgeBand::From18To39,
            Some(40..=49) => AgeBand::From40To49,
            Some(50..=59) => AgeBand::From50To59,
            Some(60..=69) => AgeBand::From60To69,
            Some(70..=79) => AgeBand::From70To79,
            Some(80..=119) => AgeBand::From80,
            _ => AgeBand::Other,
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AgeBand::From18To39 => "18-39",
            AgeBand::From40To49 => "40-49",
            AgeBand::From50To59 => "50-59",
            AgeBand::From60To69 => "60-69",
            AgeBand::From70To79 => "70-79",
            AgeBand::From80 => "80+",
            AgeBand::Other => "0",
        })
    }
}

/// The 6-group ethnicity classification (the 6th group being missing).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ethnicity {
    White,
    Mixed,
    #[serde(rename = "South Asian")]
    SouthAsian,
    Black,
    Other,
    Missing,
}

impl Ethnicity {
    /// From the `Grouping_6` category of the ethnicity codelist.
    fn from_grouping(group: Option<&str>) -> Self {
        match group {
            Some("1") => Ethnicity::White,
            Some("2") => Ethnicity::Mixed,
            Some("3") => Ethnicity::SouthAsian,
            Some("4") => Ethnicity::Black,
            Some("5") => Ethnicity::Other,
            _ => Ethnicity::Missing,
        }
    }
}

impl fmt::Display for Ethnicity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Ethnicity::White => "White",
            Ethnicity::Mixed => "Mixed",
            Ethnicity::SouthAsian => "South Asian",
            Ethnicity::Black => "Black",
            Ethnicity::Other => "Other",
            Ethnicity::Missing => "Missing",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SmokingStatus {
    /// Current smoker
    #[serde(rename = "S")]
    Smoker,
    /// Ex-smoker
    #[serde(rename = "E")]
    ExSmoker,
    /// Never smoked
    #[serde(rename = "N")]
    NeverSmoked,
    #[serde(rename = "M")]
    Missing,
}

impl fmt::Display for SmokingStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SmokingStatus::Smoker => "current smoker",
            SmokingStatus::ExSmoker => "ex-smoker",
            SmokingStatus::NeverSmoked => "never smoked",
            SmokingStatus::Missing => "missing",
        })
    }
}

/// Asthma, graded by oral prednisolone prescribing in the year before the index date.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Asthma {
    /// No recent asthma code where the patient never had asthma or has chronic respiratory
    /// disease.
    #[serde(rename = "0")]
    Absent,
    /// No prednisolone, or more than 4 prescriptions.
    #[serde(rename = "1")]
    PrednisoloneNoneOrMany,
    /// Between 1 and 4 prednisolone prescriptions.
    #[serde(rename = "2")]
    PrednisoloneFew,
}

impl fmt::Display for Asthma {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Asthma::Absent => "0",
            Asthma::PrednisoloneNoneOrMany => "1",
            Asthma::PrednisoloneFew => "2",
        })
    }
}

/// All the variables for one patient.
///
/// Fields holding a date of a condition are the date of the first or last (depending on the
/// condition) relevant code on or before the index date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub patient_id: PatientId,
    #[serde(serialize_with = "util::flag_tf", deserialize_with = "util::flag")]
    pub in_cis: bool,
    pub covid_vax: Option<NaiveDate>,
    pub sex: Sex,
    pub age: Option<i32>,
    pub ageband_broad: AgeBand,
    pub ethnicity: Ethnicity,
    #[serde(serialize_with = "util::flag_tf", deserialize_with = "util::flag")]
    pub died: bool,
    #[serde(serialize_with = "util::flag_tf", deserialize_with = "util::flag")]
    pub is_registered_with_tpp: bool,
    /// `None` when the patient isn't registered on the index date.
    #[serde(
        serialize_with = "util::optional_flag_tf",
        deserialize_with = "util::optional_flag"
    )]
    pub has_follow_up: Option<bool>,
    #[serde(serialize_with = "util::flag_tf", deserialize_with = "util::flag")]
    pub is_registered_with_tpp_feb2020: bool,
    pub household_id: Option<u64>,
    pub household_size: Option<u32>,
    pub index_of_multiple_deprivation: Option<u32>,
    pub stp: Option<ArcStr>,
    pub urban: Option<u8>,
    pub region: Option<ArcStr>,
    #[serde(serialize_with = "util::flag_tf", deserialize_with = "util::flag")]
    pub shielded: bool,
    pub first_positive_test_date: Option<NaiveDate>,
    pub bmi: Option<f64>,
    pub bmi_date_measured: Option<NaiveDate>,
    pub smoking_status: SmokingStatus,
    pub smoking_status_date: Option<NaiveDate>,
    pub hypertension: Option<NaiveDate>,
    pub bp_sys: Option<f64>,
    pub bp_dias: Option<f64>,
    pub bp_sys_date_measured: Option<NaiveDate>,
    pub bp_dias_date_measured: Option<NaiveDate>,
    pub dementia: Option<NaiveDate>,
    pub diabetes: Option<NaiveDate>,
    pub hba1c_mmol_per_mol: Option<f64>,
    pub hba1c_mmol_per_mol_date: Option<NaiveDate>,
    pub hba1c_percentage: Option<f64>,
    pub hba1c_percentage_date: Option<NaiveDate>,
    pub copd: Option<NaiveDate>,
    pub other_respiratory: Option<NaiveDate>,
    pub asthma: Asthma,
    pub cancer: Option<NaiveDate>,
    pub haem_cancer: Option<NaiveDate>,
    pub permanent_immunodeficiency: Option<NaiveDate>,
    pub transplant: Option<NaiveDate>,
    pub asplenia: Option<NaiveDate>,
    /// Last code in the year up to the index date.
    pub aplastic_anaemia: Option<NaiveDate>,
    /// Last code since the configured start of the window.
    pub temporary_immunodeficiency: Option<NaiveDate>,
    pub heart_failure: Option<NaiveDate>,
    pub stroke: Option<NaiveDate>,
    pub tia: Option<NaiveDate>,
    pub myocardial_infarct: Option<NaiveDate>,
    pub heart_disease: Option<NaiveDate>,
    pub pad: Option<NaiveDate>,
    pub vte: Option<NaiveDate>,
    pub af: Option<NaiveDate>,
    pub systemic_lupus_erythematosus: Option<NaiveDate>,
    pub rheumatoid_arthritis: Option<NaiveDate>,
    pub psoriasis: Option<NaiveDate>,
    pub chronic_liver_disease: Option<NaiveDate>,
    pub other_neuro: Option<NaiveDate>,
    pub creatinine: Option<f64>,
    pub creatinine_date: Option<NaiveDate>,
    pub dialysis: Option<NaiveDate>,
}

impl DatasetRow {
    /// Whether the patient belongs in the study population.
    pub fn in_population(&self) -> bool {
        matches!(self.age, Some(18..=119))
            && self.is_registered_with_tpp
            && !self.died
            && self.has_follow_up == Some(true)
            && self.is_registered_with_tpp_feb2020
    }
}

/// Everything needed to work out the variables for one patient.
struct Extractor<'a> {
    store: &'a Store,
    lists: &'a StudyCodelists,
    config: &'a StudyConfig,
    patient: &'a Patient,
}

impl<'a> Extractor<'a> {
    fn events(&self) -> impl Iterator<Item = &'a ClinicalEvent> + Clone + 'a {
        let store: &'a Store = self.store;
        store.clinical_events.for_patient(self.patient.patient_id)
    }

    /// The earliest event from `list` on or before the index date.
    fn first(&self, list: &Codelist) -> Option<&'a ClinicalEvent> {
        query::earliest(
            self.events()
                .filter(in_codelist(list))
                .filter(on_or_before(self.config.index_date)),
        )
    }

    /// The latest event from `list` on or before the index date.
    fn last(&self, list: &Codelist) -> Option<&'a ClinicalEvent> {
        query::latest(
            self.events()
                .filter(in_codelist(list))
                .filter(on_or_before(self.config.index_date)),
        )
    }

    fn first_date(&self, list: &Codelist) -> Option<NaiveDate> {
        self.first(list).and_then(|evt| evt.date)
    }

    fn last_date(&self, list: &Codelist) -> Option<NaiveDate> {
        self.last(list).and_then(|evt| evt.date)
    }

    fn last_date_in(&self, list: &Codelist, from: NaiveDate) -> Option<NaiveDate> {
        query::latest(
            self.events()
                .filter(in_codelist(list))
                .filter(on_or_between(from, self.config.index_date)),
        )
        .and_then(|evt| evt.date)
    }

    fn in_cis(&self) -> bool {
        let index = self.config.index_date;
        self.store
            .ons_cis
            .for_patient(self.patient.patient_id)
            .find(between(years_before(index, 3), index))
            .is_some()
    }

    fn covid_vax(&self) -> Option<NaiveDate> {
        query::earliest(
            self.store
                .vaccinations
                .for_patient(self.patient.patient_id)
                .filter(|vax| vax.target_disease.as_deref() == Some(COVID_VACCINE_TARGET))
                .filter(on_or_before(self.config.index_date)),
        )
        .and_then(|vax| vax.date)
    }

    fn ethnicity(&self) -> Ethnicity {
        let list = &self.lists.ethnicity;
        let group = query::latest(self.events().filter(in_codelist(list)))
            .and_then(|evt| evt.snomedct_code.as_deref())
            .and_then(|code| list.category(code));
        Ethnicity::from_grouping(group)
    }

    fn died(&self) -> bool {
        self.store
            .ons_deaths
            .for_patient(self.patient.patient_id)
            .find(on_or_before(self.config.index_date))
            .is_some()
    }

    /// A "high risk" code, without a later code moving the patient out of the group.
    fn shielded(&self) -> bool {
        let high_risk = self.last_date_any(&self.lists.high_risk);
        let lowered = high_risk.and_then(|date| {
            self.events()
                .filter(in_codelist(&self.lists.not_high_risk))
                .find(on_or_after(date))
        });
        high_risk.is_some() && lowered.is_none()
    }

    /// The latest event from `list` on any date.
    fn last_date_any(&self, list: &Codelist) -> Option<NaiveDate> {
        query::latest(self.events().filter(in_codelist(list))).and_then(|evt| evt.date)
    }

    fn first_positive_test_date(&self) -> Option<NaiveDate> {
        query::earliest(
            self.store
                .sgss_covid_all_tests
                .for_patient(self.patient.patient_id)
                .filter(|test| test.is_positive)
                .filter(on_or_before(self.config.index_date)),
        )
        .and_then(|test| test.specimen_taken_date)
    }

    /// Plausible BMI readings taken as an adult (16+), up to the configured cutoff.
    fn bmi(&self) -> Option<&'a ClinicalEvent> {
        let adult_from = self.patient.date_of_birth.map(|dob| years_after(dob, 16));
        query::latest(
            self.events()
                .filter(in_codelist(&self.lists.bmi))
                .filter(|evt| matches!(evt.numeric_value, Some(v) if v > 4. && v < 200.))
                .filter(|evt| matches!((evt.date, adult_from), (Some(d), Some(from)) if d >= from))
                .filter(on_or_before(self.config.bmi_measured_before)),
        )
    }

    fn smoking(&self) -> (SmokingStatus, Option<NaiveDate>) {
        let recent = self.last(&self.lists.clear_smoking);
        let recent_category = recent
            .and_then(|evt| evt.ctv3_code.as_deref())
            .and_then(|code| self.lists.clear_smoking.category(code));
        let ever_smoked = self.first(&self.lists.ever_smoked).is_some();
        let status = match recent_category {
            Some("S") => SmokingStatus::Smoker,
            _ if ever_smoked => SmokingStatus::ExSmoker,
            Some("N") => SmokingStatus::NeverSmoked,
            _ => SmokingStatus::Missing,
        };
        (status, recent.and_then(|evt| evt.date))
    }

    /// (date, mean systolic, mean diastolic), all readings from the last date a systolic reading
    /// was taken.
    fn blood_pressure(&self) -> (Option<NaiveDate>, Option<f64>, Option<f64>) {
        let date = self.last_date(&self.lists.systolic_blood_pressure);
        let mean_on = |list: &Codelist| {
            let date = date?;
            query::mean(
                self.events()
                    .filter(in_codelist(list))
                    .filter(on_date(date))
                    .map(|evt| evt.numeric_value),
            )
        };
        (
            date,
            mean_on(&self.lists.systolic_blood_pressure),
            mean_on(&self.lists.diastolic_blood_pressure),
        )
    }

    fn asthma(&self) -> Asthma {
        let index = self.config.index_date;
        let latest = self.last_date(&self.lists.asthma);
        let recent = latest.map(|date| date >= days_before(index, 3 * 365));
        let ever = latest.is_some();
        let chronic_respiratory_ever = self
            .events()
            .find(in_codelist(&self.lists.chronic_respiratory_disease))
            .is_some();
        let prednisolone = self
            .store
            .medications
            .for_patient(self.patient.patient_id)
            .filter(in_codelist(&self.lists.prednisolone))
            .filter(on_or_between(days_before(index, 365), index))
            .count();

        // With no asthma code at all `recent` is unknown, which doesn't satisfy the first arm.
        let absent = recent.map_or(false, |recent| {
            !recent && (!ever || chronic_respiratory_ever)
        });
        if absent {
            Asthma::Absent
        } else if prednisolone == 0 || prednisolone > 4 {
            Asthma::PrednisoloneNoneOrMany
        } else {
            Asthma::PrednisoloneFew
        }
    }

    fn row(&self) -> DatasetRow {
        let config = self.config;
        let lists = self.lists;
        let id = self.patient.patient_id;

        let registrations = self.store.practice_registrations.for_patient(id);
        let reg = select_active_registration(registrations.clone(), config.index_date);
        let reg_2020 = select_active_registration(registrations, config.household_ident_date);
        let addresses = self.store.addresses.for_patient(id);
        let address = select_active_address(addresses.clone(), config.index_date);
        let address_2020 = select_active_address(addresses, config.household_ident_date);
        let household = self.store.household_memberships_2020.for_patient(id).next();

        let age = self.patient.age_at(config.index_date);
        let bmi = self.bmi();
        let (smoking_status, smoking_status_date) = self.smoking();
        let (bp_date, bp_sys, bp_dias) = self.blood_pressure();
        let hba1c = self.last(&lists.hba1c_new);
        let hba1c_percentage = self.last(&lists.hba1c_old);
        let creatinine = self.last(&lists.creatinine);

        DatasetRow {
            patient_id: id,
            in_cis: self.in_cis(),
            covid_vax: self.covid_vax(),
            sex: self.patient.sex,
            age,
            ageband_broad: AgeBand::from_age(age),
            ethnicity: self.ethnicity(),
            died: self.died(),
            is_registered_with_tpp: reg.is_some(),
            has_follow_up: reg.map(|reg| reg.start_date <= config.follow_up_from()),
            is_registered_with_tpp_feb2020: reg_2020.is_some(),
            household_id: household.and_then(|h| h.household_pseudo_id),
            household_size: household.and_then(|h| h.household_size),
            index_of_multiple_deprivation: address.and_then(|a| a.imd_rounded),
            stp: reg_2020.and_then(|reg| reg.practice_stp.clone()),
            urban: address_2020.and_then(|a| a.rural_urban_classification),
            region: reg.and_then(|reg| reg.practice_nuts1_region_name.clone()),
            shielded: self.shielded(),
            first_positive_test_date: self.first_positive_test_date(),
            bmi: bmi.and_then(|evt| evt.numeric_value),
            bmi_date_measured: bmi.and_then(|evt| evt.date),
            smoking_status,
            smoking_status_date,
            hypertension: self.first_date(&lists.hypertension),
            bp_sys,
            bp_dias,
            bp_sys_date_measured: bp_date,
            bp_dias_date_measured: bp_date,
            dementia: self.first_date(&lists.dementia),
            diabetes: self.first_date(&lists.diabetes),
            hba1c_mmol_per_mol: hba1c.and_then(|evt| evt.numeric_value),
            hba1c_mmol_per_mol_date: hba1c.and_then(|evt| evt.date),
            hba1c_percentage: hba1c_percentage.and_then(|evt| evt.numeric_value),
            hba1c_percentage_date: hba1c_percentage.and_then(|evt| evt.date),
            copd: self.first_date(&lists.copd),
            other_respiratory: self.first_date(&lists.other_respiratory),
            asthma: self.asthma(),
            cancer: self.first_date(&lists.cancer),
            haem_cancer: self.first_date(&lists.haem_cancer),
            permanent_immunodeficiency: self.last_date(&lists.permanent_immunodeficiency),
            transplant: self.last_date(&lists.organ_transplant),
            asplenia: self.last_date(&lists.asplenia),
            aplastic_anaemia: self.last_date_in(
                &lists.aplastic_anaemia,
                days_before(config.index_date, 365),
            ),
            temporary_immunodeficiency: self.last_date_in(
                &lists.temporary_immune,
                config.temporary_immunosuppression_from,
            ),
            heart_failure: self.first_date(&lists.heart_failure),
            stroke: self.last_date(&lists.stroke),
            tia: self.last_date(&lists.tia),
            myocardial_infarct: self.last_date(&lists.myocardial_infarction),
            heart_disease: self.last_date(&lists.chronic_cardiac_disease),
            pad: self.last_date(&lists.peripheral_arterial_disease),
            vte: self.last_date(&lists.venous_thromboembolism),
            af: self.last_date(&lists.atrial_fibrillation),
            systemic_lupus_erythematosus: self.last_date(&lists.sle),
            rheumatoid_arthritis: self.last_date(&lists.rheumatoid_arthritis),
            psoriasis: self.last_date(&lists.psoriasis),
            chronic_liver_disease: self.last_date(&lists.chronic_liver_disease),
            other_neuro: self.last_date(&lists.other_neurological),
            creatinine: creatinine.and_then(|evt| evt.numeric_value),
            creatinine_date: creatinine.and_then(|evt| evt.date),
            dialysis: self.last_date(&lists.dialysis),
        }
    }
}

/// The rows of the dataset, ordered by patient ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<DatasetRow>,
}

impl Dataset {
    /// Work out the variables for every patient, keeping those in the study population.
    pub fn build(store: &Store, lists: &StudyCodelists, config: &StudyConfig) -> Self {
        let mut rows = store
            .patients
            .par_iter()
            .map(|patient| {
                Extractor {
                    store,
                    lists,
                    config,
                    patient,
                }
                .row()
            })
            .filter(DatasetRow::in_population)
            .collect::<Vec<_>>();
        rows.sort_by_key(|row| row.patient_id);
        event!(
            Level::INFO,
            "{} of {} patients are in the study population",
            rows.len(),
            store.patients.len()
        );
        Dataset { rows }
    }

    pub fn from_rows(mut rows: Vec<DatasetRow>) -> Self {
        rows.sort_by_key(|row| row.patient_id);
        Dataset { rows }
    }

    /// Write the dataset as csv.
    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        fn inner(rows: &[DatasetRow], path: &Path) -> Result {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("could not create parent")?;
            }
            if util::path_exists(path)? {
                event!(
                    Level::WARN,
                    "overwriting existing file at \"{}\"",
                    path.display()
                );
            }
            let mut out = csv::Writer::from_path(path)?;
            for row in rows {
                out.serialize(row)?;
            }
            out.flush()?;
            Ok(())
        }
        let path = path.as_ref();
        crate::check_extension(path, "csv")?;
        inner(&self.rows, path)
            .with_context(|| format!("unable to save dataset to \"{}\"", path.display()))
    }

    /// Read a dataset written by [`Dataset::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows = csv::Reader::from_path(path)
            .and_then(|reader| reader.into_deserialize().collect::<Result<Vec<_>, _>>())
            .with_context(|| format!("unable to load dataset from \"{}\"", path.display()))?;
        Ok(Self::from_rows(rows))
    }

    /// The number of rows for each value of `key`, in key order.
    pub fn count_by<K: Ord>(&self, key: impl Fn(&DatasetRow) -> K) -> BTreeMap<K, usize> {
        let mut counts = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(key(row)).or_insert(0) += 1;
        }
        counts
    }
}

impl Deref for Dataset {
    type Target = [DatasetRow];
    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        tables::{CisVisit, Medication, PracticeRegistration, Table},
        CodeSystem,
    };
    use std::{env, process};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn patient(patient_id: PatientId, dob: &str) -> Patient {
        Patient {
            patient_id,
            date_of_birth: Some(date(dob)),
            sex: Sex::Female,
        }
    }

    fn registered(patient_id: PatientId, start: &str) -> PracticeRegistration {
        PracticeRegistration {
            patient_id,
            start_date: date(start),
            end_date: None,
            practice_pseudo_id: 1,
            practice_stp: Some("E54000007".into()),
            practice_nuts1_region_name: Some("London".into()),
        }
    }

    fn ctv3(patient_id: PatientId, day: &str, code: &str) -> ClinicalEvent {
        ClinicalEvent {
            patient_id,
            date: Some(date(day)),
            snomedct_code: None,
            ctv3_code: Some(code.into()),
            numeric_value: None,
        }
    }

    fn snomed(patient_id: PatientId, day: &str, code: &str, value: Option<f64>) -> ClinicalEvent {
        ClinicalEvent {
            patient_id,
            date: Some(date(day)),
            snomedct_code: Some(code.into()),
            ctv3_code: None,
            numeric_value: value,
        }
    }

    fn lists() -> StudyCodelists {
        StudyCodelists::build(|file| match file.name {
            "clear_smoking" => Codelist::categorised(
                CodeSystem::Ctv3,
                [("137R.", "S"), ("137S.", "E"), ("137L.", "N")],
            ),
            "asthma" => Codelist::new(CodeSystem::Ctv3, ["H33.."]),
            "chronic_respiratory_disease" => Codelist::new(CodeSystem::Ctv3, ["H3..."]),
            "prednisolone" => Codelist::new(CodeSystem::Dmd, ["3166711000001101"]),
            "stroke" => Codelist::new(CodeSystem::Ctv3, ["G66.."]),
            _ => Ok(Codelist::empty(file.system)),
        })
        .unwrap()
    }

    /// A patient who is in the population, with no events.
    fn base_store() -> Store {
        Store {
            patients: Table::new(vec![patient(1, "1960-01-01")]),
            practice_registrations: Table::new(vec![registered(1, "2010-01-01")]),
            ..Store::default()
        }
    }

    fn build_one(store: &Store) -> DatasetRow {
        let dataset = Dataset::build(store, &lists(), &StudyConfig::default());
        assert_eq!(dataset.len(), 1);
        dataset[0].clone()
    }

    #[test]
    fn age_bands() {
        assert_eq!(AgeBand::from_age(Some(17)), AgeBand::Other);
        assert_eq!(AgeBand::from_age(Some(18)), AgeBand::From18To39);
        assert_eq!(AgeBand::from_age(Some(39)), AgeBand::From18To39);
        assert_eq!(AgeBand::from_age(Some(40)), AgeBand::From40To49);
        assert_eq!(AgeBand::from_age(Some(79)), AgeBand::From70To79);
        assert_eq!(AgeBand::from_age(Some(80)), AgeBand::From80);
        assert_eq!(AgeBand::from_age(Some(119)), AgeBand::From80);
        assert_eq!(AgeBand::from_age(Some(120)), AgeBand::Other);
        assert_eq!(AgeBand::from_age(None), AgeBand::Other);
    }

    #[test]
    fn population() {
        let mut store = base_store();
        store.patients = Table::new(vec![
            patient(1, "1960-01-01"),
            // too young
            patient(2, "2010-01-01"),
            // registered too recently
            patient(3, "1960-01-01"),
            // not registered in 2020
            patient(4, "1960-01-01"),
            // died
            patient(5, "1960-01-01"),
        ]);
        store.practice_registrations = Table::new(vec![
            registered(1, "2010-01-01"),
            registered(2, "2010-01-01"),
            registered(3, "2022-08-01"),
            registered(4, "2021-01-01"),
            registered(5, "2010-01-01"),
        ]);
        store.ons_deaths = Table::new(vec![crate::tables::Death {
            patient_id: 5,
            date: Some(date("2022-01-01")),
        }]);
        let dataset = Dataset::build(&store, &lists(), &StudyConfig::default());
        let ids = dataset.iter().map(|row| row.patient_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1]);
        let row = &dataset[0];
        assert_eq!(row.age, Some(62));
        assert_eq!(row.ageband_broad, AgeBand::From60To69);
        assert_eq!(row.stp.as_deref(), Some("E54000007"));
        assert_eq!(row.region.as_deref(), Some("London"));
        assert_eq!(row.has_follow_up, Some(true));
    }

    #[test]
    fn smoking_precedence() {
        let mut store = base_store();
        // ex-smoker code then a never-smoked code: still an ex-smoker
        store.clinical_events = Table::new(vec![
            ctv3(1, "2015-01-01", "137S."),
            ctv3(1, "2020-01-01", "137L."),
        ]);
        let row = build_one(&store);
        assert_eq!(row.smoking_status, SmokingStatus::ExSmoker);
        assert_eq!(row.smoking_status_date, Some(date("2020-01-01")));

        store.clinical_events = Table::new(vec![
            ctv3(1, "2015-01-01", "137L."),
            ctv3(1, "2020-01-01", "137R."),
        ]);
        assert_eq!(build_one(&store).smoking_status, SmokingStatus::Smoker);

        store.clinical_events = Table::new(vec![ctv3(1, "2015-01-01", "137L.")]);
        assert_eq!(build_one(&store).smoking_status, SmokingStatus::NeverSmoked);

        // codes after the index date don't count
        store.clinical_events = Table::new(vec![ctv3(1, "2023-01-01", "137R.")]);
        let row = build_one(&store);
        assert_eq!(row.smoking_status, SmokingStatus::Missing);
        assert_eq!(row.smoking_status_date, None);
    }

    fn prednisolone(patient_id: PatientId, day: &str) -> Medication {
        Medication {
            patient_id,
            date: Some(date(day)),
            dmd_code: Some("3166711000001101".into()),
        }
    }

    #[test]
    fn asthma_categories() {
        let mut store = base_store();
        // no asthma codes at all: falls through to the prednisolone count
        assert_eq!(build_one(&store).asthma, Asthma::PrednisoloneNoneOrMany);

        // an old asthma code and chronic respiratory disease
        store.clinical_events = Table::new(vec![
            ctv3(1, "2010-01-01", "H33.."),
            ctv3(1, "2010-01-01", "H3..."),
        ]);
        assert_eq!(build_one(&store).asthma, Asthma::Absent);

        // a recent asthma code with two courses of prednisolone
        store.clinical_events = Table::new(vec![ctv3(1, "2021-01-01", "H33..")]);
        store.medications = Table::new(vec![
            prednisolone(1, "2022-01-01"),
            prednisolone(1, "2022-03-01"),
            // outside the year before the index date
            prednisolone(1, "2021-01-01"),
        ]);
        assert_eq!(build_one(&store).asthma, Asthma::PrednisoloneFew);

        store.medications = Table::new(
            ["2022-01-01", "2022-02-01", "2022-03-01", "2022-04-01", "2022-05-01"]
                .iter()
                .map(|day| prednisolone(1, day))
                .collect(),
        );
        assert_eq!(build_one(&store).asthma, Asthma::PrednisoloneNoneOrMany);
    }

    #[test]
    fn shielding() {
        let mut store = base_store();
        assert!(!build_one(&store).shielded);

        store.clinical_events = Table::new(vec![snomed(1, "2020-04-01", "1300561000000107", None)]);
        assert!(build_one(&store).shielded);

        store.clinical_events = Table::new(vec![
            snomed(1, "2020-04-01", "1300561000000107", None),
            snomed(1, "2020-04-01", "1300591000000101", None),
        ]);
        assert!(!build_one(&store).shielded);

        // lowered risk before the latest high risk code
        store.clinical_events = Table::new(vec![
            snomed(1, "2020-04-01", "1300561000000107", None),
            snomed(1, "2020-05-01", "1300571000000100", None),
            snomed(1, "2020-06-01", "1300561000000107", None),
        ]);
        assert!(build_one(&store).shielded);
    }

    #[test]
    fn measurements() {
        let mut store = base_store();
        let sys = |day, value| ClinicalEvent {
            numeric_value: Some(value),
            ..ctv3(1, day, "2469.")
        };
        let (a, b, c) = (sys("2021-01-01", 150.), sys("2022-01-01", 120.), sys("2022-01-01", 130.));
        store.clinical_events = Table::new(vec![
            a,
            b,
            c,
            ClinicalEvent {
                numeric_value: Some(80.),
                ..ctv3(1, "2022-01-01", "246A.")
            },
            // BMI: implausible, too late, then valid
            snomed(1, "2005-01-01", "60621009", Some(2.)),
            snomed(1, "2011-01-01", "60621009", Some(30.)),
            snomed(1, "2008-01-01", "846931000000101", Some(25.5)),
        ]);
        let row = build_one(&store);
        assert_eq!(row.bp_sys_date_measured, Some(date("2022-01-01")));
        assert_eq!(row.bp_sys, Some(125.));
        assert_eq!(row.bp_dias, Some(80.));
        assert_eq!(row.bmi, Some(25.5));
        assert_eq!(row.bmi_date_measured, Some(date("2008-01-01")));
    }

    #[test]
    fn cis_window() {
        let mut store = base_store();
        store.ons_cis = Table::new(vec![CisVisit {
            patient_id: 1,
            visit_date: Some(date("2019-09-01")),
        }]);
        assert!(!build_one(&store).in_cis);
        store.ons_cis = Table::new(vec![CisVisit {
            patient_id: 1,
            visit_date: Some(date("2019-09-02")),
        }]);
        assert!(build_one(&store).in_cis);
    }

    #[test]
    fn csv_round_trip() {
        let mut store = base_store();
        store.clinical_events = Table::new(vec![ctv3(1, "2020-01-01", "G66..")]);
        let dataset = Dataset::build(&store, &lists(), &StudyConfig::default());
        assert_eq!(dataset[0].stroke, Some(date("2020-01-01")));

        let path = env::temp_dir().join(format!("dataset-test-{}.csv", process::id()));
        dataset.save(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        let loaded = Dataset::load(&path);
        fs::remove_file(&path).unwrap();

        assert!(written.starts_with("patient_id,in_cis,covid_vax,sex,age,"));
        assert!(written.contains(",female,62,60-69,Missing,F,T,T,T,"));
        assert_eq!(loaded.unwrap(), dataset);
        assert_eq!(
            dataset.count_by(|row| row.smoking_status),
            BTreeMap::from([(SmokingStatus::Missing, 1)])
        );
    }
}
