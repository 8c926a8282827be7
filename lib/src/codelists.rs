//! The codelists used by the study.
//!
//! Most lists are published OpenSAFELY codelists, read from csv files in the codelists directory.
//! A few short lists are written out here.
use crate::{CodeSystem, Codelist, Result};
use qu::ick_use::*;
use std::path::Path;

/// Where to find a codelist, and how to read it.
#[derive(Debug, Copy, Clone)]
pub struct CodelistFile {
    pub name: &'static str,
    pub file: &'static str,
    pub system: CodeSystem,
    pub column: &'static str,
    pub category_column: Option<&'static str>,
}

impl CodelistFile {
    pub fn load(&self, dir: &Path) -> Result<Codelist> {
        Codelist::from_csv(
            dir.join(self.file),
            self.system,
            self.column,
            self.category_column,
        )
    }
}

macro_rules! codelist_files {
    (@cat) => { None };
    (@cat $cat:literal) => { Some($cat) };
    ($($ident:ident = $name:literal, $file:literal, $system:ident, $column:literal $(, $cat:literal)?;)*) => {
        $(
            pub const $ident: CodelistFile = CodelistFile {
                name: $name,
                file: $file,
                system: CodeSystem::$system,
                column: $column,
                category_column: codelist_files!(@cat $($cat)?),
            };
        )*

        /// Every codelist read from file.
        pub const ALL: &[CodelistFile] = &[$($ident),*];
    };
}

codelist_files! {
    ETHNICITY = "ethnicity", "opensafely-ethnicity-snomed-0removed.csv", Snomed, "snomedcode", "Grouping_6";
    CLEAR_SMOKING = "clear_smoking", "opensafely-smoking-clear.csv", Ctv3, "CTV3Code", "Category";
    DIABETES = "diabetes", "opensafely-diabetes.csv", Ctv3, "CTV3ID";
    HYPERTENSION = "hypertension", "opensafely-hypertension.csv", Ctv3, "CTV3ID";
    COPD = "copd", "opensafely-current-copd.csv", Ctv3, "CTV3ID";
    OTHER_RESPIRATORY = "other_respiratory", "opensafely-other-respiratory-conditions.csv", Ctv3, "CTV3ID";
    ASTHMA = "asthma", "opensafely-asthma-diagnosis.csv", Ctv3, "CTV3ID";
    CHRONIC_RESPIRATORY_DISEASE = "chronic_respiratory_disease", "opensafely-chronic-respiratory-disease.csv", Ctv3, "CTV3ID";
    PREDNISOLONE = "prednisolone", "opensafely-asthma-oral-prednisolone-medication.csv", Dmd, "snomed_id";
    LUNG_CANCER = "lung_cancer", "opensafely-lung-cancer.csv", Ctv3, "CTV3ID";
    HAEM_CANCER = "haem_cancer", "opensafely-haematological-cancer.csv", Ctv3, "CTV3ID";
    OTHER_CANCER = "other_cancer", "opensafely-cancer-excluding-lung-and-haematological.csv", Ctv3, "CTV3ID";
    HIV = "hiv", "opensafely-hiv.csv", Ctv3, "CTV3ID";
    PERMANENT_IMMUNE = "permanent_immune", "opensafely-permanent-immunosuppression.csv", Ctv3, "CTV3ID";
    SICKLE_CELL = "sickle_cell", "opensafely-sickle-cell-disease.csv", Ctv3, "CTV3ID";
    ASPLENIA = "asplenia", "opensafely-asplenia.csv", Ctv3, "CTV3ID";
    TEMPORARY_IMMUNE = "temporary_immune", "opensafely-temporary-immunosuppression.csv", Ctv3, "CTV3ID";
    ORGAN_TRANSPLANT = "organ_transplant", "opensafely-solid-organ-transplantation.csv", Ctv3, "CTV3ID";
    APLASTIC_ANAEMIA = "aplastic_anaemia", "opensafely-aplastic-anaemia.csv", Ctv3, "CTV3ID";
    ATRIAL_FIBRILLATION = "atrial_fibrillation", "opensafely-atrial-fibrillation-clinical-finding.csv", Ctv3, "CTV3Code";
    PERIPHERAL_ARTERIAL_DISEASE = "peripheral_arterial_disease", "opensafely-peripheral-arterial-disease.csv", Ctv3, "code";
    HEART_FAILURE = "heart_failure", "opensafely-heart-failure.csv", Ctv3, "CTV3ID";
    MYOCARDIAL_INFARCTION = "myocardial_infarction", "opensafely-myocardial-infarction.csv", Ctv3, "CTV3ID";
    VENOUS_THROMBOEMBOLISM = "venous_thromboembolism", "opensafely-venous-thromboembolic-disease.csv", Ctv3, "CTV3Code";
    CHRONIC_CARDIAC_DISEASE = "chronic_cardiac_disease", "opensafely-chronic-cardiac-disease.csv", Ctv3, "CTV3ID";
    STROKE = "stroke", "opensafely-stroke-updated.csv", Ctv3, "CTV3ID";
    TIA = "tia", "opensafely-transient-ischaemic-attack.csv", Ctv3, "code";
    DEMENTIA = "dementia", "opensafely-dementia-complete.csv", Ctv3, "code";
    CHRONIC_LIVER_DISEASE = "chronic_liver_disease", "opensafely-chronic-liver-disease.csv", Ctv3, "CTV3ID";
    OTHER_NEUROLOGICAL = "other_neurological", "opensafely-other-neurological-conditions.csv", Ctv3, "CTV3ID";
    RHEUMATOID_ARTHRITIS = "rheumatoid_arthritis", "opensafely-rheumatoid-arthritis.csv", Ctv3, "CTV3ID";
    SLE = "sle", "opensafely-systemic-lupus-erythematosus-sle.csv", Ctv3, "CTV3ID";
    PSORIASIS = "psoriasis", "opensafely-psoriasis.csv", Ctv3, "code";
    DIALYSIS = "dialysis", "opensafely-dialysis.csv", Ctv3, "CTV3ID";
    CREATININE = "creatinine", "user-bangzheng-creatinine-value.csv", Snomed, "code";
}

/// Look up a file codelist by its short name.
pub fn find(name: &str) -> Option<&'static CodelistFile> {
    ALL.iter().find(|file| file.name == name)
}

/// All the codelists the dataset needs.
///
/// `cancer` and `permanent_immunodeficiency` are unions of several published lists, and
/// `ever_smoked` is part of one.
#[derive(Debug, Clone)]
pub struct StudyCodelists {
    pub ethnicity: Codelist,
    pub high_risk: Codelist,
    pub not_high_risk: Codelist,
    pub clear_smoking: Codelist,
    /// The current and ex-smoker codes from `clear_smoking`.
    pub ever_smoked: Codelist,
    pub systolic_blood_pressure: Codelist,
    pub diastolic_blood_pressure: Codelist,
    pub hba1c_new: Codelist,
    pub hba1c_old: Codelist,
    pub bmi: Codelist,
    pub diabetes: Codelist,
    pub hypertension: Codelist,
    pub copd: Codelist,
    pub other_respiratory: Codelist,
    pub asthma: Codelist,
    pub chronic_respiratory_disease: Codelist,
    pub prednisolone: Codelist,
    /// Lung cancer and cancers other than lung or haematological.
    pub cancer: Codelist,
    pub haem_cancer: Codelist,
    /// HIV, permanent immunosuppression and sickle cell disease.
    pub permanent_immunodeficiency: Codelist,
    pub asplenia: Codelist,
    pub temporary_immune: Codelist,
    pub organ_transplant: Codelist,
    pub aplastic_anaemia: Codelist,
    pub atrial_fibrillation: Codelist,
    pub peripheral_arterial_disease: Codelist,
    pub heart_failure: Codelist,
    pub myocardial_infarction: Codelist,
    pub venous_thromboembolism: Codelist,
    pub chronic_cardiac_disease: Codelist,
    pub stroke: Codelist,
    pub tia: Codelist,
    pub dementia: Codelist,
    pub chronic_liver_disease: Codelist,
    pub other_neurological: Codelist,
    pub rheumatoid_arthritis: Codelist,
    pub sle: Codelist,
    pub psoriasis: Codelist,
    pub dialysis: Codelist,
    pub creatinine: Codelist,
}

impl StudyCodelists {
    /// Load the codelists from csv files in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let this = Self::build(|file| file.load(dir))?;
        event!(
            Level::INFO,
            "loaded {} codelists from \"{}\"",
            ALL.len(),
            dir.display()
        );
        Ok(this)
    }

    /// Build the codelists, getting each file-based list from `source`.
    pub fn build(mut source: impl FnMut(&CodelistFile) -> Result<Codelist>) -> Result<Self> {
        let clear_smoking = source(&CLEAR_SMOKING)?;
        Ok(StudyCodelists {
            ethnicity: source(&ETHNICITY)?,
            high_risk: Codelist::new(CodeSystem::Snomed, ["1300561000000107"])?,
            not_high_risk: Codelist::new(
                CodeSystem::Snomed,
                ["1300591000000101", "1300571000000100"],
            )?,
            ever_smoked: clear_smoking.with_categories(|cat| matches!(cat, "S" | "E")),
            clear_smoking,
            systolic_blood_pressure: Codelist::new(CodeSystem::Ctv3, ["2469."])?,
            diastolic_blood_pressure: Codelist::new(CodeSystem::Ctv3, ["246A."])?,
            hba1c_new: Codelist::new(CodeSystem::Ctv3, ["XaPbt", "Xaeze", "Xaezd"])?,
            hba1c_old: Codelist::new(CodeSystem::Ctv3, ["X772q", "XaERo", "XaERp"])?,
            bmi: Codelist::new(CodeSystem::Snomed, ["60621009", "846931000000101"])?,
            diabetes: source(&DIABETES)?,
            hypertension: source(&HYPERTENSION)?,
            copd: source(&COPD)?,
            other_respiratory: source(&OTHER_RESPIRATORY)?,
            asthma: source(&ASTHMA)?,
            chronic_respiratory_disease: source(&CHRONIC_RESPIRATORY_DISEASE)?,
            prednisolone: source(&PREDNISOLONE)?,
            cancer: source(&LUNG_CANCER)?.union(&source(&OTHER_CANCER)?)?,
            haem_cancer: source(&HAEM_CANCER)?,
            permanent_immunodeficiency: source(&HIV)?
                .union(&source(&PERMANENT_IMMUNE)?)?
                .union(&source(&SICKLE_CELL)?)?,
            asplenia: source(&ASPLENIA)?,
            temporary_immune: source(&TEMPORARY_IMMUNE)?,
            organ_transplant: source(&ORGAN_TRANSPLANT)?,
            aplastic_anaemia: source(&APLASTIC_ANAEMIA)?,
            atrial_fibrillation: source(&ATRIAL_FIBRILLATION)?,
            peripheral_arterial_disease: source(&PERIPHERAL_ARTERIAL_DISEASE)?,
            heart_failure: source(&HEART_FAILURE)?,
            myocardial_infarction: source(&MYOCARDIAL_INFARCTION)?,
            venous_thromboembolism: source(&VENOUS_THROMBOEMBOLISM)?,
            chronic_cardiac_disease: source(&CHRONIC_CARDIAC_DISEASE)?,
            stroke: source(&STROKE)?,
            tia: source(&TIA)?,
            dementia: source(&DEMENTIA)?,
            chronic_liver_disease: source(&CHRONIC_LIVER_DISEASE)?,
            other_neurological: source(&OTHER_NEUROLOGICAL)?,
            rheumatoid_arthritis: source(&RHEUMATOID_ARTHRITIS)?,
            sle: source(&SLE)?,
            psoriasis: source(&PSORIASIS)?,
            dialysis: source(&DIALYSIS)?,
            creatinine: source(&CREATININE)?,
        })
    }

    /// The study codelists with every file-based list empty.
    ///
    /// Useful as a starting point when only a few lists matter.
    pub fn empty() -> Result<Self> {
        Self::build(|file| Ok(Codelist::empty(file.system)))
    }
}

#[cfg(test)]
mod test {
    use super::{find, StudyCodelists, ALL};
    use crate::{CodeSystem, Codelist};

    #[test]
    fn names_are_unique() {
        for (idx, file) in ALL.iter().enumerate() {
            assert!(
                ALL[idx + 1..].iter().all(|other| other.name != file.name),
                "duplicate codelist name {}",
                file.name
            );
        }
        assert_eq!(find("dementia").map(|f| f.column), Some("code"));
        assert!(find("nonsense").is_none());
    }

    #[test]
    fn unions_are_built() {
        let lists = StudyCodelists::build(|file| match file.name {
            "lung_cancer" => Codelist::new(CodeSystem::Ctv3, ["B22.."]),
            "other_cancer" => Codelist::new(CodeSystem::Ctv3, ["B1...", "B22.."]),
            "hiv" => Codelist::new(CodeSystem::Ctv3, ["A788."]),
            "sickle_cell" => Codelist::new(CodeSystem::Ctv3, ["D1040"]),
            _ => Ok(Codelist::empty(file.system)),
        })
        .unwrap();
        assert_eq!(lists.cancer.to_string(), "{B1..., B22..}");
        assert_eq!(lists.permanent_immunodeficiency.len(), 2);
        assert!(lists.haem_cancer.is_empty());
        assert!(lists.hba1c_new.contains("Xaezd"));

        let empty = StudyCodelists::empty().unwrap();
        assert!(empty.diabetes.is_empty());
        assert_eq!(empty.prednisolone.system(), CodeSystem::Dmd);
    }

    #[test]
    fn mismatched_systems_fail() {
        let lists = StudyCodelists::build(|file| match file.name {
            "other_cancer" => Codelist::new(CodeSystem::Snomed, ["254637007"]),
            _ => Ok(Codelist::empty(file.system)),
        });
        assert!(lists.is_err());
    }
}
