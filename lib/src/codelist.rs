use crate::{ArcStr, Result};
use once_cell::sync::Lazy;
use qu::ick_use::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map, BTreeMap},
    fmt, fs, ops,
    path::Path,
    str::FromStr,
    sync::Arc,
};

static CTV3: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.]{5}$").unwrap());
static SCTID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6,18}$").unwrap());

/// The terminology a codelist is drawn from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSystem {
    /// SNOMED CT concept IDs
    Snomed,
    /// Clinical Terms Version 3 (Read v3)
    Ctv3,
    /// Dictionary of medicines and devices
    Dmd,
}

impl CodeSystem {
    /// Check `code` is syntactically valid for this system.
    pub fn validate(self, code: &str) -> Result {
        let valid = match self {
            CodeSystem::Ctv3 => CTV3.is_match(code),
            // dm+d identifiers are SNOMED CT identifiers
            CodeSystem::Snomed | CodeSystem::Dmd => SCTID.is_match(code),
        };
        ensure!(valid, "\"{}\" is not a valid {} code", code, self);
        Ok(())
    }
}

impl FromStr for CodeSystem {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "snomed" | "snomedct" => Ok(CodeSystem::Snomed),
            "ctv3" => Ok(CodeSystem::Ctv3),
            "dmd" => Ok(CodeSystem::Dmd),
            _ => Err(format_err!("didn't recognise code system \"{}\"", input)),
        }
    }
}

impl fmt::Display for CodeSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CodeSystem::Snomed => "SNOMED CT",
            CodeSystem::Ctv3 => "CTV3",
            CodeSystem::Dmd => "dm+d",
        })
    }
}

/// A set of codes from one terminology, optionally each with a category.
///
/// Cheap to clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codelist {
    system: CodeSystem,
    codes: Arc<BTreeMap<ArcStr, Option<ArcStr>>>,
}

impl Codelist {
    /// A codelist without categories. Duplicates will be removed.
    pub fn new<S: AsRef<str>>(system: CodeSystem, codes: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for code in codes {
            let code = code.as_ref().trim();
            system.validate(code)?;
            map.insert(ArcStr::from(code), None);
        }
        Ok(Self::from_map(system, map))
    }

    /// A codelist where every code has a category. For a repeated code the first category is
    /// kept.
    pub fn categorised<S: AsRef<str>>(
        system: CodeSystem,
        codes: impl IntoIterator<Item = (S, S)>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (code, category) in codes {
            let code = code.as_ref().trim();
            system.validate(code)?;
            map.entry(ArcStr::from(code))
                .or_insert_with(|| Some(ArcStr::from(category.as_ref().trim())));
        }
        Ok(Self::from_map(system, map))
    }

    /// A codelist with no codes in it.
    pub fn empty(system: CodeSystem) -> Self {
        Self::from_map(system, BTreeMap::new())
    }

    fn from_map(system: CodeSystem, codes: BTreeMap<ArcStr, Option<ArcStr>>) -> Self {
        Self {
            system,
            codes: Arc::new(codes),
        }
    }

    /// Load a codelist from a csv file with a header row.
    ///
    /// Codes are read from `column`, and categories from `category_column` if given. Rows with
    /// an empty code are skipped.
    pub fn from_csv(
        path: impl AsRef<Path>,
        system: CodeSystem,
        column: &str,
        category_column: Option<&str>,
    ) -> Result<Self> {
        fn inner(
            path: &Path,
            system: CodeSystem,
            column: &str,
            category_column: Option<&str>,
        ) -> Result<Codelist> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_reader(fs::File::open(path)?);
            let headers = reader.headers()?.clone();
            let find = |name: &str| {
                headers
                    .iter()
                    .position(|h| h == name)
                    .ok_or_else(|| format_err!("no column named \"{}\"", name))
            };
            let code_idx = find(column)?;
            let category_idx = category_column.map(find).transpose()?;

            let mut codes = BTreeMap::new();
            for (line, record) in reader.records().enumerate() {
                let record = record?;
                let code = match record.get(code_idx) {
                    Some(code) if !code.is_empty() => code,
                    _ => continue,
                };
                system
                    .validate(code)
                    .with_context(|| format!("on data row {}", line + 1))?;
                let category = category_idx
                    .and_then(|idx| record.get(idx))
                    .filter(|cat| !cat.is_empty())
                    .map(ArcStr::from);
                match codes.entry(ArcStr::from(code)) {
                    btree_map::Entry::Vacant(entry) => {
                        entry.insert(category);
                    }
                    btree_map::Entry::Occupied(entry) => {
                        if *entry.get() != category {
                            event!(
                                Level::WARN,
                                "code {} listed with categories {:?} and {:?} in \"{}\", keeping the first",
                                code,
                                entry.get(),
                                category,
                                path.display()
                            );
                        }
                    }
                }
            }
            Ok(Codelist::from_map(system, codes))
        }

        let path = path.as_ref();
        inner(path, system, column, category_column)
            .with_context(|| format!("loading codelist from file \"{}\"", path.display()))
    }

    pub fn system(&self) -> CodeSystem {
        self.system
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains_key(code)
    }

    /// The category of `code`, if it is in the list and has one.
    pub fn category(&self, code: &str) -> Option<&str> {
        self.codes.get(code)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// (code, category) pairs, in code order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> + '_ {
        self.codes
            .iter()
            .map(|(code, cat)| (&**code, cat.as_deref()))
    }

    /// All the codes from both lists. Where a code is in both, the category from `self` is kept.
    pub fn union(&self, other: &Codelist) -> Result<Self> {
        ensure!(
            self.system == other.system,
            "cannot combine a {} codelist with a {} codelist",
            self.system,
            other.system
        );
        let mut codes = (*self.codes).clone();
        for (code, cat) in other.codes.iter() {
            codes.entry(code.clone()).or_insert_with(|| cat.clone());
        }
        Ok(Self::from_map(self.system, codes))
    }

    /// The codes whose category passes the predicate. Uncategorised codes never pass.
    pub fn with_categories(&self, f: impl Fn(&str) -> bool) -> Self {
        let codes = self
            .codes
            .iter()
            .filter(|(_, cat)| matches!(cat, Some(cat) if f(cat)))
            .map(|(code, cat)| (code.clone(), cat.clone()))
            .collect();
        Self::from_map(self.system, codes)
    }
}

/// Subtraction for `Codelist`s is defined as the 'set minus' operation, i.e. A - B := the set of
/// all codes that are in A but *not* in B
impl ops::Sub<&Codelist> for &Codelist {
    type Output = Codelist;
    fn sub(self, rhs: &Codelist) -> Self::Output {
        let codes = self
            .codes
            .iter()
            .filter(|(code, _)| !rhs.contains(code))
            .map(|(code, cat)| (code.clone(), cat.clone()))
            .collect();
        Codelist::from_map(self.system, codes)
    }
}

impl fmt::Display for Codelist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut codes = self.codes.keys();
        if let Some(code) = codes.next() {
            write!(f, "{}", code)?;
        }
        for code in codes {
            write!(f, ", {}", code)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::{CodeSystem, Codelist};
    use std::{env, fs, process};

    #[test]
    fn validation() {
        assert!(CodeSystem::Ctv3.validate("XaPbt").is_ok());
        assert!(CodeSystem::Ctv3.validate("2469.").is_ok());
        assert!(CodeSystem::Ctv3.validate("2469").is_err());
        assert!(CodeSystem::Snomed.validate("60621009").is_ok());
        assert!(CodeSystem::Snomed.validate("846931000000101").is_ok());
        assert!(CodeSystem::Snomed.validate("XaPbt").is_err());
        assert!(CodeSystem::Dmd.validate("12345").is_err());
        assert!(Codelist::new(CodeSystem::Ctv3, ["XaPbt", "bad"]).is_err());
    }

    #[test]
    fn set_operations() {
        let a = Codelist::new(CodeSystem::Ctv3, ["XaPbt", "Xaeze"]).unwrap();
        let b = Codelist::new(CodeSystem::Ctv3, ["Xaezd", "XaPbt"]).unwrap();
        let both = a.union(&b).unwrap();
        assert_eq!(both.len(), 3);
        assert!(both.contains("Xaezd"));
        assert_eq!(both.to_string(), "{XaPbt, Xaezd, Xaeze}");
        assert_eq!((&both - &a).to_string(), "{Xaezd}");

        let sct = Codelist::new(CodeSystem::Snomed, ["60621009"]).unwrap();
        assert!(a.union(&sct).is_err());
    }

    #[test]
    fn csv_with_categories() {
        let path = env::temp_dir().join(format!("codelist-test-{}.csv", process::id()));
        fs::write(
            &path,
            "CTV3Code,Description,Category\n\
             137R.,Current smoker,S\n\
             137L.,Current non-smoker,N\n\
             ,blank row,\n\
             137S.,Ex smoker,E\n\
             137R.,Current smoker again,N\n",
        )
        .unwrap();
        let list = Codelist::from_csv(&path, CodeSystem::Ctv3, "CTV3Code", Some("Category"));
        fs::remove_file(&path).unwrap();
        let list = list.unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.category("137R."), Some("S"));
        assert_eq!(list.category("137L."), Some("N"));
        assert_eq!(list.category("XXXXX"), None);
        let ever = list.with_categories(|cat| matches!(cat, "S" | "E"));
        assert_eq!(ever.to_string(), "{137R., 137S.}");
    }

    #[test]
    fn csv_missing_column() {
        let path = env::temp_dir().join(format!("codelist-missing-{}.csv", process::id()));
        fs::write(&path, "code,term\n60621009,BMI\n").unwrap();
        let list = Codelist::from_csv(&path, CodeSystem::Snomed, "snomedcode", None);
        fs::remove_file(&path).unwrap();
        assert!(list.is_err());
    }
}
