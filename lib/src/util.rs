use crate::ArcStr;
use serde::{de, Deserialize, Deserializer, Serializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    let s = s.trim();
    if s.eq_ignore_ascii_case("null") || s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s.into()))
    }
}

/// Parse the boolean spellings found in extracts: `1`/`0`, `T`/`F`, `true`/`false`.
///
/// Empty and "null" map to `None`.
pub fn optional_flag<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    parse_flag(s).map_err(de::Error::custom)
}

fn parse_flag(s: &str) -> Result<Option<bool>, String> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    match s {
        "1" => Ok(Some(true)),
        "0" => Ok(Some(false)),
        _ if s.eq_ignore_ascii_case("t") || s.eq_ignore_ascii_case("true") => Ok(Some(true)),
        _ if s.eq_ignore_ascii_case("f") || s.eq_ignore_ascii_case("false") => Ok(Some(false)),
        _ => Err(format!("expected a boolean flag, found \"{}\"", s)),
    }
}

/// Write `true` as `T` and `false` as `F`.
pub fn flag_tf<S>(value: &bool, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(if *value { "T" } else { "F" })
}

/// Like `flag_tf`, with `None` written as an empty field.
pub fn optional_flag_tf<S>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(true) => s.serialize_str("T"),
        Some(false) => s.serialize_str("F"),
        None => s.serialize_str(""),
    }
}

/// Read back a column written with `flag_tf`.
pub fn flag<'de, D>(d: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let s: &str = Deserialize::deserialize(d)?;
    match parse_flag(s) {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err(de::Error::custom("expected a boolean flag, found an empty field")),
        Err(e) => Err(de::Error::custom(e)),
    }
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}
