//! Firmware version identifiers.
//!
//! The vendor spells versions as `V<major>.<minor>.<patch> build <YYMMDD>`,
//! e.g. `V5.7.9 build 220520`. The version triple and the build date are
//! searched independently, so they are kept as separate fields.

use crate::error::{Error, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Build codes are two-digit years in this century
const BUILD_CENTURY: &str = "20";

/// The `(major, minor, patch)` part of a version.
///
/// Derived ordering is lexicographic, which is the order the candidate
/// generator descends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionTriple {
    /// Major component
    pub major: u32,
    /// Minor component
    pub minor: u32,
    /// Patch component
    pub patch: u32,
}

impl VersionTriple {
    /// Creates a new triple
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Number of triples between this one and `0.0.0` when each component is
    /// stepped down independently, inclusive of both ends.
    pub fn descent_len(&self) -> u64 {
        (u64::from(self.major) + 1) * (u64::from(self.minor) + 1) * (u64::from(self.patch) + 1)
    }

    /// The next lower triple in descending enumeration order.
    ///
    /// Components roll over to their value in `ceiling` rather than to an
    /// unbounded maximum, so the search never climbs above the starting
    /// minor or patch number.
    pub fn step_down(&self, ceiling: &VersionTriple) -> Option<VersionTriple> {
        if self.patch > 0 {
            Some(Self::new(self.major, self.minor, self.patch - 1))
        } else if self.minor > 0 {
            Some(Self::new(self.major, self.minor - 1, ceiling.patch))
        } else if self.major > 0 {
            Some(Self::new(self.major - 1, ceiling.minor, ceiling.patch))
        } else {
            None
        }
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A complete version identifier: triple plus build date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionBuild {
    /// Version triple
    pub triple: VersionTriple,
    /// Build date
    pub build_date: NaiveDate,
}

impl VersionBuild {
    /// Creates a new version identifier
    pub const fn new(triple: VersionTriple, build_date: NaiveDate) -> Self {
        Self { triple, build_date }
    }

    /// The build date as the vendor's six-digit `YYMMDD` code
    pub fn build_code(&self) -> String {
        format_build_code(self.build_date)
    }
}

impl fmt::Display for VersionBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} build {}", self.triple, self.build_code())
    }
}

impl FromStr for VersionBuild {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = version_pattern().captures(s).ok_or_else(|| {
            Error::invalid_version(s, "expected 'V<major>.<minor>.<patch> build <YYMMDD>'")
        })?;

        let component = |i: usize| -> Result<u32> {
            caps[i].parse().map_err(|_| {
                Error::invalid_version(s, format!("component '{}' overflows", &caps[i]))
            })
        };
        let triple = VersionTriple::new(component(1)?, component(2)?, component(3)?);

        let build = &caps[4];
        let build_date = parse_build_code(build)
            .ok_or_else(|| Error::invalid_version(s, format!("bad build code '{}'", build)))?;

        Ok(Self::new(triple, build_date))
    }
}

impl Serialize for VersionBuild {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionBuild {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*V([0-9]+)\.([0-9]+)\.([0-9]+)\s+build\s+([0-9]{6})\s*$")
            .expect("version pattern is valid")
    })
}

/// Parses a six-digit `YYMMDD` build code
pub fn parse_build_code(code: &str) -> Option<NaiveDate> {
    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{BUILD_CENTURY}{code}"), "%Y%m%d").ok()
}

/// Formats a date as a six-digit `YYMMDD` build code
pub fn format_build_code(date: NaiveDate) -> String {
    date.format("%y%m%d").to_string()
}
