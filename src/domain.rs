use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QcError;

/// Studies that share one sample and clinical id space but register
/// separate global ids (`{study}_{clinical_id}`).
pub const PAIRED_STUDIES: (&str, &str) = ("PPMI-N", "PPMI-G");

/// Returns the partner of a paired study.
pub fn paired_study(study: &str) -> Option<&'static str> {
    match study {
        s if s == PAIRED_STUDIES.0 => Some(PAIRED_STUDIES.1),
        s if s == PAIRED_STUDIES.1 => Some(PAIRED_STUDIES.0),
        _ => None,
    }
}

/// Rewrites `{from}_rest` into `{to}_rest`.
pub fn swap_study_prefix(global_id: &str, from: &str, to: &str) -> Option<String> {
    global_id
        .strip_prefix(from)
        .and_then(|rest| rest.strip_prefix('_'))
        .map(|rest| format!("{to}_{rest}"))
}

/// Study code embedded in a global identifier (text before the first `_`).
pub fn study_of(global_id: &str) -> &str {
    global_id.split('_').next().unwrap_or(global_id)
}

/// Submission batch id `m{n}`, n >= 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManifestId(u32);

impl ManifestId {
    pub fn new(number: u32) -> Result<Self, QcError> {
        if number == 0 {
            return Err(QcError::InvalidManifestId("m0".to_string()));
        }
        Ok(Self(number))
    }

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl FromStr for ManifestId {
    type Err = QcError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_numbered(value, 'm')
            .map(Self)
            .ok_or_else(|| QcError::InvalidManifestId(value.to_string()))
    }
}

/// Orders replicate tags `s1 < s2 < s10`; other labels sort last.
pub fn replicate_sort_key(label: &str) -> (u32, String) {
    match parse_numbered(label, 's') {
        Some(n) => (n, String::new()),
        None => (u32::MAX, label.to_string()),
    }
}

fn parse_numbered(value: &str, prefix: char) -> Option<u32> {
    let digits = value.trim().strip_prefix(prefix)?;
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|n| *n > 0)
}

/// One registry identity: the study-local id and its two global partners.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleTriple {
    pub sample_id: String,
    #[serde(rename = "GP2sampleID")]
    pub global_id: String,
    pub clinical_id: String,
}

impl SampleTriple {
    pub fn new(
        sample_id: impl Into<String>,
        global_id: impl Into<String>,
        clinical_id: impl Into<String>,
    ) -> Self {
        Self {
            sample_id: sample_id.into(),
            global_id: global_id.into(),
            clinical_id: clinical_id.into(),
        }
    }
}

/// A triple tagged with its study, as submitted to `add_samples`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySample {
    pub study: String,
    #[serde(flatten)]
    pub triple: SampleTriple,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_manifest_id() {
        let mid: ManifestId = "m12".parse().unwrap();
        assert_eq!(mid.number(), 12);
        assert_eq!(mid.next().to_string(), "m13");
        assert_matches!("m0".parse::<ManifestId>(), Err(QcError::InvalidManifestId(_)));
        assert_matches!("12".parse::<ManifestId>(), Err(QcError::InvalidManifestId(_)));
        assert_matches!("mx".parse::<ManifestId>(), Err(QcError::InvalidManifestId(_)));
    }

    #[test]
    fn replicate_ordering_is_numeric() {
        let mut tags = vec!["s10", "s2", "s1"];
        tags.sort_by_key(|tag| replicate_sort_key(tag));
        assert_eq!(tags, vec!["s1", "s2", "s10"]);
    }

    #[test]
    fn paired_prefix_swap() {
        assert_eq!(paired_study("PPMI-N"), Some("PPMI-G"));
        assert_eq!(paired_study("PPMI"), None);
        assert_eq!(
            swap_study_prefix("PPMI-G_C1", "PPMI-G", "PPMI-N").as_deref(),
            Some("PPMI-N_C1")
        );
        assert_eq!(swap_study_prefix("PPMI-GX_C1", "PPMI-G", "PPMI-N"), None);
        assert_eq!(study_of("ABC_000123_s1"), "ABC");
    }
}
