//! Journal numbering: `<scheme>/<branch-code>/<YYYYMM>/<sequence>`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use fundledger_core::{DomainError, DomainResult, Period};

/// Counter key shared by every journal of one branch and month.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceKey(String);

impl SequenceKey {
    pub fn new(scheme: &str, branch_code: &str, date: NaiveDate) -> DomainResult<Self> {
        let scheme = scheme.trim();
        let branch_code = branch_code.trim();
        if scheme.is_empty() || scheme.contains('/') {
            return Err(DomainError::validation(format!(
                "invalid journal number scheme: {scheme:?}"
            )));
        }
        if branch_code.is_empty() || branch_code.contains('/') {
            return Err(DomainError::validation(format!(
                "invalid branch code for numbering: {branch_code:?}"
            )));
        }
        Ok(Self(format!(
            "{scheme}/{branch_code}/{}",
            Period::of(date).compact()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full journal number for an allocated sequence value (zero-padded to 4).
    pub fn number(&self, sequence: u32) -> String {
        format!("{}/{sequence:04}", self.0)
    }
}

impl core::fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a journal number back into its key and sequence.
pub fn parse_number(number: &str) -> Option<(SequenceKey, u32)> {
    let (key, sequence) = number.rsplit_once('/')?;
    if key.split('/').count() != 3 {
        return None;
    }
    let sequence = sequence.parse().ok()?;
    Some((SequenceKey(key.to_string()), sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_branch_month_and_padded_sequence() {
        let key = SequenceKey::new("JE", "HQ", NaiveDate::from_ymd_opt(2025, 1, 15).unwrap())
            .unwrap();
        assert_eq!(key.as_str(), "JE/HQ/202501");
        assert_eq!(key.number(7), "JE/HQ/202501/0007");
        assert_eq!(key.number(12345), "JE/HQ/202501/12345");
    }

    #[test]
    fn parse_round_trips() {
        let (key, sequence) = parse_number("JE/HQ/202501/0042").unwrap();
        assert_eq!(key.as_str(), "JE/HQ/202501");
        assert_eq!(sequence, 42);
        assert!(parse_number("JE/202501/0042").is_none());
        assert!(parse_number("JE/HQ/202501/abc").is_none());
    }

    #[test]
    fn rejects_separator_in_branch_code() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert!(SequenceKey::new("JE", "H/Q", date).is_err());
        assert!(SequenceKey::new("", "HQ", date).is_err());
    }
}
