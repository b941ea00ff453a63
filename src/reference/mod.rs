//! Reference Module - Human-readable record number generation
//!
//! Patients get `PAT-YYYYMMDD-NNNN`, prescriptions `RX-YYYYMMDD-NNNN`.
//! Candidates carry a random 4-digit suffix; uniqueness is enforced by the
//! store at insert time, and callers retry with a fresh candidate up to the
//! generator's attempt bound before failing.

use chrono::{NaiveDate, Utc};
use rand::Rng;

/// Suffixes available per prefix and day.
const SUFFIX_SPACE: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Patient,
    Prescription,
}

impl ReferenceKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ReferenceKind::Patient => "PAT",
            ReferenceKind::Prescription => "RX",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReferenceGenerator {
    max_attempts: u32,
    suffix_space: u32,
}

impl ReferenceGenerator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            suffix_space: SUFFIX_SPACE,
        }
    }

    /// Narrow the suffix space. Collision and exhaustion behavior becomes
    /// deterministic with a space of 1.
    pub fn with_suffix_space(mut self, suffix_space: u32) -> Self {
        self.suffix_space = suffix_space.clamp(1, SUFFIX_SPACE);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// One fresh candidate for today's date.
    pub fn candidate(&self, kind: ReferenceKind) -> String {
        self.candidate_for(kind, Utc::now().date_naive())
    }

    /// One fresh candidate for an explicit date.
    pub fn candidate_for(&self, kind: ReferenceKind, date: NaiveDate) -> String {
        let suffix = rand::thread_rng().gen_range(0..self.suffix_space);
        format!("{}-{}-{:04}", kind.prefix(), date.format("%Y%m%d"), suffix)
    }
}

impl Default for ReferenceGenerator {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_patient_candidate_pattern() {
        let gen = ReferenceGenerator::new(5);
        let pattern = Regex::new(r"^PAT-\d{8}-\d{4}$").unwrap();
        for _ in 0..50 {
            let candidate = gen.candidate(ReferenceKind::Patient);
            assert!(pattern.is_match(&candidate), "bad candidate: {}", candidate);
        }
    }

    #[test]
    fn test_prescription_candidate_pattern() {
        let gen = ReferenceGenerator::new(5);
        let pattern = Regex::new(r"^RX-\d{8}-\d{4}$").unwrap();
        assert!(pattern.is_match(&gen.candidate(ReferenceKind::Prescription)));
    }

    #[test]
    fn test_candidate_embeds_date() {
        let gen = ReferenceGenerator::new(5);
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let candidate = gen.candidate_for(ReferenceKind::Patient, date);
        assert!(candidate.starts_with("PAT-20260307-"));
    }

    #[test]
    fn test_narrowed_space_is_deterministic() {
        let gen = ReferenceGenerator::new(3).with_suffix_space(1);
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert_eq!(gen.candidate_for(ReferenceKind::Prescription, date), "RX-20260101-0000");
        assert_eq!(gen.max_attempts(), 3);
    }
}
