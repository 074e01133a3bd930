//! Authoritative parts recount
//!
//! What the store reports through ListParts, not what the workers collected,
//! decides whether completion may start.

use super::UploadError;
use crate::s3::CompletedPart;
use std::collections::BTreeSet;

/// Distinct part numbers the store holds for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsRegistry {
    parts: BTreeSet<u32>,
}

impl PartsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a ListParts response; repeated numbers collapse.
    pub fn from_listing<I>(part_numbers: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        Self {
            parts: part_numbers.into_iter().collect(),
        }
    }

    /// Register a part number. Returns `false` if it was already present.
    pub fn insert(&mut self, part_number: u32) -> bool {
        self.parts.insert(part_number)
    }

    pub fn contains(&self, part_number: u32) -> bool {
        self.parts.contains(&part_number)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Part numbers in `1..=total_parts` the store does not report
    pub fn missing(&self, total_parts: u32) -> Vec<u32> {
        (1..=total_parts).filter(|n| !self.contains(*n)).collect()
    }

    /// Completion precondition: exactly the numbers `1..=total_parts`.
    pub fn ensure_complete(&self, total_parts: u32) -> Result<(), UploadError> {
        let found = u32::try_from(self.len()).unwrap_or(u32::MAX);
        let in_range = self.parts.iter().all(|n| (1..=total_parts).contains(n));

        if found == total_parts && in_range {
            Ok(())
        } else {
            Err(UploadError::PartCountMismatch {
                expected: total_parts,
                found,
            })
        }
    }
}

/// Order parts for CompleteMultipartUpload, keeping the first ETag seen for a
/// repeated part number.
pub fn completion_order(parts: Vec<CompletedPart>) -> Vec<CompletedPart> {
    let mut seen = PartsRegistry::new();
    let mut ordered: Vec<CompletedPart> = parts
        .into_iter()
        .filter(|part| seen.insert(part.part_number))
        .collect();
    ordered.sort_by_key(|part| part.part_number);
    ordered
}
