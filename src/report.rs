//! Validation error records and the report that accumulates them.
//!
//! Every validation returns records instead of mutating shared state; the
//! orchestrator merges them into one [`ValidationReport`] per run.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Attribute used to build record selector queries for arcs.
pub const SEGMENT_ID_FIELD: &str = "segment_id";
/// Attribute used to build record selector queries for meshblock polygons.
pub const MESHBLOCK_ID_FIELD: &str = "meshblock_id";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub code: String,
    pub description: String,
    /// Sorted, deduplicated.
    pub affected_ids: Vec<String>,
    /// Predicate expression selecting the affected records.
    pub query: Option<String>,
}

impl ValidationRecord {
    /// Build a record over arc ids. Returns `None` when nothing is affected.
    pub fn for_segments<I>(code: &str, description: &str, ids: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        Self::with_field(code, description, ids, SEGMENT_ID_FIELD)
    }

    pub fn with_field<I>(code: &str, description: &str, ids: I, field: &str) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let affected_ids: Vec<String> = ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if affected_ids.is_empty() {
            return None;
        }
        let query = Some(selector_query(field, &affected_ids));
        Some(Self {
            code: code.to_string(),
            description: description.to_string(),
            affected_ids,
            query,
        })
    }

    /// Replace the selector with one spanning a wider id set, e.g. a dangle plus
    /// the arcs it nearly touches.
    pub fn with_query_ids<'a, I>(mut self, field: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let ids: Vec<String> = ids
            .into_iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.query = Some(selector_query(field, &ids));
        self
    }
}

/// `field in ('a','b')`
pub fn selector_query(field: &str, ids: &[String]) -> String {
    format!(
        "{} in ({})",
        field,
        ids.iter().map(|id| format!("'{}'", id)).join(",")
    )
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    records: Vec<ValidationRecord>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ValidationRecord) {
        self.records.push(record);
    }

    pub fn extend<I: IntoIterator<Item = ValidationRecord>>(&mut self, records: I) {
        self.records.extend(records);
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn by_code(&self, code: &str) -> Option<&ValidationRecord> {
        self.records.iter().find(|r| r.code == code)
    }

    /// Every id that appears in any record.
    pub fn affected_ids(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .flat_map(|r| r.affected_ids.iter().map(String::as_str))
            .collect()
    }
}
