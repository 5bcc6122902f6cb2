//! Research units and what they produce.

use serde::{Deserialize, Serialize};

/// Lifecycle of one research unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// One delegated sub-question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchUnit {
    pub id: String,
    /// Zero-based delegation round that created this unit.
    pub round: u32,
    pub sub_question: String,
    pub status: UnitStatus,
    /// Why the unit failed, for logs and snapshots only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ResearchUnit {
    /// `ordinal` is the unit's position in the workflow's creation order.
    pub fn new(round: u32, ordinal: usize, sub_question: impl Into<String>) -> Self {
        Self {
            id: format!("r{round}-u{ordinal}"),
            round,
            sub_question: sub_question.into(),
            status: UnitStatus::Pending,
            failure: None,
        }
    }

    /// Build one round of units, numbering from `first_ordinal`.
    pub fn batch(round: u32, first_ordinal: usize, questions: Vec<String>) -> Vec<Self> {
        questions
            .into_iter()
            .enumerate()
            .map(|(i, q)| Self::new(round, first_ordinal + i, q))
            .collect()
    }
}

/// A source a unit relied on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
}

impl SourceRef {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Findings of a completed unit.
///
/// `raw_findings` may contain local markers `[k]`, where `k` is the 1-based
/// position of a source in `citations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: String,
    pub raw_findings: String,
    pub citations: Vec<SourceRef>,
    #[serde(default)]
    pub tokens_used: u64,
}
