//! Run-scoped citations.

use serde::{Deserialize, Serialize};

/// A globally numbered source. Indices are 1-based and dense within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub index: usize,
    pub url: String,
    pub title: String,
}

/// The merged document plus its source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedReport {
    pub text: String,
    pub citations: Vec<Citation>,
}
