//! Routing decision for a request.

use serde::{Deserialize, Serialize};

/// How a request is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Simple,
    Complex,
    Rubbish,
    Multitopic,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Simple => "simple",
            Category::Complex => "complex",
            Category::Rubbish => "rubbish",
            Category::Multitopic => "multitopic",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Category::Simple),
            "complex" => Ok(Category::Complex),
            "rubbish" => Ok(Category::Rubbish),
            "multitopic" | "multi_topic" | "multi-topic" => Ok(Category::Multitopic),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Structured classifier output. Immutable once recorded on a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub canonical_request: String,
    pub needs_interrupt: bool,
    pub rationale: String,
    /// Sub-questions the analyzer proposed, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_questions: Vec<String>,
}

impl Classification {
    /// Safe default used when the classifier is unavailable or malformed.
    pub fn fallback(raw_request: &str) -> Self {
        Self {
            category: Category::Complex,
            canonical_request: raw_request.trim().to_string(),
            needs_interrupt: false,
            rationale: "classifier output unavailable; defaulting to complex".to_string(),
            sub_questions: Vec::new(),
        }
    }

    /// Whether a human must approve the plan before delegation.
    pub fn requires_interrupt(&self) -> bool {
        self.needs_interrupt || self.category == Category::Multitopic
    }
}
