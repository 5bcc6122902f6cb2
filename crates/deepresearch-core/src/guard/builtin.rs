//! Guards that need no external backend.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::oracle::{GuardOracle, GuardResult, GuardVerdict};
use crate::config::{ConfigError, ConfigResult, GuardSettings};
use crate::domain::Role;

/// Blocks text containing any of a fixed list of terms.
///
/// Terms match case-insensitively on word boundaries.
pub struct DenylistOracle {
    name: String,
    pattern: Option<Regex>,
}

impl DenylistOracle {
    pub fn new<I, S>(terms: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| regex::escape(&t))
            .collect();

        let pattern = if alternatives.is_empty() {
            None
        } else {
            Some(
                RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
                    .case_insensitive(true)
                    .build()?,
            )
        };

        Ok(Self {
            name: "denylist".to_string(),
            pattern,
        })
    }

    /// The configured denylist, or `None` when no terms are set.
    pub fn from_settings(settings: &GuardSettings) -> ConfigResult<Option<Arc<dyn GuardOracle>>> {
        if settings.denylist.iter().all(|t| t.trim().is_empty()) {
            return Ok(None);
        }
        let oracle: Arc<dyn GuardOracle> = Arc::new(
            Self::new(&settings.denylist)
                .map_err(|e| ConfigError::Invalid(format!("guards.denylist: {e}")))?,
        );
        Ok(Some(oracle))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The first denied term found in `text`, if any.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern
            .as_ref()
            .and_then(|p| p.find(text))
            .map(|m| m.as_str())
    }
}

#[async_trait]
impl GuardOracle for DenylistOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, text: &str, _role: Role) -> GuardResult<GuardVerdict> {
        Ok(match self.find(text) {
            Some(term) => GuardVerdict::block(&self.name, format!("denied term: {term}")),
            None => GuardVerdict::pass(&self.name),
        })
    }
}
