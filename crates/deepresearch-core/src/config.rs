//! Engine configuration.
//!
//! Loaded from TOML, then overridden by `DEEPRESEARCH_*` environment
//! variables. Every section has defaults, so an empty file is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::search::SearchTopic;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    Env { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Units running at once within a round (K).
    pub max_concurrency: usize,
    /// Delegation rounds per workflow (R).
    pub max_rounds: u32,
    pub unit_timeout_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_rounds: 5,
            unit_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub timeout_secs: u64,
    /// User messages (including the current one) inspected by input guards.
    pub history_window: usize,
    /// Terms rejected by the built-in denylist guard.
    pub denylist: Vec<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            history_window: 10,
            denylist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub timeout_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// Which planner drives sub-question generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    #[default]
    Topic,
    Reasoning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    pub kind: PlannerKind,
    pub timeout_secs: u64,
    /// Sub-questions kept from one reasoning planner reply.
    pub max_sub_questions: usize,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Topic,
            timeout_secs: 60,
            max_sub_questions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Model invocations per unit before giving up.
    pub max_iterations: u32,
    pub reasoning_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub search_max_results: usize,
    pub search_topic: SearchTopic,
    /// Run fetched search content through the input guards.
    pub filter_search_content: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            reasoning_timeout_secs: 120,
            search_timeout_secs: 30,
            search_max_results: 1,
            search_topic: SearchTopic::General,
            filter_search_content: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptSettings {
    /// Seconds a proposal stays open. `None` never expires.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Tasks processed at once.
    pub max_inflight: usize,
    pub task_ttl_secs: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_inflight: 10,
            task_ttl_secs: 3600,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prior turns kept per thread.
    pub history_limit: usize,
    pub scheduler: SchedulerSettings,
    pub guards: GuardSettings,
    pub classifier: ClassifierSettings,
    pub planner: PlannerSettings,
    pub worker: WorkerSettings,
    pub interrupt: InterruptSettings,
    pub service: ServiceSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            scheduler: SchedulerSettings::default(),
            guards: GuardSettings::default(),
            classifier: ClassifierSettings::default(),
            planner: PlannerSettings::default(),
            worker: WorkerSettings::default(),
            interrupt: InterruptSettings::default(),
            service: ServiceSettings::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if given, apply process environment overrides, validate.
    pub fn resolve(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DEEPRESEARCH_*` overrides from `vars`. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("DEEPRESEARCH_") else {
                continue;
            };
            match name {
                "HISTORY_LIMIT" => self.history_limit = parse_env(&key, &value)?,
                "MAX_CONCURRENCY" => self.scheduler.max_concurrency = parse_env(&key, &value)?,
                "MAX_ROUNDS" => self.scheduler.max_rounds = parse_env(&key, &value)?,
                "UNIT_TIMEOUT_SECS" => self.scheduler.unit_timeout_secs = parse_env(&key, &value)?,
                "GUARD_TIMEOUT_SECS" => self.guards.timeout_secs = parse_env(&key, &value)?,
                "GUARD_HISTORY_WINDOW" => self.guards.history_window = parse_env(&key, &value)?,
                "DENYLIST" => {
                    self.guards.denylist = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                "CLASSIFIER_TIMEOUT_SECS" => {
                    self.classifier.timeout_secs = parse_env(&key, &value)?
                }
                "PLANNER" => {
                    self.planner.kind = match value.trim().to_ascii_lowercase().as_str() {
                        "topic" => PlannerKind::Topic,
                        "reasoning" => PlannerKind::Reasoning,
                        _ => {
                            return Err(ConfigError::Env {
                                key: key.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                "PLANNER_TIMEOUT_SECS" => self.planner.timeout_secs = parse_env(&key, &value)?,
                "PLANNER_MAX_SUB_QUESTIONS" => {
                    self.planner.max_sub_questions = parse_env(&key, &value)?
                }
                "MAX_ITERATIONS" => self.worker.max_iterations = parse_env(&key, &value)?,
                "REASONING_TIMEOUT_SECS" => {
                    self.worker.reasoning_timeout_secs = parse_env(&key, &value)?
                }
                "SEARCH_TIMEOUT_SECS" => self.worker.search_timeout_secs = parse_env(&key, &value)?,
                "SEARCH_MAX_RESULTS" => self.worker.search_max_results = parse_env(&key, &value)?,
                "SEARCH_TOPIC" => self.worker.search_topic = parse_env(&key, &value)?,
                "INTERRUPT_TTL_SECS" => {
                    self.interrupt.ttl_secs = match value.trim() {
                        "" | "none" => None,
                        v => Some(parse_env(&key, v)?),
                    }
                }
                "MAX_INFLIGHT" => self.service.max_inflight = parse_env(&key, &value)?,
                "TASK_TTL_SECS" => self.service.task_ttl_secs = parse_env(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject values that would stall or disable the pipeline.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks: [(&str, bool); 12] = [
            ("scheduler.max_concurrency", self.scheduler.max_concurrency > 0),
            ("scheduler.max_rounds", self.scheduler.max_rounds > 0),
            ("scheduler.unit_timeout_secs", self.scheduler.unit_timeout_secs > 0),
            ("guards.timeout_secs", self.guards.timeout_secs > 0),
            ("classifier.timeout_secs", self.classifier.timeout_secs > 0),
            ("planner.timeout_secs", self.planner.timeout_secs > 0),
            ("planner.max_sub_questions", self.planner.max_sub_questions > 0),
            ("worker.max_iterations", self.worker.max_iterations > 0),
            ("worker.reasoning_timeout_secs", self.worker.reasoning_timeout_secs > 0),
            ("worker.search_timeout_secs", self.worker.search_timeout_secs > 0),
            ("worker.search_max_results", self.worker.search_max_results > 0),
            ("service.max_inflight", self.service.max_inflight > 0),
        ];
        for (key, ok) in checks {
            if !ok {
                return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
            }
        }
        if self.interrupt.ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "interrupt.ttl_secs must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_secs(self.guards.timeout_secs)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier.timeout_secs)
    }

    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner.timeout_secs)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.unit_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_concurrency, 3);
        assert_eq!(config.scheduler.max_rounds, 5);
        assert_eq!(config.worker.max_iterations, 3);
        assert_eq!(config.service.task_ttl_secs, 3600);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [scheduler]
            max_concurrency = 2

            [worker]
            search_topic = "news"

            [interrupt]
            ttl_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.scheduler.max_rounds, 5);
        assert_eq!(config.worker.search_topic, SearchTopic::News);
        assert_eq!(config.interrupt.ttl_secs, Some(600));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_env([
                ("DEEPRESEARCH_MAX_CONCURRENCY".to_string(), "7".to_string()),
                ("DEEPRESEARCH_DENYLIST".to_string(), "foo, bar".to_string()),
                ("DEEPRESEARCH_PLANNER".to_string(), "reasoning".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();
        assert_eq!(config.scheduler.max_concurrency, 7);
        assert_eq!(config.guards.denylist, vec!["foo", "bar"]);
        assert_eq!(config.planner.kind, PlannerKind::Reasoning);
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_env([("DEEPRESEARCH_MAX_ROUNDS".to_string(), "many".to_string())])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deepresearch.toml");
        std::fs::write(&path, "history_limit = 4\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.history_limit, 4);
    }
}
