//! Stage manager configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The ordered stage list a stage manager drives its jobs through.
///
/// Stages not listed in `non_critical_stages` are critical: a failure in one
/// of them fails every job waiting behind the same barrier transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageManagerConfig {
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// Stages whose failures only fail the job that raised them.
    #[serde(default)]
    pub non_critical_stages: Vec<String>,
}

impl StageManagerConfig {
    /// Creates a configuration where every stage is critical.
    #[must_use]
    pub fn new(stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            non_critical_stages: Vec::new(),
        }
    }

    /// Marks stages as non-critical.
    #[must_use]
    pub fn with_non_critical(mut self, stages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.non_critical_stages
            .extend(stages.into_iter().map(Into::into));
        self
    }

    /// Deserializes and validates a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Malformed`] if the value does not have the
    /// configuration's shape, or any error [`StageManagerConfig::validate`] reports.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the stage is marked non-critical.
    #[must_use]
    pub fn is_non_critical(&self, stage: &str) -> bool {
        self.non_critical_stages.iter().any(|s| s == stage)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage list is empty, contains empty or
    /// duplicate names, or if a non-critical stage is not in the stage list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.trim().is_empty() {
                return Err(ConfigError::EmptyStageName);
            }
            if !seen.insert(stage.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.clone()));
            }
        }

        if let Some(unknown) = self
            .non_critical_stages
            .iter()
            .find(|s| !seen.contains(s.as_str()))
        {
            return Err(ConfigError::UnknownNonCriticalStage(unknown.clone()));
        }

        Ok(())
    }
}
