//! Plugin and runner lifecycle presets.
//!
//! The stage list every plugin or runner instance passes through when it is
//! loaded, and the intents used to serialize operations on one instance.

use crate::stages::StageManagerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage of the instance loading lifecycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleStage {
    /// Set all data that can be read directly from the preset.
    SetMetadata,
    /// Build indices and check constraints.
    InitializeDatabase,
    /// Set all data derived from the preset and all other instances.
    SetDerivedData,
    /// Validate a plugin installation.
    ValidatePlugin,
    /// Activate a runner in autostart mode.
    ActivateRunner,
}

impl LifecycleStage {
    /// Every lifecycle stage, in execution order.
    pub const ALL: [Self; 5] = [
        Self::SetMetadata,
        Self::InitializeDatabase,
        Self::SetDerivedData,
        Self::ValidatePlugin,
        Self::ActivateRunner,
    ];

    /// Returns the stage name used in stage manager configurations.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SetMetadata => "setMetadata",
            Self::InitializeDatabase => "initializeDatabase",
            Self::SetDerivedData => "setDerivedData",
            Self::ValidatePlugin => "validatePlugin",
            Self::ActivateRunner => "activateRunner",
        }
    }

    /// Returns true if a failure in this stage fails every waiting job.
    ///
    /// A runner that fails to activate does not take the other instances down
    /// with it.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        !matches!(self, Self::ActivateRunner)
    }

    /// Looks a stage up by its configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a lifecycle task intends to do with an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleIntent {
    /// Install a plugin.
    Install,
    /// Uninstall a plugin.
    Uninstall,
    /// Update a plugin.
    Update,
    /// Start a runner.
    Start,
    /// Stop a runner.
    Stop,
}

impl fmt::Display for LifecycleIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
            Self::Update => write!(f, "update"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

impl StageManagerConfig {
    /// The lifecycle preset: every [`LifecycleStage`] in order, with
    /// `activateRunner` non-critical.
    #[must_use]
    pub fn lifecycle() -> Self {
        Self::new(LifecycleStage::ALL.iter().map(LifecycleStage::as_str)).with_non_critical(
            LifecycleStage::ALL
                .iter()
                .filter(|stage| !stage.is_critical())
                .map(LifecycleStage::as_str),
        )
    }
}
