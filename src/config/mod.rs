//! Configuration management for the remote relations worker tree.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation

mod model;
mod watcher;
pub use model::*;
pub use watcher::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Environment variable prefix, e.g. `REMOTE_RELATIONS__MODEL__UUID`.
pub(crate) const ENV_PREFIX: &str = "REMOTE_RELATIONS";

/// Main configuration container for the remote relations worker
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RemoteRelationsConfig {
    /// Identity of the local model
    #[serde(default)]
    pub model: ModelConfig,

    /// Watch stream and change channel tuning
    #[serde(default)]
    pub watcher: WatcherConfig,
}

impl Debug for RemoteRelationsConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RemoteRelationsConfig")
            .field("model", &self.model)
            .field("watcher", &self.watcher)
            .finish()
    }
}

impl RemoteRelationsConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `REMOTE_RELATIONS__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so that callers can apply further overrides via
    /// `with_override_config()`. Call `validate()` before handing the
    /// configuration to a worker.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("REMOTE_RELATIONS__MODEL__UUID", "deadbeef");
    /// let cfg = RemoteRelationsConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.model.validate()?;
        self.watcher.validate()?;
        Ok(self)
    }
}
