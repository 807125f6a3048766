//! Configuration file loader.

use super::error::{ConfigError, ConfigResult};
use super::types::Settings;
use crate::modules::waf::RuleStore;
use std::path::Path;

/// Reads `tollgate.toml` and the rule store it points to.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Create a loader
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Load and validate settings from `path`.
    ///
    /// A relative `rules.path` is resolved against the directory of `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`], [`ConfigError::Read`], or any error of
    /// [`ConfigLoader::load_str`].
    pub fn load<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Settings> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = self.load_str(&content)?;
        if let (Some(rules), Some(dir)) = (&settings.rules.path, path.parent()) {
            if rules.is_relative() {
                settings.rules.path = Some(dir.join(rules));
            }
        }
        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] on malformed TOML, [`ConfigError::Invalid`]
    /// when the inspection settings are inconsistent.
    pub fn load_str(&self, content: &str) -> ConfigResult<Settings> {
        let settings: Settings = toml::from_str(content)?;
        self.validate(&settings)?;
        Ok(settings)
    }

    fn validate(&self, settings: &Settings) -> ConfigResult<()> {
        settings
            .waf
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Like [`ConfigLoader::load`], but a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Any error of [`ConfigLoader::load`] other than `NotFound`.
    pub fn load_or_default<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Settings> {
        let path = path.as_ref();
        if path.exists() {
            self.load(path)
        } else {
            Ok(Settings::default())
        }
    }

    /// Load the rule store named by `settings`, or an empty store when none
    /// is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Rules`] if the store cannot be read or
    /// parsed.
    pub fn load_rules(&self, settings: &Settings) -> ConfigResult<RuleStore> {
        match &settings.rules.path {
            Some(path) => RuleStore::load(path).map_err(|e| ConfigError::Rules {
                path: path.clone(),
                message: e.to_string(),
            }),
            None => Ok(RuleStore::new()),
        }
    }

    /// Write `settings` as TOML.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Serialize`] or [`ConfigError::Write`].
    pub fn save<P: AsRef<Path>>(&self, settings: &Settings, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(settings)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
