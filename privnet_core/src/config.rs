//! Runtime configuration for the codec and KEM.
//!
//! Layers, later overriding earlier: defaults, an optional TOML file, then
//! `PRIVNET_*` environment variables. Command-line flags are applied by the
//! binary on top of the result.

use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::codec::check_scale;
use crate::error::{PrivNetError, Result};
use crate::preset::SecurityLevel;
use crate::rng::{ConfiguredRng, configured_rng};

pub const ENV_SCALE: &str = "PRIVNET_SCALE";
pub const ENV_SEED: &str = "PRIVNET_SEED";
pub const ENV_SECURITY_LEVEL: &str = "PRIVNET_SECURITY_LEVEL";

pub const DEFAULT_SCALE: f64 = 256.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    pub scale: f64,
    /// Fixes every random draw; for tests and reproducible demos only.
    pub seed: Option<u64>,
    pub security_level: SecurityLevel,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            seed: None,
            security_level: SecurityLevel::default(),
        }
    }
}

impl CodecConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| PrivNetError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| PrivNetError::Config(format!("reading {}: {err}", path.display())))?;
        debug!("config loaded from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlays values from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SCALE) {
            self.scale = raw
                .trim()
                .parse()
                .map_err(|_| PrivNetError::Config(format!("{ENV_SCALE}={raw} is not a number")))?;
        }
        if let Some(raw) = lookup(ENV_SEED) {
            self.seed = Some(raw.trim().parse().map_err(|_| {
                PrivNetError::Config(format!("{ENV_SEED}={raw} is not an unsigned integer"))
            })?);
        }
        if let Some(raw) = lookup(ENV_SECURITY_LEVEL) {
            self.security_level = raw.trim().parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        check_scale(self.scale)
    }

    pub fn rng(&self) -> ConfiguredRng {
        configured_rng(self.seed)
    }
}
