use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::AmuxError;
use crate::storage::selector_store::MAX_TOKEN_LEN;

/// Default readiness strategy.
pub const DEFAULT_POLLER: &str = "dupfd";

/// Configuration of one multiplexed stream.
///
/// Loaded from a JSON document:
/// ```text
/// { "file": "/run/amux/selector", "poller": "thread", "slaves": ["hw:0", "hw:1"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmuxConfig {
    /// Selector store path (mandatory).
    pub file: PathBuf,

    /// Readiness strategy looked up in the poller registry.
    #[serde(default = "default_poller")]
    pub poller: String,

    /// Optional ordered slave list. A numeric selector token indexes it.
    #[serde(default)]
    pub slaves: Vec<String>,

    /// Force rate resampling on both sides of the negotiation, so that a
    /// swap to a device with another native rate still succeeds.
    #[serde(default = "default_true")]
    pub force_resample: bool,
}

fn default_poller() -> String {
    DEFAULT_POLLER.to_string()
}

fn default_true() -> bool {
    true
}

impl AmuxConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            poller: default_poller(),
            slaves: Vec::new(),
            force_resample: true,
        }
    }

    pub fn with_poller(mut self, poller: &str) -> Self {
        self.poller = poller.to_string();
        self
    }

    pub fn validate(&self) -> Result<(), AmuxError> {
        if self.file.as_os_str().is_empty() {
            return Err(AmuxError::Config("missing selector file path".into()));
        }
        if self.poller.is_empty() {
            return Err(AmuxError::Config("empty poller name".into()));
        }
        for slave in &self.slaves {
            if slave.is_empty() || slave.len() > MAX_TOKEN_LEN {
                return Err(AmuxError::Config(format!("invalid slave name {:?}", slave)));
            }
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, AmuxError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AmuxError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AmuxError> {
        let json = fs::read_to_string(path)
            .map_err(|e| AmuxError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Map a selector token to a device identifier.
    pub fn resolve_token<'a>(&'a self, token: &'a str) -> &'a str {
        if self.slaves.is_empty() {
            return token;
        }
        match token.parse::<usize>() {
            Ok(idx) if idx < self.slaves.len() => &self.slaves[idx],
            _ => token,
        }
    }
}
