//! Runner configuration

use crate::error::{InkError, Result};
use crate::runtime::debug::DebugConfig;
use serde::{Deserialize, Serialize};

/// Settings applied to a runner when it is created or restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Seed for `RANDOM`, shuffles and `LIST_RANDOM`. Unset means seeded
    /// from the clock.
    pub seed: Option<u64>,
    /// Run ahead after each newline to resolve glue.
    pub lookahead: bool,
    /// Debug logging
    pub debug: DebugConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: std::env::var("INKVM_SEED").ok().and_then(|s| s.parse().ok()),
            lookahead: true,
            debug: DebugConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn without_lookahead(mut self) -> Self {
        self.lookahead = false;
        self
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| InkError::invalid_state(format!("invalid runner config: {e}")))
    }

    pub(crate) fn initial_seed(&self) -> u64 {
        self.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_defaults() {
        let config = RunnerConfig::from_json(r#"{ "seed": 7, "lookahead": false }"#).unwrap();
        assert_eq!(config.seed, Some(7));
        assert!(!config.lookahead);
        assert_eq!(config.initial_seed(), 7);
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            RunnerConfig::from_json("{ seed: }"),
            Err(InkError::InvalidState { .. })
        ));
    }

    #[test]
    fn builders_chain() {
        let config = RunnerConfig::default().with_seed(3).without_lookahead();
        assert_eq!(config.seed, Some(3));
        assert!(!config.lookahead);
    }
}
