//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Tunables for parsing, evaluation and background scheduling.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Evaluation steps one cell may take before it settles to `#TIMEOUT!`.
    pub max_eval_steps: usize,

    /// Cells the background worker evaluates between cooperative yields.
    pub batch_size: usize,

    /// Longest formula text accepted by the parser, in bytes.
    pub max_formula_len: usize,

    /// Deepest parenthesis/function nesting accepted by the parser.
    pub max_nesting: usize,

    /// Name of the sheet every engine starts with.
    pub default_sheet: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_eval_steps: 100_000,
            batch_size: 256,
            max_formula_len: 8_192,
            max_nesting: 64,
            default_sheet: "Sheet1".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from JSON, filling in defaults, and validate it.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall evaluation.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_eval_steps == 0 {
            return Err(EngineError::Config("max_eval_steps must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Config("batch_size must be positive".into()));
        }
        if self.max_nesting == 0 {
            return Err(EngineError::Config("max_nesting must be positive".into()));
        }
        if self.default_sheet.trim().is_empty() {
            return Err(EngineError::Config("default_sheet must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"batch_size": 16}"#).unwrap();
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.max_eval_steps, EngineConfig::default().max_eval_steps);
        assert_eq!(config.default_sheet, "Sheet1");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = EngineConfig::from_json(r#"{"batch_size": 0}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(EngineError::Config(_))
        ));
    }
}
