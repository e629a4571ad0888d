//! Aggregated configuration
//!
//! Every field has a default, so a config file only needs the values it
//! overrides:
//!
//! ```json
//! { "estimator": { "amplification": 150.0 }, "session": { "max_turns": 8 } }
//! ```

use crate::candidate_selector::RankBands;
use crate::guessing_game::GuessingConfig;
use crate::steering_session::SessionConfig;
use crate::target_estimator::EstimatorConfig;
use crate::{LabError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub bands: RankBands,
    pub guessing: GuessingConfig,
    pub estimator: EstimatorConfig,
    pub session: SessionConfig,
}

impl LabConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LabConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        for (name, band) in [
            ("top", self.bands.top),
            ("mid", self.bands.mid),
            ("low", self.bands.low),
            ("very_low", self.bands.very_low),
        ] {
            if band.min == 0 || band.min > band.max {
                return Err(LabError::InvalidConfig(format!(
                    "rank band {name} is {}-{}",
                    band.min, band.max
                )));
            }
        }
        if self.guessing.top_logprobs == 0 {
            return Err(LabError::InvalidConfig("top_logprobs must be positive".to_string()));
        }
        if self.guessing.max_tokens == 0 || self.estimator.estimate_max_tokens == 0 {
            return Err(LabError::InvalidConfig("max_tokens must be positive".to_string()));
        }
        let est = &self.estimator;
        if est.logprob_weight < 0.0 || est.estimate_weight < 0.0 || est.amplification < 0.0 {
            return Err(LabError::InvalidConfig(
                "estimator weights and amplification must be non-negative".to_string(),
            ));
        }
        if self.session.max_turns == 0 || self.session.max_nudge_words == 0 {
            return Err(LabError::InvalidConfig(
                "session limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate_selector::RankBand;

    #[test]
    fn test_defaults_validate() {
        let config = LabConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.estimator.amplification, 200.0);
        assert_eq!(config.session.max_nudge_words, 6);
        assert_eq!(config.guessing.top_logprobs, 10);
    }

    #[test]
    fn test_partial_override() {
        let config = LabConfig::from_json_str(
            r#"{ "estimator": { "amplification": 150.0 }, "session": { "max_turns": 8 } }"#,
        )
        .unwrap();
        assert_eq!(config.estimator.amplification, 150.0);
        assert_eq!(config.estimator.logprob_weight, 0.6);
        assert_eq!(config.session.max_turns, 8);
        assert_eq!(config.session.max_nudge_words, 6);
        assert_eq!(config.bands.very_low, RankBand::new(20, 50));
    }

    #[test]
    fn test_invalid_band_rejected() {
        let result = LabConfig::from_json_str(r#"{ "bands": { "low": { "min": 15, "max": 6 } } }"#);
        assert!(matches!(result, Err(LabError::InvalidConfig(_))));
    }

    #[test]
    fn test_query_budgets_configurable() {
        let config = LabConfig::from_json_str(
            r#"{ "guessing": { "temperature": 0.5 }, "estimator": { "estimate_max_tokens": 12 } }"#,
        )
        .unwrap();
        assert_eq!(config.guessing.temperature, 0.5);
        assert_eq!(config.guessing.max_tokens, 1);
        assert_eq!(config.estimator.estimate_max_tokens, 12);

        let zero = LabConfig::from_json_str(r#"{ "guessing": { "max_tokens": 0 } }"#);
        assert!(matches!(zero, Err(LabError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            LabConfig::from_json_str("{ not json"),
            Err(LabError::Json(_))
        ));
    }

    #[test]
    fn test_pretty_json_roundtrip() {
        let config = LabConfig::default();
        let json = config.to_json_pretty().unwrap();
        assert_eq!(LabConfig::from_json_str(&json).unwrap(), config);
    }
}
