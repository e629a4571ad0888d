//! Target probability estimator
//!
//! Scores, on a 0-100 scale, how likely a story is to drift into a hidden
//! target concept. Two independent signals are blended:
//!
//! ```text
//! logprob presence   short continuation, top-20 per position,
//!                    max P(token ~ target) × amplification
//! model estimate     "reply with an integer 0-100"
//!
//! score = clamp(0.6 × presence + 0.4 × estimate, 0, 100)
//! ```
//!
//! The weights and the ×200 amplification are empirical tuning parameters
//! with no derivation; they live in [`EstimatorConfig`].

use crate::model_query::{Message, ModelQuery, ModelResponse, SamplingParams};
use crate::targets::TargetConcept;
use crate::{LabError, Result};
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Estimator tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub logprob_weight: f64,
    pub estimate_weight: f64,
    /// Multiplier bringing raw token probabilities (usually far below 0.5)
    /// into the 0-100 range
    pub amplification: f64,
    pub continuation_tokens: u32,
    pub continuation_top_logprobs: u8,
    pub continuation_temperature: f32,
    pub estimate_temperature: f32,
    /// Output budget for the numeric self-estimate reply
    pub estimate_max_tokens: u32,
    /// Horizon the self-estimate question asks about, in tokens
    pub estimate_horizon_tokens: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            logprob_weight: 0.6,
            estimate_weight: 0.4,
            amplification: 200.0,
            continuation_tokens: 5,
            continuation_top_logprobs: 20,
            continuation_temperature: 0.2,
            estimate_temperature: 0.3,
            estimate_max_tokens: 8,
            estimate_horizon_tokens: 20,
        }
    }
}

/// Weighted blend of the two signals, clamped to [0, 100]
pub fn blend(logprob_signal: f64, estimate_signal: f64, config: &EstimatorConfig) -> f64 {
    let combined =
        config.logprob_weight * logprob_signal + config.estimate_weight * estimate_signal;
    clamp_percent(combined)
}

#[inline]
fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Logprob-presence signal over every position and candidate of a response.
///
/// Returns the maximum linear probability of any token matching a variation,
/// times `amplification`. A response without log-probabilities scores 0.
pub fn logprob_presence_signal(
    response: &ModelResponse,
    target: &TargetConcept,
    amplification: f64,
) -> f64 {
    let Some(positions) = response.token_logprobs.as_ref() else {
        return 0.0;
    };
    let variations = target.variations();

    let mut best = 0.0f64;
    for position in positions {
        let sampled = std::iter::once((position.token.as_str(), position.logprob));
        let alternatives = position
            .top_logprobs
            .iter()
            .map(|t| (t.token.as_str(), t.logprob));

        for (token, logprob) in sampled.chain(alternatives) {
            if !target.matches_token(token, &variations) {
                continue;
            }
            let p = logprob.exp();
            if p.is_finite() && p > best {
                best = p;
            }
        }
    }

    best * amplification
}

fn number_regex() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("Invalid number regex"))
}

/// Parse the first number of a self-estimate reply.
///
/// Non-numeric replies and values outside [0, 100] are `MalformedEstimate`.
pub fn parse_estimate(text: &str) -> Result<f64> {
    let malformed = || LabError::MalformedEstimate(text.chars().take(80).collect());

    let found = number_regex().find(text).ok_or_else(malformed)?;
    let value: f64 = found.as_str().parse().map_err(|_| malformed())?;
    if !(0.0..=100.0).contains(&value) {
        return Err(malformed());
    }
    Ok(value)
}

/// Per-signal breakdown of one estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    pub probability: f64,
    /// `None` when the logprob path failed
    pub logprob_signal: Option<f64>,
    /// `None` when the estimate query failed
    pub estimate_signal: Option<f64>,
}

/// Seam between the steering session and whatever produces probabilities
pub trait ProbabilityEstimator {
    /// Probability (0-100) that `target` shows up in the continuation of `context`
    fn estimate(&mut self, context: &str, target: &str) -> Result<f64>;
}

impl<F> ProbabilityEstimator for F
where
    F: FnMut(&str, &str) -> Result<f64>,
{
    fn estimate(&mut self, context: &str, target: &str) -> Result<f64> {
        self(context, target)
    }
}

/// Dual-signal estimator backed by a model
pub struct TargetProbabilityEstimator<M> {
    model: M,
    config: EstimatorConfig,
}

impl<M: ModelQuery> TargetProbabilityEstimator<M> {
    pub fn new(model: M) -> Self {
        Self::with_config(model, EstimatorConfig::default())
    }

    pub fn with_config(model: M, config: EstimatorConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    fn continuation_messages(context: &str) -> Vec<Message> {
        vec![
            Message::system(
                "Continue the story naturally. Write only the continuation, no commentary.",
            ),
            Message::user(context),
        ]
    }

    fn estimate_messages(&self, context: &str, target: &str) -> Vec<Message> {
        vec![
            Message::system(
                "You estimate probabilities. \
                 Reply with a single integer from 0 to 100 and nothing else.",
            ),
            Message::user(format!(
                "Story so far:\n{context}\n\nIf this story continued naturally, how likely is it \
                 that the concept \"{target}\" appears within the next {} tokens? \
                 Reply with one integer from 0 to 100.",
                self.config.estimate_horizon_tokens
            )),
        ]
    }

    /// Logprob-presence signal for the current context.
    ///
    /// A continuation without a log-probability payload is `DataUnavailable`,
    /// never a presence of 0.
    pub fn query_logprob_signal(&mut self, context: &str, target: &TargetConcept) -> Result<f64> {
        let params = SamplingParams::text(
            self.config.continuation_temperature,
            self.config.continuation_tokens,
        )
        .with_logprobs(self.config.continuation_top_logprobs);
        let response = self
            .model
            .query(&Self::continuation_messages(context), &params)?;
        if response.token_logprobs.as_ref().map_or(true, |p| p.is_empty()) {
            return Err(LabError::DataUnavailable(
                "continuation carried no logprobs".to_string(),
            ));
        }
        Ok(logprob_presence_signal(
            &response,
            target,
            self.config.amplification,
        ))
    }

    /// Raw self-estimate reply parsed into a number
    pub fn query_estimate_signal(&mut self, context: &str, target: &str) -> Result<f64> {
        let params = SamplingParams::text(
            self.config.estimate_temperature,
            self.config.estimate_max_tokens,
        );
        let messages = self.estimate_messages(context, target);
        let response = self.model.query(&messages, &params)?;
        parse_estimate(&response.text)
    }

    /// Run both signals and combine them, degrading to whichever survives.
    pub fn estimate_detailed(&mut self, context: &str, target: &str) -> Result<Estimate> {
        let concept = TargetConcept::new(target);

        let logprob = match self.query_logprob_signal(context, &concept) {
            Ok(signal) => Some(signal),
            Err(e) if e.is_fatal_for_query() => return Err(e),
            Err(e) => {
                warn!("logprob signal unavailable, using model estimate only: {e}");
                None
            }
        };

        let estimate = match self.query_estimate_signal(context, target) {
            Ok(value) => Ok(value),
            Err(LabError::MalformedEstimate(reply)) => {
                debug!("unparseable estimate {reply:?}, counting as 0");
                if logprob.is_none() {
                    return Err(LabError::DataUnavailable(
                        "no usable probability signal".to_string(),
                    ));
                }
                Ok(0.0)
            }
            Err(e) => Err(e),
        };

        let (probability, estimate_signal) = match (logprob, estimate) {
            (Some(lp), Ok(est)) => (blend(lp, est, &self.config), Some(est)),
            (None, Ok(est)) => (clamp_percent(est), Some(est)),
            (_, Err(e)) if e.is_fatal_for_query() => return Err(e),
            (Some(lp), Err(e)) => {
                warn!("model estimate unavailable, using logprob signal only: {e}");
                (clamp_percent(lp), None)
            }
            (None, Err(e)) => return Err(e),
        };

        debug!(
            "estimate for {target:?}: {probability:.1} (logprob {:?}, model {:?})",
            logprob, estimate_signal
        );

        Ok(Estimate {
            probability,
            logprob_signal: logprob,
            estimate_signal,
        })
    }
}

impl<M: ModelQuery> ProbabilityEstimator for TargetProbabilityEstimator<M> {
    fn estimate(&mut self, context: &str, target: &str) -> Result<f64> {
        self.estimate_detailed(context, target).map(|e| e.probability)
    }
}
