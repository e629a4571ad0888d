//! # logprob-lab
//!
//! Next-token prediction games over a hosted language model.
//!
//! The crate turns raw top-k log-probabilities into something a player can
//! reason about, and measures how far a short nudge moves a story toward a
//! hidden concept.
//!
//! ## Pipelines
//!
//! ```text
//! Mode 1 (guessing)
//!   ModelQuery (1 token, top-k logprobs)
//!       ↓
//!   TokenDistribution   dedupe " and"/"and", exp(logprob), dense ranks
//!       ↓
//!   CandidateSelector   chosen + mid/low/very-low decoys, shuffled
//!
//! Mode 2 (steering)
//!   nudge → context
//!       ↓
//!   TargetProbabilityEstimator   0.6 × logprob presence + 0.4 × self-estimate
//!       ↓
//!   SteeringSession     history, feedback, Won / Exhausted
//! ```
//!
//! ## Example
//!
//! ```rust
//! use logprob_lab::{TokenDistribution, TopLogprob};
//!
//! let entries = vec![
//!     TopLogprob::new(" and", -0.1),
//!     TopLogprob::new("and", -0.1),
//!     TopLogprob::new(" but", -2.0),
//! ];
//! let dist = TokenDistribution::normalize(&entries, " and", Some(-0.1));
//! assert_eq!(dist.len(), 2);
//! assert_eq!(dist.chosen().rank, 1);
//! ```

// --- Global Allocator: mimalloc (Microsoft's high-performance allocator) ---
#[cfg(not(target_env = "msvc"))]
use mimalloc::MiMalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod config;
pub mod model_query;

// Mode 1: next-token guessing
pub mod candidate_selector;
pub mod guessing_game;
pub mod token_distribution;
pub mod word_filter;

// Mode 2: target steering
pub mod narration;
pub mod steering_session;
pub mod target_estimator;
pub mod targets;

#[cfg(feature = "openai")]
pub mod openai_client;

pub use candidate_selector::{CandidateSelector, RankBand, RankBands, RoundOptions, OPTION_COUNT};
pub use config::LabConfig;
pub use guessing_game::{GuessOutcome, GuessingConfig, GuessingGame, GuessingRound, Scoreboard};
pub use model_query::{
    Message, ModelQuery, ModelResponse, Role, SamplingParams, ScriptedModel, TokenLogprob,
    TopLogprob,
};
pub use narration::{analyze_session, continue_story};
pub use steering_session::{
    FeedbackClass, NudgeOutcome, PendingNudge, SessionConfig, SessionId, SessionState,
    SessionSummary, SteeringSession,
};
pub use target_estimator::{
    blend, logprob_presence_signal, parse_estimate, Estimate, EstimatorConfig,
    ProbabilityEstimator, TargetProbabilityEstimator,
};
pub use targets::{TargetConcept, KNOWN_TARGETS, OPENING_LINES};
pub use token_distribution::{TokenCandidate, TokenDistribution};
pub use word_filter::{is_pure_punctuation, is_valid_word, HeuristicWordValidator, WordValidator};

#[cfg(feature = "openai")]
pub use openai_client::OpenAiClient;

use thiserror::Error;

/// Error types for logprob-lab operations
#[derive(Error, Debug)]
pub enum LabError {
    /// The model response carried no log-probability payload.
    #[error("Log-probability data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Rate limited by model provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Numeric self-estimate could not be parsed. Absorbed by the estimator.
    #[error("Malformed probability estimate: {0:?}")]
    MalformedEstimate(String),

    #[error("Insufficient candidates: found {found}, need {required}")]
    InsufficientCandidates { found: usize, required: usize },

    #[error("Model transport error: {0}")]
    Transport(String),

    #[error("Nudge is empty")]
    EmptyNudge,

    #[error("Nudge has {words} words, limit is {max}")]
    NudgeTooLong { words: usize, max: usize },

    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A response arrived for a session that has since been reset or advanced.
    #[error("Stale session: response discarded")]
    StaleSession,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LabError {
    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LabError::DataUnavailable(_)
                | LabError::RateLimited { .. }
                | LabError::InsufficientCandidates { .. }
                | LabError::Transport(_)
        )
    }

    /// Errors that must reach the player instead of being absorbed.
    pub fn is_fatal_for_query(&self) -> bool {
        matches!(self, LabError::RateLimited { .. } | LabError::AuthError(_))
    }
}

pub type Result<T> = std::result::Result<T, LabError>;
