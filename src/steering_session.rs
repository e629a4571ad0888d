//! Steering session
//!
//! One play-through of the target-steering game. The player appends short
//! nudges to a story; after each nudge the probability of the hidden target
//! is re-estimated and recorded.
//!
//! ```text
//! NotStarted ──start──▶ InProgress ──nudge (p ≥ 100)──▶ Won
//!                           │  ▲
//!                           │  └─nudge (turn < max)
//!                           ├──nudge (turn == max)──▶ Exhausted
//!                           └──give_up──────────────▶ Exhausted
//! ```
//!
//! A nudge is staged first and committed only after the estimate succeeds,
//! so a failed estimate leaves the session exactly as it was.

use crate::target_estimator::ProbabilityEstimator;
use crate::{LabError, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Feedback thresholds on the per-turn probability change
pub const STRONG_CHANGE: f64 = 15.0;
pub const SMALL_CHANGE: f64 = 5.0;

/// Probability at which the target counts as reached
pub const WIN_PROBABILITY: f64 = 100.0;

/// Session limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_turns: u32,
    pub max_nudge_words: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_nudge_words: 6,
        }
    }
}

/// Opaque session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    fn fresh() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    NotStarted,
    InProgress,
    Won,
    Exhausted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Won | SessionState::Exhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::NotStarted => "NotStarted",
            SessionState::InProgress => "InProgress",
            SessionState::Won => "Won",
            SessionState::Exhausted => "Exhausted",
        }
    }
}

/// Caller-facing classification of a probability change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackClass {
    StrongIncrease,
    SmallIncrease,
    Neutral,
    SmallDecrease,
    StrongDecrease,
}

impl FeedbackClass {
    pub fn classify(delta: f64) -> Self {
        match delta {
            d if d >= STRONG_CHANGE => FeedbackClass::StrongIncrease,
            d if d >= SMALL_CHANGE => FeedbackClass::SmallIncrease,
            d if d <= -STRONG_CHANGE => FeedbackClass::StrongDecrease,
            d if d <= -SMALL_CHANGE => FeedbackClass::SmallDecrease,
            _ => FeedbackClass::Neutral,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            FeedbackClass::StrongIncrease => "Big jump! The story is heading your way.",
            FeedbackClass::SmallIncrease => "A little closer.",
            FeedbackClass::Neutral => "Barely moved.",
            FeedbackClass::SmallDecrease => "Drifting away a little.",
            FeedbackClass::StrongDecrease => "That pushed the story well away from the target.",
        }
    }
}

/// Result of an accepted nudge
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NudgeOutcome {
    pub probability: f64,
    pub previous: f64,
    pub delta: f64,
    pub feedback: FeedbackClass,
    pub state: SessionState,
    pub turn: u32,
    pub turns_remaining: u32,
}

/// Validated nudge waiting for its probability estimate.
///
/// Produced by [`SteeringSession::begin_nudge`]; only the session and
/// generation that issued it will accept it back.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNudge {
    session: SessionId,
    generation: u64,
    nudge: String,
    context: String,
}

impl PendingNudge {
    /// Context the estimate must be computed on
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn nudge(&self) -> &str {
        &self.nudge
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// End-of-game snapshot for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: SessionId,
    pub hidden_target: String,
    pub state: SessionState,
    pub turns_used: u32,
    pub max_turns: u32,
    pub context: String,
    pub probability_history: Vec<f64>,
    pub nudge_history: Vec<String>,
    pub peak_probability: f64,
    pub final_probability: f64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Active game state, owned by one caller
#[derive(Debug, Clone, PartialEq)]
pub struct SteeringSession {
    id: SessionId,
    hidden_target: String,
    turn: u32,
    max_turns: u32,
    max_nudge_words: usize,
    context: String,
    probability_history: Vec<f64>,
    nudge_history: Vec<String>,
    state: SessionState,
    /// Bumped on every commit and reset; stale tickets compare against it
    generation: u64,
    started_at: Option<DateTime<Utc>>,
}

impl Default for SteeringSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SteeringSession {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            id: SessionId::fresh(),
            hidden_target: String::new(),
            turn: 0,
            max_turns: config.max_turns,
            max_nudge_words: config.max_nudge_words,
            context: String::new(),
            probability_history: Vec::new(),
            nudge_history: Vec::new(),
            state: SessionState::NotStarted,
            generation: 0,
            started_at: None,
        }
    }

    /// Begin play. Only valid from `NotStarted`.
    pub fn start(
        &mut self,
        hidden_target: &str,
        max_turns: u32,
        initial_context: &str,
    ) -> Result<()> {
        self.expect_state(SessionState::NotStarted)?;
        let target = hidden_target.trim();
        if target.is_empty() {
            return Err(LabError::InvalidConfig("hidden target is empty".to_string()));
        }
        if max_turns == 0 {
            return Err(LabError::InvalidConfig("max_turns must be positive".to_string()));
        }

        self.hidden_target = target.to_string();
        self.max_turns = max_turns;
        self.turn = 0;
        self.context = initial_context.trim().to_string();
        self.probability_history = vec![0.0];
        self.nudge_history.clear();
        self.state = SessionState::InProgress;
        self.generation += 1;
        self.started_at = Some(Utc::now());

        info!("session {} started, {} turns", self.id, max_turns);
        Ok(())
    }

    /// Abandon the current game and return to `NotStarted` under a new id.
    /// Pending nudges issued before the reset are rejected.
    pub fn reset(&mut self) {
        let generation = self.generation + 1;
        let max_nudge_words = self.max_nudge_words;
        *self = Self::with_config(SessionConfig {
            max_turns: self.max_turns,
            max_nudge_words,
        });
        self.generation = generation;
    }

    /// Validate a nudge and stage the context it would produce.
    ///
    /// Rejections leave the session untouched.
    pub fn begin_nudge(&self, text: &str) -> Result<PendingNudge> {
        self.expect_state(SessionState::InProgress)?;

        let nudge = text.trim();
        if nudge.is_empty() {
            return Err(LabError::EmptyNudge);
        }
        let words = nudge.split_whitespace().count();
        if words > self.max_nudge_words {
            return Err(LabError::NudgeTooLong {
                words,
                max: self.max_nudge_words,
            });
        }

        let context = if self.context.is_empty() {
            nudge.to_string()
        } else {
            format!("{} {}", self.context, nudge)
        };

        Ok(PendingNudge {
            session: self.id,
            generation: self.generation,
            nudge: nudge.to_string(),
            context,
        })
    }

    /// Commit a staged nudge with the estimate computed for it.
    ///
    /// An `Err` estimate or a stale ticket changes nothing.
    pub fn complete_nudge(
        &mut self,
        pending: PendingNudge,
        estimate: Result<f64>,
    ) -> Result<NudgeOutcome> {
        if pending.session != self.id || pending.generation != self.generation {
            warn!("discarding response for superseded session {}", pending.session);
            return Err(LabError::StaleSession);
        }
        self.expect_state(SessionState::InProgress)?;

        let probability = match estimate {
            Ok(p) if p.is_finite() => p.clamp(0.0, 100.0),
            Ok(p) => {
                return Err(LabError::DataUnavailable(format!(
                    "estimator returned non-finite probability {p}"
                )))
            }
            Err(e) => {
                warn!("estimate failed, turn {} not consumed: {e}", self.turn + 1);
                return Err(e);
            }
        };

        let previous = self.latest_probability();
        self.context = pending.context;
        self.nudge_history.push(pending.nudge);
        self.probability_history.push(probability);
        self.turn += 1;
        self.generation += 1;

        if probability >= WIN_PROBABILITY {
            self.state = SessionState::Won;
            info!("session {} won on turn {}", self.id, self.turn);
        } else if self.turn >= self.max_turns {
            self.state = SessionState::Exhausted;
            info!("session {} exhausted after {} turns", self.id, self.turn);
        }

        let delta = probability - previous;
        Ok(NudgeOutcome {
            probability,
            previous,
            delta,
            feedback: FeedbackClass::classify(delta),
            state: self.state,
            turn: self.turn,
            turns_remaining: self.turns_remaining(),
        })
    }

    /// Validate, estimate and commit a nudge in one step.
    pub fn submit_nudge<E>(&mut self, text: &str, estimator: &mut E) -> Result<NudgeOutcome>
    where
        E: ProbabilityEstimator + ?Sized,
    {
        let pending = self.begin_nudge(text)?;
        let estimate = estimator.estimate(pending.context(), &self.hidden_target);
        self.complete_nudge(pending, estimate)
    }

    /// End the game early, keeping the history as it stands.
    pub fn give_up(&mut self) -> Result<()> {
        self.expect_state(SessionState::InProgress)?;
        self.state = SessionState::Exhausted;
        self.generation += 1;
        info!("session {} abandoned on turn {}", self.id, self.turn);
        Ok(())
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LabError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn won(&self) -> bool {
        self.state == SessionState::Won
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn hidden_target(&self) -> &str {
        &self.hidden_target
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn turns_remaining(&self) -> u32 {
        self.max_turns.saturating_sub(self.turn)
    }

    pub fn max_nudge_words(&self) -> usize {
        self.max_nudge_words
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn probability_history(&self) -> &[f64] {
        &self.probability_history
    }

    pub fn nudge_history(&self) -> &[String] {
        &self.nudge_history
    }

    pub fn latest_probability(&self) -> f64 {
        self.probability_history.last().copied().unwrap_or(0.0)
    }

    pub fn summary(&self) -> SessionSummary {
        let peak = self
            .probability_history
            .iter()
            .copied()
            .fold(0.0f64, f64::max);
        SessionSummary {
            session: self.id,
            hidden_target: self.hidden_target.clone(),
            state: self.state,
            turns_used: self.turn,
            max_turns: self.max_turns,
            context: self.context.clone(),
            probability_history: self.probability_history.clone(),
            nudge_history: self.nudge_history.clone(),
            peak_probability: peak,
            final_probability: self.latest_probability(),
            started_at: self.started_at,
        }
    }
}
