//! Next-token guessing game
//!
//! Each round asks the model for exactly one token with its top-k
//! alternatives, normalizes them, and offers four options. After the guess
//! the model's real token is appended to the running text.

use crate::candidate_selector::{CandidateSelector, RoundOptions};
use crate::model_query::{Message, ModelQuery, SamplingParams};
use crate::token_distribution::{TokenCandidate, TokenDistribution};
use crate::word_filter::WordValidator;
use crate::{LabError, Result};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mode 1 query settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuessingConfig {
    /// Alternatives requested per position
    pub top_logprobs: u8,
    /// Queries per round before a degenerate round is reported
    pub max_attempts: u32,
    pub temperature: f32,
    /// Output budget per round; only the first position is scored
    pub max_tokens: u32,
}

impl Default for GuessingConfig {
    fn default() -> Self {
        Self {
            top_logprobs: 10,
            max_attempts: 3,
            temperature: 0.0,
            max_tokens: 1,
        }
    }
}

/// One playable round
#[derive(Debug, Clone, Serialize)]
pub struct GuessingRound {
    pub number: u32,
    pub distribution: TokenDistribution,
    pub options: RoundOptions,
}

/// Result of a guess
#[derive(Debug, Clone, Serialize)]
pub struct GuessOutcome {
    pub correct: bool,
    /// Token the model actually produced
    pub chosen: TokenCandidate,
    /// Guessed token as found in the distribution, if it was there
    pub guessed: Option<TokenCandidate>,
}

/// Running score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreboard {
    pub rounds: u32,
    pub correct: u32,
    pub streak: u32,
    pub best_streak: u32,
}

impl Scoreboard {
    fn record(&mut self, correct: bool) {
        self.rounds += 1;
        if correct {
            self.correct += 1;
            self.streak += 1;
            self.best_streak = self.best_streak.max(self.streak);
        } else {
            self.streak = 0;
        }
    }

    /// Fraction of rounds guessed correctly
    pub fn accuracy(&self) -> f64 {
        if self.rounds == 0 {
            return 0.0;
        }
        self.correct as f64 / self.rounds as f64
    }
}

/// Guessing game over a growing text
pub struct GuessingGame<M, R, V> {
    model: M,
    selector: CandidateSelector<R, V>,
    config: GuessingConfig,
    text: String,
    score: Scoreboard,
    next_round: u32,
    /// Round number awaiting a guess; older rounds are stale
    outstanding: Option<u32>,
}

impl<M: ModelQuery, R: Rng, V: WordValidator> GuessingGame<M, R, V> {
    pub fn new(model: M, selector: CandidateSelector<R, V>, initial_text: &str) -> Self {
        Self::with_config(model, selector, initial_text, GuessingConfig::default())
    }

    pub fn with_config(
        model: M,
        selector: CandidateSelector<R, V>,
        initial_text: &str,
        config: GuessingConfig,
    ) -> Self {
        Self {
            model,
            selector,
            config,
            text: initial_text.to_string(),
            score: Scoreboard::default(),
            next_round: 1,
            outstanding: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn score(&self) -> &Scoreboard {
        &self.score
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    fn messages(&self) -> Vec<Message> {
        vec![
            Message::system(
                "You are a text continuation engine. \
                 Continue the user's text with the next word only.",
            ),
            Message::user(self.text.clone()),
        ]
    }

    /// Query the model and build the next round.
    ///
    /// Missing log-probabilities and degenerate distributions are re-queried
    /// up to `max_attempts` times, then reported to the caller.
    pub fn next_round(&mut self) -> Result<GuessingRound> {
        let params = SamplingParams::text(self.config.temperature, self.config.max_tokens)
            .with_logprobs(self.config.top_logprobs);
        let messages = self.messages();
        let attempts = self.config.max_attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            let outcome = self
                .model
                .query(&messages, &params)
                .and_then(|response| TokenDistribution::from_response(&response))
                .and_then(|dist| {
                    let options = self.selector.select(&dist)?;
                    Ok((dist, options))
                });

            match outcome {
                Ok((distribution, options)) => {
                    debug!(
                        "round {}: chosen {:?} among {} candidates",
                        self.next_round,
                        distribution.chosen_text(),
                        distribution.len()
                    );
                    let round = GuessingRound {
                        number: self.next_round,
                        distribution,
                        options,
                    };
                    self.outstanding = Some(self.next_round);
                    self.next_round += 1;
                    return Ok(round);
                }
                Err(
                    e @ (LabError::DataUnavailable(_) | LabError::InsufficientCandidates { .. }),
                ) => {
                    warn!("attempt {attempt}/{attempts} produced no playable round: {e}");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LabError::DataUnavailable("no attempts made".to_string())))
    }

    /// Score a guess and advance the text by the model's chosen token.
    ///
    /// Only the most recent round is accepted, once. A round that was
    /// already scored or superseded by `next_round` is `StaleSession`.
    pub fn submit_guess(&mut self, round: &GuessingRound, guess: &str) -> Result<GuessOutcome> {
        if self.outstanding != Some(round.number) {
            warn!("discarding guess for stale round {}", round.number);
            return Err(LabError::StaleSession);
        }
        self.outstanding = None;

        let chosen = round.distribution.chosen().clone();
        let correct = chosen.same_text(guess);
        let guessed = round.distribution.find(guess).cloned();

        self.score.record(correct);
        self.text.push_str(&chosen.raw_text);

        Ok(GuessOutcome {
            correct,
            chosen,
            guessed,
        })
    }
}
