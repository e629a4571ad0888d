//! Model query collaborator
//!
//! The only capability the engine needs from a hosted model: send chat
//! messages with sampling parameters, get text back, optionally with
//! per-position top-k log-probabilities.

use crate::{LabError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    /// Maximum output length in tokens
    pub max_tokens: u32,
    /// Number of top-k log-probabilities to capture per output position
    pub top_logprobs: Option<u8>,
}

impl SamplingParams {
    /// Deterministic single-token completion with top-k log-probabilities.
    pub fn next_token(top_logprobs: u8) -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1,
            top_logprobs: Some(top_logprobs),
        }
    }

    /// Short free-text completion without log-probabilities.
    pub fn text(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
            top_logprobs: None,
        }
    }

    /// Request top-k log-probabilities on top of these parameters.
    pub fn with_logprobs(mut self, top_logprobs: u8) -> Self {
        self.top_logprobs = Some(top_logprobs);
        self
    }

    pub fn wants_logprobs(&self) -> bool {
        self.top_logprobs.is_some()
    }
}

/// One alternative token at an output position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

impl TopLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob,
        }
    }
}

/// Sampled token at one output position, with its alternatives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

/// Model output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    /// Per-position log-probabilities; `None` when the provider sent none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_logprobs: Option<Vec<TokenLogprob>>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            token_logprobs: None,
        }
    }

    pub fn with_logprobs(text: impl Into<String>, token_logprobs: Vec<TokenLogprob>) -> Self {
        Self {
            text: text.into(),
            token_logprobs: Some(token_logprobs),
        }
    }

    /// First output position, or `DataUnavailable` when no payload exists.
    pub fn first_position(&self) -> Result<&TokenLogprob> {
        self.token_logprobs
            .as_ref()
            .and_then(|positions| positions.first())
            .ok_or_else(|| LabError::DataUnavailable("response has no logprobs".to_string()))
    }
}

/// Capability to query a hosted language model
pub trait ModelQuery {
    fn query(&mut self, messages: &[Message], params: &SamplingParams) -> Result<ModelResponse>;
}

impl<M: ModelQuery + ?Sized> ModelQuery for &mut M {
    fn query(&mut self, messages: &[Message], params: &SamplingParams) -> Result<ModelResponse> {
        (**self).query(messages, params)
    }
}

impl<M: ModelQuery + ?Sized> ModelQuery for Box<M> {
    fn query(&mut self, messages: &[Message], params: &SamplingParams) -> Result<ModelResponse> {
        (**self).query(messages, params)
    }
}

/// Recorded request, kept by [`ScriptedModel`]
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    pub messages: Vec<Message>,
    pub params: SamplingParams,
}

/// Model that replays queued responses in order.
///
/// Used for offline replay of recorded responses and in tests. Running out of
/// script is a transport error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: VecDeque<Result<ModelResponse>>,
    history: Vec<RecordedQuery>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, response: ModelResponse) -> &mut Self {
        self.script.push_back(Ok(response));
        self
    }

    pub fn push_error(&mut self, error: LabError) -> &mut Self {
        self.script.push_back(Err(error));
        self
    }

    /// Queries received so far
    pub fn history(&self) -> &[RecordedQuery] {
        &self.history
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl ModelQuery for ScriptedModel {
    fn query(&mut self, messages: &[Message], params: &SamplingParams) -> Result<ModelResponse> {
        self.history.push(RecordedQuery {
            messages: messages.to_vec(),
            params: *params,
        });
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(LabError::Transport("script exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_token_params() {
        let params = SamplingParams::next_token(10);
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.max_tokens, 1);
        assert_eq!(params.top_logprobs, Some(10));
        assert!(params.wants_logprobs());
        assert!(!SamplingParams::text(0.7, 200).wants_logprobs());
    }

    #[test]
    fn test_first_position_missing() {
        let response = ModelResponse::text("hello");
        assert!(matches!(
            response.first_position(),
            Err(LabError::DataUnavailable(_))
        ));

        let empty = ModelResponse::with_logprobs("", Vec::new());
        assert!(empty.first_position().is_err());
    }

    #[test]
    fn test_scripted_model_replays_in_order() {
        let mut model = ScriptedModel::new();
        model
            .push(ModelResponse::text("first"))
            .push_error(LabError::RateLimited {
                retry_after_secs: None,
            });

        let params = SamplingParams::text(0.3, 5);
        let first = model.query(&[Message::user("hi")], &params).unwrap();
        assert_eq!(first.text, "first");
        assert!(matches!(
            model.query(&[Message::user("again")], &params),
            Err(LabError::RateLimited { .. })
        ));
        assert!(matches!(
            model.query(&[Message::user("more")], &params),
            Err(LabError::Transport(_))
        ));
        assert_eq!(model.history().len(), 3);
        assert_eq!(model.history()[1].messages[0].content, "again");
    }

    #[test]
    fn test_response_json_without_logprobs() {
        let response: ModelResponse = serde_json::from_str(r#"{"text": "42"}"#).unwrap();
        assert_eq!(response.text, "42");
        assert!(response.token_logprobs.is_none());
    }
}
