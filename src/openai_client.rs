//! OpenAI-compatible chat-completions client
//!
//! Blocking `reqwest` client implementing [`ModelQuery`]. Provider throttling
//! and credential failures are mapped onto their own error kinds so callers
//! can show a cooldown or stop the session.

use crate::model_query::{
    Message, ModelQuery, ModelResponse, SamplingParams, TokenLogprob, TopLogprob,
};
use crate::{LabError, Result};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Option<Vec<WireTokenLogprob>>,
}

#[derive(Debug, Deserialize)]
struct WireTokenLogprob {
    token: String,
    logprob: f64,
    #[serde(default)]
    top_logprobs: Vec<WireTopLogprob>,
}

#[derive(Debug, Deserialize)]
struct WireTopLogprob {
    token: String,
    logprob: f64,
}

impl From<ChatResponse> for ModelResponse {
    fn from(response: ChatResponse) -> Self {
        let Some(choice) = response.choices.into_iter().next() else {
            return ModelResponse::default();
        };
        let token_logprobs = choice.logprobs.and_then(|lp| lp.content).map(|positions| {
            positions
                .into_iter()
                .map(|p| TokenLogprob {
                    token: p.token,
                    logprob: p.logprob,
                    top_logprobs: p
                        .top_logprobs
                        .into_iter()
                        .map(|t| TopLogprob::new(t.token, t.logprob))
                        .collect(),
                })
                .collect()
        });
        ModelResponse {
            text: choice.message.content.unwrap_or_default(),
            token_logprobs,
        }
    }
}

/// Chat-completions client for OpenAI and compatible servers
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(api_key, DEFAULT_MODEL, DEFAULT_BASE_URL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LabError::AuthError("API key is empty".to_string()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LabError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

fn status_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> LabError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LabError::RateLimited {
            retry_after_secs: retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LabError::AuthError(format!("provider returned {status}"))
        }
        _ => LabError::Transport(format!(
            "provider returned {status}: {}",
            body.chars().take(200).collect::<String>()
        )),
    }
}

impl ModelQuery for OpenAiClient {
    fn query(&mut self, messages: &[Message], params: &SamplingParams) -> Result<ModelResponse> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            logprobs: params.wants_logprobs(),
            top_logprobs: params.top_logprobs,
        };
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(
            "POST {url} (max_tokens {}, top_logprobs {:?})",
            params.max_tokens, params.top_logprobs
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| LabError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LabError::Transport(format!("unreadable response: {e}")))?;
        Ok(parsed.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, Some(12), ""),
            LabError::RateLimited {
                retry_after_secs: Some(12)
            }
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None, ""),
            LabError::AuthError(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, None, "upstream"),
            LabError::Transport(_)
        ));
    }

    #[test]
    fn test_wire_response_conversion() {
        let json = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": " and"},
                "logprobs": {"content": [{
                    "token": " and",
                    "logprob": -0.1,
                    "top_logprobs": [
                        {"token": " and", "logprob": -0.1},
                        {"token": " but", "logprob": -2.0}
                    ]
                }]}
            }]
        }"#;
        let wire: ChatResponse = serde_json::from_str(json).unwrap();
        let response: ModelResponse = wire.into();
        assert_eq!(response.text, " and");
        let positions = response.token_logprobs.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].top_logprobs[1].token, " but");
    }

    #[test]
    fn test_wire_response_without_logprobs() {
        let json = r#"{"choices": [{"message": {"content": "37"}, "logprobs": null}]}"#;
        let wire: ChatResponse = serde_json::from_str(json).unwrap();
        let response: ModelResponse = wire.into();
        assert_eq!(response.text, "37");
        assert!(response.token_logprobs.is_none());
    }

    #[test]
    fn test_request_omits_logprobs_when_not_requested() {
        let messages = [Message::user("hi")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.3,
            max_tokens: 8,
            logprobs: false,
            top_logprobs: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("logprobs").is_none());
        assert!(json.get("top_logprobs").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            OpenAiClient::new("  "),
            Err(LabError::AuthError(_))
        ));
    }
}
