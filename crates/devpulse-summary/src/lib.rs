//! devpulse-summary
//!
//! HTTP client for the external session-summary generator (spec §4.F step
//! 5): a bounded selection of transcript messages goes out, a short
//! summary and a cost estimate come back. Entirely skipped when
//! `summary.enabled` is `false` — callers check that flag before reaching
//! for this crate, not this crate's own methods.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use devpulse_config::SummaryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Request timeout. The pipeline's own per-step timeout (spec §5) is the
/// outer bound; this is a conservative inner one so a hung collaborator
/// doesn't starve the step budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A single transcript message, reduced to what the summary generator
/// needs, as selected by the pipeline's bounded message picker.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryMessage {
    /// Message role (`user`, `assistant`, ...).
    pub role: String,
    /// Inline text content, if any (tool results already externalized are
    /// omitted by the caller's selection logic, not re-fetched here).
    pub content: Option<String>,
}

/// Request body sent to the summary-generation collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    /// Session being summarized, for the collaborator's own logging.
    pub session_id: String,
    /// Bounded selection of messages (spec §4.F step 5).
    pub messages: Vec<SummaryMessage>,
    /// Model to request, from `summary.model`.
    pub model: String,
    /// Sampling temperature, from `summary.temperature`.
    pub temperature: f64,
    /// Max output tokens, from `summary.max_output_tokens`.
    pub max_output_tokens: u32,
}

/// Response body returned by the summary-generation collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryResponse {
    /// Short natural-language summary of the session.
    pub summary: String,
    /// Estimated cost in USD attributed to generating the summary.
    pub cost_estimate_usd: f64,
}

/// Errors surfaced by the summary client. Every variant maps to spec §7's
/// `TransientDependencyError` / `PipelineStepError` at the summarize step.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// Summarization is disabled in config; callers should not have called
    /// in the first place, but the guard lives here too.
    #[error("summary generation is disabled")]
    Disabled,
    /// The HTTP request itself failed (connection, timeout, TLS, ...).
    #[error("summary request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The collaborator responded with a non-success status.
    #[error("summary generator returned {status}: {body}")]
    BadStatus {
        /// HTTP status code returned.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },
}

/// Client for the external session-summary generator.
#[derive(Clone)]
pub struct SummaryClient {
    http: reqwest::Client,
    base_url: String,
    config: SummaryConfig,
}

impl SummaryClient {
    /// Build a client bound to `base_url`, using `config` for model/
    /// temperature/token defaults and the bearer key.
    pub fn new(base_url: impl Into<String>, config: SummaryConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self {
            http,
            base_url: base_url.into(),
            config,
        }
    }

    /// Whether the caller should even attempt summarization.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Request a summary for `session_id` over `messages`. Returns
    /// [`SummaryError::Disabled`] without making a request if
    /// `summary.enabled` is false.
    pub async fn summarize(
        &self,
        session_id: &str,
        messages: Vec<SummaryMessage>,
    ) -> Result<SummaryResponse, SummaryError> {
        if !self.config.enabled {
            return Err(SummaryError::Disabled);
        }

        let request = SummaryRequest {
            session_id: session_id.to_string(),
            messages,
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        let mut builder = self
            .http
            .post(format!("{}/v1/summarize", self.base_url.trim_end_matches('/')))
            .json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummaryError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<SummaryResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(enabled: bool) -> SummaryConfig {
        SummaryConfig {
            enabled,
            model: "test-model".to_string(),
            temperature: 0.2,
            max_output_tokens: 256,
            api_key: Some("secret".to_string()),
            base_url: String::new(),
        }
    }

    #[tokio::test]
    async fn summarize_returns_disabled_without_a_request() {
        let client = SummaryClient::new("http://unused.invalid", config(false));
        let err = client.summarize("S1", vec![]).await.unwrap_err();
        assert!(matches!(err, SummaryError::Disabled));
    }

    #[tokio::test]
    async fn summarize_parses_a_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "summary": "Refactored the parser and added tests.",
                "cost_estimate_usd": 0.0123
            })))
            .mount(&server)
            .await;

        let client = SummaryClient::new(server.uri(), config(true));
        let result = client
            .summarize(
                "S1",
                vec![SummaryMessage {
                    role: "user".to_string(),
                    content: Some("please refactor this".to_string()),
                }],
            )
            .await
            .unwrap();

        assert_eq!(result.summary, "Refactored the parser and added tests.");
        assert!((result.cost_estimate_usd - 0.0123).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn summarize_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/summarize"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = SummaryClient::new(server.uri(), config(true));
        let err = client.summarize("S1", vec![]).await.unwrap_err();
        match err {
            SummaryError::BadStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected BadStatus, got {other:?}"),
        }
    }
}
