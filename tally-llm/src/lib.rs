//! tally-llm: client for the external language-model capability used by the
//! model-assisted extractor and categorizer.
//!
//! The capability is injected into the orchestrators through the
//! [`ChatModel`] trait so tests can substitute deterministic fakes.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a single capability call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("capability returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability returned an empty completion")]
    Empty,
}

/// A stateless, reentrant chat-completion capability.
///
/// `&self` calls may run concurrently; implementations must not hold locks
/// across the round-trip.
pub trait ChatModel: Send + Sync {
    fn complete(
        &self,
        system: String,
        user: String,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
}

/// Explicit capability configuration, passed into [`LlmClient::new`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    /// Hard deadline for one round-trip; a timed-out call is treated the
    /// same as a hard failure by callers.
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn openai(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::OpenAI,
            model: model.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
            max_tokens: 4000,
            temperature: 0.1,
        }
    }

    pub fn anthropic(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider: Provider::Anthropic,
            model: model.into(),
            ..Self::openai("", api_key)
        }
    }
}

/// Reqwest-backed [`ChatModel`] implementation.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, client }
    }

    async fn dispatch(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let fut = async {
            match self.config.provider {
                Provider::Anthropic => self.anthropic_complete(system, user).await,
                Provider::OpenAI => self.openai_complete(system, user).await,
            }
        };
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.config.timeout)),
        }
    }

    async fn anthropic_complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }

        #[derive(Deserialize)]
        struct Resp {
            content: Vec<ContentBlock>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(rename = "type")]
            t: String,
            text: Option<String>,
        }

        let body = Req {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system,
            messages: vec![Msg {
                role: "user",
                content: user,
            }],
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|_| LlmError::Api {
                status: 0,
                body: "invalid api key header".to_string(),
            })?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let out: Resp = resp.json().await?;
        let mut s = String::new();
        for b in out.content {
            if b.t == "text" {
                if let Some(t) = b.text {
                    s.push_str(&t);
                }
            }
        }
        let s = s.trim().to_string();
        if s.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(s)
    }

    async fn openai_complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            max_tokens: u32,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: MsgOut,
        }

        #[derive(Deserialize)]
        struct MsgOut {
            content: Option<String>,
        }

        let body = Req {
            model: &self.config.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let out: Resp = resp.json().await?;
        let content = out
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(content)
    }
}

impl ChatModel for LlmClient {
    fn complete(
        &self,
        system: String,
        user: String,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        async move { self.dispatch(&system, &user).await }
    }
}

/// Retry `call` once after `backoff` on failure. Rate-limit pressure and
/// transient errors get exactly one more chance; the second error wins.
pub async fn with_one_retry<T, F, Fut>(backoff: Duration, mut call: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    match call().await {
        Ok(v) => Ok(v),
        Err(first) => {
            tracing::debug!(error = %first, "capability call failed, retrying once");
            tokio::time::sleep(backoff).await;
            call().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_with_one_retry_recovers() {
        let calls = AtomicUsize::new(0);
        let out = with_one_retry(Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LlmError::Empty)
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_one_retry_gives_up_after_second_failure() {
        let calls = AtomicUsize::new(0);
        let out: Result<String, _> = with_one_retry(Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Empty) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
