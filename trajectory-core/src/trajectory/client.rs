//! LLM completion clients for rule-guided classification.

use crate::config::{LlmConfig, LlmProvider};
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 300;

/// LLM completion interface for the rule tier.
///
/// Implementations must return the raw text of the model's reply.
pub trait LlmClient: Send + Sync {
    fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Create the default HTTP-backed client.
pub fn create_client(llm: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(HttpLlmClient::new(llm)?))
}

/// HTTP client with its own runtime so callers stay synchronous.
///
/// `complete` must not be called from an async worker thread. The client
/// itself may be dropped anywhere.
struct HttpLlmClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    runtime: Option<tokio::runtime::Runtime>,
    http: reqwest::Client,
}

impl HttpLlmClient {
    fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = config.resolve_api_key();

        if !config.has_credential() {
            return Err(Error::Config(format!(
                "llm.api_key (or provider env var) is required for {}",
                config.provider.as_str()
            )));
        }

        // One worker drives IO so several threads can block on calls at once
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("trajectory-llm")
            .enable_all()
            .build()
            .map_err(|e| Error::Llm(format!("failed to build tokio runtime: {e}")))?;
        let timeout_secs = config.timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            runtime: Some(runtime),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    async fn post(
        &self,
        label: &str,
        url: String,
        headers: HeaderMap,
        body: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Llm(format!("{label} request timed out"))
                } else {
                    Error::Llm(format!("{label} request failed: {e}"))
                }
            })?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("{label} read body failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "{label} returned {}: {}",
                status.as_u16(),
                text
            )));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn complete_ollama(&self, system: &str, prompt: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let json = self
            .post(
                "ollama",
                self.url("/api/generate"),
                headers,
                json!({
                    "model": self.model,
                    "system": system,
                    "prompt": prompt,
                    "stream": false,
                    "options": { "temperature": TEMPERATURE },
                }),
            )
            .await?;
        json.get("response")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::Llm("ollama response missing string field `response`".to_string())
            })
    }

    async fn complete_claude(&self, system: &str, prompt: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                .map_err(|e| Error::Llm(format!("invalid claude api key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        let json = self
            .post(
                "claude",
                self.url("/v1/messages"),
                headers,
                json!({
                    "model": self.model,
                    "max_tokens": MAX_TOKENS,
                    "temperature": TEMPERATURE,
                    "system": system,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            )
            .await?;
        json.get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("text"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| Error::Llm("claude response missing content[0].text".to_string()))
    }

    async fn complete_openai(&self, system: &str, prompt: &str) -> Result<String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!(
                "Bearer {}",
                self.api_key.as_deref().unwrap_or_default()
            ))
            .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
        );

        let json = self
            .post(
                "openai",
                self.url("/v1/chat/completions"),
                headers,
                json!({
                    "model": self.model,
                    "temperature": TEMPERATURE,
                    "max_tokens": MAX_TOKENS,
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": prompt }
                    ]
                }),
            )
            .await?;
        json.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::Llm("openai response missing choices[0].message.content".to_string())
            })
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Llm("LLM client runtime already shut down".to_string()))?;
        runtime.block_on(async {
            match self.provider {
                LlmProvider::Ollama => self.complete_ollama(system, prompt).await,
                LlmProvider::Claude => self.complete_claude(system, prompt).await,
                LlmProvider::OpenAI => self.complete_openai(system, prompt).await,
            }
        })
    }
}

impl Drop for HttpLlmClient {
    fn drop(&mut self) {
        // A blocking shutdown panics inside an async context
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::rules::{classify_with_rules, RuleOutcome};
    use crate::types::{IndicatorType, Message, SpeakerRole, TrajectoryRule};
    use axum::{http::StatusCode, routing::post, Json, Router};
    use chrono::Utc;
    use serde_json::Value;

    /// Local HTTP endpoint answering one path with a canned reply
    struct StubServer {
        _runtime: tokio::runtime::Runtime,
        endpoint: String,
    }

    fn stub_server(path: &str, status: StatusCode, body: Value, delay: Duration) -> StubServer {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let app = Router::new().route(
            path,
            post(move || {
                let body = body.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    (status, Json(body))
                }
            }),
        );
        runtime.spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        StubServer {
            _runtime: runtime,
            endpoint: format!("http://{addr}"),
        }
    }

    fn llm_config(provider: LlmProvider, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".to_string(),
            endpoint: Some("http://127.0.0.1:9".to_string()),
            api_key: api_key.map(str::to_string),
            timeout_secs: 1,
        }
    }

    fn stub_config(provider: LlmProvider, stub: &StubServer) -> LlmConfig {
        LlmConfig {
            endpoint: Some(stub.endpoint.clone()),
            ..llm_config(provider, Some("test-key"))
        }
    }

    #[test]
    fn test_ollama_client_builds_without_key() {
        assert!(create_client(&llm_config(LlmProvider::Ollama, None)).is_ok());
    }

    #[test]
    fn test_hosted_client_with_key_builds() {
        assert!(create_client(&llm_config(LlmProvider::Claude, Some("sk-ant-test"))).is_ok());
    }

    #[test]
    fn test_unreachable_endpoint_is_an_llm_error() {
        let client = create_client(&llm_config(LlmProvider::Ollama, None)).unwrap();
        let err = client.complete("system", "prompt").unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[test]
    fn test_ollama_reply_text() {
        let stub = stub_server(
            "/api/generate",
            StatusCode::OK,
            json!({ "response": "{\"indicator_type\":\"steady\"}", "done": true }),
            Duration::ZERO,
        );
        let client = create_client(&stub_config(LlmProvider::Ollama, &stub)).unwrap();
        assert_eq!(
            client.complete("system", "prompt").unwrap(),
            "{\"indicator_type\":\"steady\"}"
        );
    }

    #[test]
    fn test_claude_reply_text() {
        let stub = stub_server(
            "/v1/messages",
            StatusCode::OK,
            json!({ "content": [{ "type": "text", "text": "from claude" }] }),
            Duration::ZERO,
        );
        let client = create_client(&stub_config(LlmProvider::Claude, &stub)).unwrap();
        assert_eq!(client.complete("system", "prompt").unwrap(), "from claude");
    }

    #[test]
    fn test_openai_reply_text() {
        let stub = stub_server(
            "/v1/chat/completions",
            StatusCode::OK,
            json!({ "choices": [{ "message": { "role": "assistant", "content": "from openai" } }] }),
            Duration::ZERO,
        );
        let client = create_client(&stub_config(LlmProvider::OpenAI, &stub)).unwrap();
        assert_eq!(client.complete("system", "prompt").unwrap(), "from openai");
    }

    #[test]
    fn test_missing_reply_field_is_an_llm_error() {
        let stub = stub_server(
            "/v1/chat/completions",
            StatusCode::OK,
            json!({ "choices": [] }),
            Duration::ZERO,
        );
        let client = create_client(&stub_config(LlmProvider::OpenAI, &stub)).unwrap();
        let err = client.complete("system", "prompt").unwrap_err();
        assert!(matches!(err, Error::Llm(ref m) if m.contains("choices[0]")));
    }

    #[test]
    fn test_server_error_status_is_an_llm_error() {
        let stub = stub_server(
            "/v1/messages",
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "overloaded" }),
            Duration::ZERO,
        );
        let client = create_client(&stub_config(LlmProvider::Claude, &stub)).unwrap();
        let err = client.complete("system", "prompt").unwrap_err();
        assert!(matches!(err, Error::Llm(ref m) if m.contains("503")), "got {err}");
    }

    #[test]
    fn test_slow_provider_times_out_as_service_unavailable() {
        let stub = stub_server(
            "/api/generate",
            StatusCode::OK,
            json!({ "response": "{\"indicator_type\":\"leap\"}" }),
            Duration::from_secs(5),
        );
        let client = create_client(&stub_config(LlmProvider::Ollama, &stub)).unwrap();
        let messages = vec![Message::new(SpeakerRole::Seeker, "hello", Utc::now())];
        let rules = vec![TrajectoryRule {
            stage: "awareness".to_string(),
            indicator_type: IndicatorType::Leap,
            pattern: "Jumps ahead".to_string(),
            message: "Slow down.".to_string(),
        }];

        let outcome = classify_with_rules(client.as_ref(), &messages, &rules);
        assert!(
            matches!(outcome, RuleOutcome::ServiceUnavailable(ref m) if m.contains("timed out")),
            "got {outcome:?}"
        );
    }

    #[test]
    fn test_shared_client_serves_concurrent_callers() {
        let stub = stub_server(
            "/api/generate",
            StatusCode::OK,
            json!({ "response": "shared" }),
            Duration::from_millis(200),
        );
        let client: std::sync::Arc<dyn LlmClient> =
            std::sync::Arc::from(create_client(&stub_config(LlmProvider::Ollama, &stub)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                std::thread::spawn(move || client.complete("system", "prompt"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), "shared");
        }
    }

    #[tokio::test]
    async fn test_client_can_be_dropped_inside_async_context() {
        let client = create_client(&llm_config(LlmProvider::Ollama, None)).unwrap();
        drop(client);
    }
}
