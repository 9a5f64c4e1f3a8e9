//! LLM provider port: structured-output generation and embeddings.
//!
//! Every call reports token usage so the dynamic batcher can budget
//! against real consumption. The HTTP adapter carries a token-bucket
//! gate (requests/min and tokens/min) in front of the provider and a
//! provider-level retry with exponential backoff on rate limiting.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{LatticeError, LatticeResult};

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced in the completion.
    pub output_tokens: u64,
}

/// A structured-output generation request.
#[derive(Debug, Clone)]
pub struct ObjectRequest {
    /// Provider model identifier.
    pub model: String,
    /// JSON schema the output must validate against.
    pub schema: Value,
    /// User prompt.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
}

/// A structured-output generation response.
#[derive(Debug, Clone)]
pub struct ObjectResponse {
    /// The schema-validated JSON object.
    pub value: Value,
    /// Token usage for the call.
    pub usage: TokenUsage,
}

/// Port over the LLM provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a JSON object conforming to the request schema.
    async fn generate_object(&self, request: &ObjectRequest) -> LatticeResult<ObjectResponse>;

    /// Embed a batch of texts with a provider embedding model.
    async fn embed(&self, model: &str, texts: &[String]) -> LatticeResult<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Token-bucket gate
// ---------------------------------------------------------------------------

/// Request-and-token rate gate in front of the provider.
pub struct RateGate {
    state: Mutex<GateState>,
    requests_per_minute: u32,
    tokens_per_minute: u64,
}

struct GateState {
    window_start: Instant,
    requests: u32,
    tokens: u64,
}

impl RateGate {
    /// Create a gate with the given per-minute budgets.
    pub fn new(requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        Self {
            state: Mutex::new(GateState {
                window_start: Instant::now(),
                requests: 0,
                tokens: 0,
            }),
            requests_per_minute,
            tokens_per_minute,
        }
    }

    /// Try to admit a call expected to consume `estimated_tokens`.
    /// Returns how long to wait when the budget is exhausted.
    pub fn admit(&self, estimated_tokens: u64) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let elapsed = state.window_start.elapsed();
        if elapsed >= Duration::from_secs(60) {
            state.window_start = Instant::now();
            state.requests = 0;
            state.tokens = 0;
        }
        if state.requests + 1 > self.requests_per_minute
            || state.tokens + estimated_tokens > self.tokens_per_minute
        {
            return Err(Duration::from_secs(60).saturating_sub(elapsed));
        }
        state.requests += 1;
        state.tokens += estimated_tokens;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

/// HTTP adapter over a structured-output completion API.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
    gate: RateGate,
}

#[derive(Deserialize)]
struct WireResponse {
    object: Value,
    usage: TokenUsage,
}

impl HttpLlmProvider {
    /// Create an adapter from config; the API key comes from the
    /// `LATTICE_LLM_API_KEY` environment variable.
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            gate: RateGate::new(config.requests_per_minute, config.tokens_per_minute),
            api_key: std::env::var("LATTICE_LLM_API_KEY").unwrap_or_default(),
            config: config.clone(),
        }
    }

    async fn post_with_retries(&self, url: &str, body: &Value) -> LatticeResult<WireResponse> {
        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let retryable = match &response {
                Ok(resp) => {
                    let status = resp.status();
                    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
                }
                // Connection-level failures are worth retrying.
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            match response {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<WireResponse>()
                        .await
                        .map_err(|e| LatticeError::Serialization(e.to_string()));
                }
                Ok(resp) if !retryable => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(LatticeError::Llm {
                        message: format!("{status}: {body}"),
                        retryable: false,
                    });
                }
                _ => {}
            }

            attempt += 1;
            if attempt >= self.config.retry_attempts {
                return Err(LatticeError::Llm {
                    message: format!("provider unavailable after {attempt} attempts"),
                    retryable: true,
                });
            }
            // Exponential backoff with jitter, base 1s.
            let base = Duration::from_secs(1 << attempt.min(5));
            let jitter = Duration::from_millis(rand::random::<u64>() % 500);
            tokio::time::sleep(base + jitter).await;
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn generate_object(&self, request: &ObjectRequest) -> LatticeResult<ObjectResponse> {
        let estimated = (request.prompt.len() as u64) / 4 + 500;
        while let Err(wait) = self.gate.admit(estimated) {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate gate full, waiting");
            tokio::time::sleep(wait).await;
        }

        let body = serde_json::json!({
            "model": request.model,
            "schema": request.schema,
            "prompt": request.prompt,
            "system": request.system,
            "temperature": request.temperature,
        });
        let url = format!("{}/generate-object", self.config.base_url);
        let wire = self.post_with_retries(&url, &body).await?;
        Ok(ObjectResponse {
            value: wire.object,
            usage: wire.usage,
        })
    }

    async fn embed(&self, model: &str, texts: &[String]) -> LatticeResult<Vec<Vec<f32>>> {
        let estimated: u64 = texts.iter().map(|t| t.len() as u64 / 4).sum();
        while let Err(wait) = self.gate.admit(estimated) {
            tokio::time::sleep(wait).await;
        }

        #[derive(Deserialize)]
        struct EmbedResponse {
            vectors: Vec<Vec<f32>>,
        }

        let body = serde_json::json!({ "model": model, "texts": texts });
        let url = format!("{}/embed", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LatticeError::Llm {
                message: e.to_string(),
                retryable: true,
            })?;
        if !response.status().is_success() {
            return Err(LatticeError::Llm {
                message: response.status().to_string(),
                retryable: response.status().is_server_error(),
            });
        }
        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LatticeError::Serialization(e.to_string()))?;
        Ok(parsed.vectors)
    }
}

// ---------------------------------------------------------------------------
// Scripted mock
// ---------------------------------------------------------------------------

/// Behavior of the mock for one call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this object.
    Respond(Value),
    /// Fail with a retryable (rate-limit/5xx) error.
    FailRetryable,
    /// Fail with a non-retryable error.
    FailPermanent,
}

/// Scripted LLM provider for hermetic tests.
pub struct MockLlmProvider {
    script: Mutex<Vec<MockBehavior>>,
    default: MockBehavior,
    calls: Mutex<Vec<ObjectRequest>>,
}

impl MockLlmProvider {
    /// Mock that always returns `value`.
    pub fn always(value: Value) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            default: MockBehavior::Respond(value),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Mock that always fails retryably (S6: provider returns 500 on
    /// every call).
    pub fn always_failing() -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            default: MockBehavior::FailRetryable,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue behaviors consumed in order before falling back to the
    /// default.
    pub fn enqueue(&self, behavior: MockBehavior) {
        self.script.lock().push(behavior);
    }

    /// Requests received so far.
    pub fn recorded_calls(&self) -> Vec<ObjectRequest> {
        self.calls.lock().clone()
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut script = self.script.lock();
        if script.is_empty() {
            self.default.clone()
        } else {
            script.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate_object(&self, request: &ObjectRequest) -> LatticeResult<ObjectResponse> {
        self.calls.lock().push(request.clone());
        match self.next_behavior() {
            MockBehavior::Respond(value) => Ok(ObjectResponse {
                value,
                usage: TokenUsage {
                    input_tokens: request.prompt.len() as u64 / 4,
                    output_tokens: 200,
                },
            }),
            MockBehavior::FailRetryable => Err(LatticeError::Llm {
                message: "503 overloaded".into(),
                retryable: true,
            }),
            MockBehavior::FailPermanent => Err(LatticeError::Llm {
                message: "schema rejected".into(),
                retryable: false,
            }),
        }
    }

    async fn embed(&self, _model: &str, texts: &[String]) -> LatticeResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; crate::types::EMBEDDING_DIMENSIONS];
                let h = xxhash_rust::xxh3::xxh3_64(t.as_bytes());
                v[(h % crate::types::EMBEDDING_DIMENSIONS as u64) as usize] = 1.0;
                v
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_gate_admits_within_budget() {
        let gate = RateGate::new(2, 1000);
        assert!(gate.admit(100).is_ok());
        assert!(gate.admit(100).is_ok());
        assert!(gate.admit(100).is_err(), "third request exceeds rpm");
    }

    #[test]
    fn test_rate_gate_blocks_on_token_budget() {
        let gate = RateGate::new(100, 1000);
        assert!(gate.admit(900).is_ok());
        assert!(gate.admit(200).is_err(), "tokens exhausted");
    }

    #[tokio::test]
    async fn test_mock_script_then_default() {
        let mock = MockLlmProvider::always(serde_json::json!({"ok": true}));
        mock.enqueue(MockBehavior::FailRetryable);

        let request = ObjectRequest {
            model: "m".into(),
            schema: serde_json::json!({}),
            prompt: "p".into(),
            system: None,
            temperature: 0.0,
        };

        let first = mock.generate_object(&request).await;
        assert!(matches!(first, Err(LatticeError::Llm { retryable: true, .. })));

        let second = mock.generate_object(&request).await.expect("default");
        assert_eq!(second.value["ok"], true);
        assert_eq!(mock.recorded_calls().len(), 2);
    }
}
