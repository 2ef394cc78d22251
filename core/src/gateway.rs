//! C1 LLM Gateway.
//!
//! The trait shape is grounded on `council/mod.rs`'s `CouncilMember`
//! abstraction (an async call behind a trait object, so the orchestrator
//! never depends on a concrete provider). The concrete client (rig-core
//! against an OpenAI-compatible endpoint) lives in the `forgecli` binary
//! crate; this module only owns the breaker/backoff wrapping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::breaker::CircuitBreakerRegistry;
use crate::error::{ForgeError, ForgeResult};

/// A single request to the LLM, scoped to one pipeline operation (so the
/// circuit breaker can track `generation`, `repair`, `validation-fixup`,
/// etc. independently).
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub operation: String,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<u32>,
}

/// Implemented once per concrete provider; the orchestrator only ever
/// talks to `LlmGateway`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> ForgeResult<String>;

    /// Best-effort classification of a failure as a rate-limit signal,
    /// so the gateway can apply backoff instead of counting it as a
    /// breaker failure.
    fn is_rate_limited(&self, error: &ForgeError) -> bool {
        matches!(error, ForgeError::Llm(msg) if msg.contains("429") || msg.to_lowercase().contains("rate limit"))
    }
}

/// Wraps a concrete [`LlmClient`] with circuit-breaker gating and
/// rate-limit backoff, per spec §4.6.
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreakerRegistry>,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, breaker: Arc<CircuitBreakerRegistry>) -> Self {
        Self { client, breaker }
    }

    pub async fn call(&self, request: LlmRequest) -> ForgeResult<String> {
        let op = request.operation.clone();

        if !self.breaker.allow(&op) {
            return Err(ForgeError::Llm(format!("circuit open for operation {op}")));
        }

        match self.client.complete(&request).await {
            Ok(text) => {
                self.breaker.record_success(&op);
                Ok(text)
            }
            Err(err) if self.client.is_rate_limited(&err) => {
                let backoff = self.breaker.record_rate_limit(&op);
                tracing::warn!(operation = %op, backoff_ms = backoff.as_millis() as u64, "llm rate limited, backing off");
                tokio::time::sleep(backoff).await;
                Err(err)
            }
            Err(err) => {
                self.breaker.record_failure(&op);
                tracing::warn!(operation = %op, error = %err, "llm call failed");
                Err(err)
            }
        }
    }

    /// Calls with a fixed retry budget, treating rate-limit backoff as a
    /// retryable condition and breaker-open as terminal.
    pub async fn call_with_retries(&self, request: LlmRequest, max_attempts: u32) -> ForgeResult<String> {
        let mut last_err = None;
        for attempt in 0..max_attempts.max(1) {
            match self.call(request.clone()).await {
                Ok(text) => return Ok(text),
                Err(ForgeError::Llm(msg)) if msg.starts_with("circuit open") => {
                    return Err(ForgeError::Llm(msg));
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < max_attempts {
                        continue;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ForgeError::Llm("exhausted retries".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: &LlmRequest) -> ForgeResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(ForgeError::Llm("transient failure".into()))
            } else {
                Ok("generated text".into())
            }
        }
    }

    fn request(op: &str) -> LlmRequest {
        LlmRequest {
            operation: op.into(),
            system_prompt: None,
            prompt: "prompt".into(),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_retries_succeed_eventually() {
        let client = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            fail_first_n: 2,
        });
        let breaker = Arc::new(CircuitBreakerRegistry::new(10, 30_000, 30_000));
        let gateway = LlmGateway::new(client, breaker);
        let result = gateway.call_with_retries(request("generation"), 5).await;
        assert_eq!(result.unwrap(), "generated text");
    }

    #[tokio::test]
    async fn test_breaker_opens_and_blocks_calls() {
        let client = Arc::new(FlakyClient {
            calls: AtomicU32::new(0),
            fail_first_n: 100,
        });
        let breaker = Arc::new(CircuitBreakerRegistry::new(2, 30_000, 30_000));
        let gateway = LlmGateway::new(client, breaker);
        let _ = gateway.call(request("repair")).await;
        let _ = gateway.call(request("repair")).await;
        let result = gateway.call(request("repair")).await;
        assert!(matches!(result, Err(ForgeError::Llm(msg)) if msg.starts_with("circuit open")));
    }
}
