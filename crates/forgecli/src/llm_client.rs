//! Concrete [`forge_core::gateway::LlmClient`] backed by an
//! OpenAI-compatible endpoint via `rig-core`.
//!
//! Grounded on `agents/coder.rs` / `validator.rs`'s
//! `openai::CompletionsClient::builder()...build()` pattern; this client
//! builds one short-lived `rig` agent per request rather than keeping
//! long-running tool-using agents, since the pipeline only needs single
//! completions (no tool calls).

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

use forge_core::error::{ForgeError, ForgeResult};
use forge_core::gateway::{LlmClient, LlmRequest};

pub struct RigLlmClient {
    client: openai::CompletionsClient,
    model: String,
}

impl RigLlmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> anyhow::Result<Self> {
        let client = openai::CompletionsClient::builder()
            .api_key(api_key)
            .base_url(base_url)
            .build()?;
        Ok(Self {
            client,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for RigLlmClient {
    async fn complete(&self, request: &LlmRequest) -> ForgeResult<String> {
        let mut builder = self.client.agent(&self.model).name(&request.operation);
        if let Some(preamble) = &request.system_prompt {
            builder = builder.preamble(preamble);
        }
        let agent = builder.temperature(0.2).build();

        agent
            .prompt(request.prompt.as_str())
            .await
            .map_err(|err| ForgeError::Llm(err.to_string()))
    }

    fn is_rate_limited(&self, error: &ForgeError) -> bool {
        matches!(error, ForgeError::Llm(msg) if msg.contains("429") || msg.to_lowercase().contains("rate limit"))
    }
}
