mod build_runner;
mod llm_client;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use forge_core::breaker::CircuitBreakerRegistry;
use forge_core::compiler::CompileRepairEngine;
use forge_core::events::EventBus;
use forge_core::gateway::LlmGateway;
use forge_core::{ForgeConfig, Orchestrator};

use build_runner::MavenBuildRunner;
use llm_client::RigLlmClient;

#[derive(Parser)]
#[command(name = "forgecli", about = "Generate and compile a Minecraft plugin from a prompt")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full createPlugin pipeline.
    Create {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "default-user")]
        user_id: String,
    },
}

fn llm_endpoint() -> (String, String, String) {
    let base_url = std::env::var("FORGE_LLM_BASE_URL").unwrap_or_else(|_| "http://localhost:8080/v1".into());
    let api_key = std::env::var("FORGE_LLM_API_KEY").unwrap_or_else(|_| "not-needed".into());
    let model = std::env::var("FORGE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    (base_url, api_key, model)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = ForgeConfig::default();

    match cli.command {
        Command::Create { prompt, name, user_id } => {
            let (base_url, api_key, model) = llm_endpoint();
            info!(base_url, model, "forgecli starting createPlugin");

            let llm_client = Arc::new(RigLlmClient::new(&base_url, &api_key, &model)?);
            let breaker = Arc::new(CircuitBreakerRegistry::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_open_timeout_ms,
                config.llm_backoff_cap_ms,
            ));
            let gateway = Arc::new(LlmGateway::new(llm_client, breaker));
            let events = Arc::new(EventBus::new());
            let build_runner = Arc::new(MavenBuildRunner);
            let compiler = Arc::new(CompileRepairEngine::new(
                build_runner,
                Arc::clone(&gateway),
                config.build_timeout_ms,
                config.max_compilation_attempts,
            ));

            let mut progress = events.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = progress.recv().await {
                    info!(?event, "progress");
                }
            });

            let orchestrator = Orchestrator::new(config, gateway, events, compiler);
            let result = orchestrator.create_plugin(&prompt, &name, &user_id).await?;

            if result.success {
                info!(
                    quality_score = result.quality_score,
                    plugin_path = ?result.plugin_path,
                    jar_path = ?result.jar_path,
                    "plugin created"
                );
            } else {
                tracing::error!(issues = ?result.issues, "plugin creation failed");
            }
            println!("{}", serde_json::to_string_pretty(&result_to_json(&result))?);
            Ok(())
        }
    }
}

fn result_to_json(result: &forge_core::CreationResult) -> serde_json::Value {
    serde_json::json!({
        "success": result.success,
        "pluginPath": result.plugin_path,
        "jarPath": result.jar_path,
        "qualityScore": result.quality_score,
        "issues": result.issues,
        "suggestions": result.suggestions,
        "timeTakenMs": result.time_taken_ms,
        "agentsUsed": result.agents_used,
        "retryCount": result.retry_count,
    })
}
