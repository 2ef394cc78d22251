//! End-to-end pipeline tests exercising `Orchestrator::create_plugin`
//! against fake LLM and build backends, covering seed scenarios S1 and
//! S2. S3 (rate-limit backoff), S4/S5 (rule-based repairs), and S6
//! (plan-cycle breaking) are covered by the unit tests in
//! `breaker.rs`/`rules.rs`/`planner.rs` since they don't need a full
//! pipeline run.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use forge_core::breaker::CircuitBreakerRegistry;
use forge_core::compiler::{BuildOutcome, BuildRunner, CompileRepairEngine};
use forge_core::error::ForgeResult;
use forge_core::events::EventBus;
use forge_core::gateway::{LlmClient, LlmGateway, LlmRequest};
use forge_core::{ForgeConfig, Orchestrator};

struct ScriptedLlmClient {
    malformed_generation: bool,
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &LlmRequest) -> ForgeResult<String> {
        match request.operation.as_str() {
            "classify_intent" => Ok("social".into()),
            "refine_prompt" => Ok(request.prompt.clone()),
            "extract_requirements" => Ok("join-event, logger".into()),
            "optimize_prompt" => Ok(request.prompt.clone()),
            "generation" if self.malformed_generation => {
                Ok("Sure! Here's a plugin description for you, hope you enjoy it, cheers!".into())
            }
            "generation" => Ok(serde_json::json!({
                "createdFiles": [
                    {
                        "path": "src/main/java/com/generated/welcomer/Main.java",
                        "content": "package com.generated.welcomer;\n\nimport org.bukkit.plugin.java.JavaPlugin;\n\npublic class Main extends JavaPlugin {\n    @Override\n    public void onEnable() {\n        getLogger().info(\"Welcomer enabled\");\n    }\n}\n"
                    },
                    {
                        "path": "src/main/resources/plugin.yml",
                        "content": "name: Welcomer\nversion: 1.0.0\nmain: com.generated.welcomer.Main\n"
                    },
                    {
                        "path": "src/main/resources/config.yml",
                        "content": "enabled: true\n"
                    }
                ]
            })
            .to_string()),
            _ => Ok(String::new()),
        }
    }
}

struct AlwaysSucceedsRunner {
    calls: AtomicU32,
}

#[async_trait]
impl BuildRunner for AlwaysSucceedsRunner {
    async fn build(&self, project_dir: &Path, _timeout: Duration) -> ForgeResult<BuildOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(project_dir.join("target")).await.unwrap();
        tokio::fs::write(project_dir.join("target/welcomer-1.0.0.jar"), b"jar")
            .await
            .unwrap();
        tokio::fs::write(project_dir.join("pom.xml"), "<project></project>")
            .await
            .ok();
        tokio::fs::create_dir_all(project_dir.join("src/main/java")).await.ok();
        Ok(BuildOutcome {
            success: true,
            stdout: "BUILD SUCCESS".into(),
            stderr: String::new(),
        })
    }
}

fn test_config(root: &Path) -> ForgeConfig {
    ForgeConfig {
        project_root: root.to_path_buf(),
        ..Default::default()
    }
}

fn build_orchestrator(malformed_generation: bool, root: &Path) -> Orchestrator {
    let config = test_config(root);
    let client = Arc::new(ScriptedLlmClient { malformed_generation });
    let breaker = Arc::new(CircuitBreakerRegistry::new(
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_open_timeout_ms,
        config.llm_backoff_cap_ms,
    ));
    let gateway = Arc::new(LlmGateway::new(client, breaker));
    let events = Arc::new(EventBus::new());
    let runner = Arc::new(AlwaysSucceedsRunner { calls: AtomicU32::new(0) });
    let compiler = Arc::new(CompileRepairEngine::new(
        runner,
        Arc::clone(&gateway),
        config.build_timeout_ms,
        config.max_compilation_attempts,
    ));
    Orchestrator::new(config, gateway, events, compiler)
}

#[tokio::test]
async fn test_s1_happy_path_produces_welcomer_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(false, dir.path());

    let result = orchestrator
        .create_plugin(
            "Create a plugin that welcomes players when they join.",
            "Welcomer",
            "user-1",
        )
        .await
        .unwrap();

    assert!(result.success, "expected success, got issues: {:?}", result.issues);
    assert!(result.quality_score >= 70);
    assert!(result.jar_path.is_some());
}

#[tokio::test]
async fn test_s2_malformed_llm_output_falls_back_to_minimal_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = build_orchestrator(true, dir.path());

    let result = orchestrator
        .create_plugin("Create any plugin.", "Fallback", "user-2")
        .await
        .unwrap();

    assert!(result.success, "expected fallback path to still succeed: {:?}", result.issues);
}

#[tokio::test]
async fn test_security_rejects_reserved_path() {
    let config = ForgeConfig {
        project_root: "/etc".into(),
        ..Default::default()
    };
    let client = Arc::new(ScriptedLlmClient { malformed_generation: false });
    let breaker = Arc::new(CircuitBreakerRegistry::new(5, 30_000, 30_000));
    let gateway = Arc::new(LlmGateway::new(client, breaker));
    let events = Arc::new(EventBus::new());
    let runner = Arc::new(AlwaysSucceedsRunner { calls: AtomicU32::new(0) });
    let compiler = Arc::new(CompileRepairEngine::new(runner, Arc::clone(&gateway), 10_000, 3));
    let orchestrator = Orchestrator::new(config, gateway, events, compiler);

    let result = orchestrator
        .create_plugin("Create a plugin.", "Evil", "user-3")
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.issues.iter().any(|i| i.contains("reserved")));
}
