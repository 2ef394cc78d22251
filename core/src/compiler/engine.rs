//! C3 Compile/Repair Engine.
//!
//! Grounded on `verifier/pipeline.rs`'s gate/timeout/precondition
//! structure and `orchestrator.rs`'s repair loop (attempt build, parse
//! diagnostics, try a rule-based fix, else ask the LLM, retry up to a
//! bounded attempt count). The concrete Maven subprocess invocation lives
//! behind [`BuildRunner`] in the `forgecli` binary crate, matching how
//! the teacher keeps `verifier/pipeline.rs` runner-agnostic behind a
//! trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use crate::compiler::diagnostics::{classify, has_errors, parse_build_output, DiagnosticCategory};
use crate::compiler::rules::try_rule_based_repair;
use crate::error::{ForgeError, ForgeResult};
use crate::gateway::{LlmGateway, LlmRequest};
use crate::model::CompilationDiagnostic;

/// Raw result of invoking the build toolchain once.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Implemented by a concrete build-toolchain runner (Maven via
/// `std::process::Command` in `forgecli`), so `forge-core` never shells
/// out itself.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn build(&self, project_dir: &Path, timeout: Duration) -> ForgeResult<BuildOutcome>;
}

pub struct CompileRepairEngine {
    runner: Arc<dyn BuildRunner>,
    gateway: Arc<LlmGateway>,
    build_timeout: Duration,
    max_attempts: u32,
}

impl CompileRepairEngine {
    pub fn new(
        runner: Arc<dyn BuildRunner>,
        gateway: Arc<LlmGateway>,
        build_timeout_ms: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            runner,
            gateway,
            build_timeout: Duration::from_millis(build_timeout_ms),
            max_attempts,
        }
    }

    /// Runs the precondition check, then the build/repair loop, up to
    /// `max_attempts`. Returns the diagnostics from the final attempt;
    /// callers inspect `has_errors` to decide pass/fail.
    pub async fn compile_with_repair(&self, project_dir: &Path) -> ForgeResult<Vec<CompilationDiagnostic>> {
        self.check_preconditions(project_dir).await?;

        let mut last_diagnostics = Vec::new();
        for attempt in 0..self.max_attempts.max(1) {
            let outcome = self.runner.build(project_dir, self.build_timeout).await?;
            let diagnostics = parse_build_output(&format!("{}\n{}", outcome.stdout, outcome.stderr));

            if outcome.success && !has_errors(&diagnostics) {
                tracing::info!(attempt, "build succeeded");
                self.validate_artifact(project_dir).await?;
                return Ok(diagnostics);
            }

            tracing::warn!(attempt, errors = diagnostics.len(), "build failed, attempting repair");
            last_diagnostics = diagnostics;

            if attempt + 1 >= self.max_attempts {
                break;
            }

            self.repair(project_dir, &last_diagnostics).await?;
        }

        Err(ForgeError::Compile(format!(
            "build did not succeed after {} attempts: {} diagnostics remaining",
            self.max_attempts,
            last_diagnostics.len()
        )))
    }

    async fn check_preconditions(&self, project_dir: &Path) -> ForgeResult<()> {
        let pom = project_dir.join("pom.xml");
        if fs::metadata(&pom).await.is_err() {
            return Err(ForgeError::Compile(format!(
                "missing pom.xml at {}",
                pom.display()
            )));
        }
        let src = project_dir.join("src/main/java");
        if fs::metadata(&src).await.is_err() {
            return Err(ForgeError::Compile(format!(
                "missing src/main/java at {}",
                src.display()
            )));
        }
        Ok(())
    }

    async fn validate_artifact(&self, project_dir: &Path) -> ForgeResult<()> {
        let target = project_dir.join("target");
        let mut entries = fs::read_dir(&target)
            .await
            .map_err(|e| ForgeError::Compile(format!("cannot read target dir: {e}")))?;
        let mut found_jar = false;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ForgeError::Compile(format!("cannot walk target dir: {e}")))?
        {
            if entry.file_name().to_string_lossy().ends_with(".jar") {
                found_jar = true;
                break;
            }
        }
        if found_jar {
            Ok(())
        } else {
            Err(ForgeError::Compile("build reported success but no jar artifact was produced".into()))
        }
    }

    /// Tries each diagnostic's rule-based fix first; anything left over
    /// (import fixes, unknown categories) is batched into one LLM repair
    /// request per spec §4.5.
    async fn repair(&self, project_dir: &Path, diagnostics: &[CompilationDiagnostic]) -> ForgeResult<()> {
        let pom_path = project_dir.join("pom.xml");
        let mut pom_xml = fs::read_to_string(&pom_path).await?;
        let mut remaining = Vec::new();

        for diagnostic in diagnostics {
            let affected_source = match &diagnostic.file {
                Some(path) => fs::read_to_string(path).await.ok(),
                None => None,
            };
            match try_rule_based_repair(diagnostic, &pom_xml, affected_source.as_deref())? {
                Some(("pom.xml", patched)) => pom_xml = patched,
                Some((path, patched)) if path == "__affected_source__" => {
                    if let Some(file) = &diagnostic.file {
                        fs::write(file, patched).await?;
                    }
                }
                _ => remaining.push(diagnostic),
            }
        }

        fs::write(&pom_path, &pom_xml).await?;

        if !remaining.is_empty() {
            self.llm_repair(project_dir, &remaining).await?;
        }
        Ok(())
    }

    async fn llm_repair(&self, project_dir: &Path, diagnostics: &[&CompilationDiagnostic]) -> ForgeResult<()> {
        let file_contents = collect_affected_sources(project_dir, diagnostics).await?;
        let diag_text = diagnostics
            .iter()
            .map(|d| d.raw.clone())
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "The following Maven build diagnostics need fixing:\n{diag_text}\n\nAffected files:\n{file_contents}\n\nRespond with the corrected file contents, one per `--- path ---` section."
        );

        let response = self
            .gateway
            .call(LlmRequest {
                operation: "compile.repair".into(),
                system_prompt: None,
                prompt,
                max_tokens: None,
            })
            .await?;

        apply_sectioned_patch(project_dir, &response).await
    }
}

async fn collect_affected_sources(
    project_dir: &Path,
    diagnostics: &[&CompilationDiagnostic],
) -> ForgeResult<String> {
    let mut out = String::new();
    let mut seen = std::collections::HashSet::new();
    for diagnostic in diagnostics {
        if classify(diagnostic) == DiagnosticCategory::Unknown {
            if let Some(file) = &diagnostic.file {
                if seen.insert(file.clone()) {
                    if let Ok(content) = fs::read_to_string(project_dir.join(file)).await {
                        out.push_str(&format!("--- {file} ---\n{content}\n\n"));
                    }
                }
            }
        }
    }
    Ok(out)
}

async fn apply_sectioned_patch(project_dir: &Path, response: &str) -> ForgeResult<()> {
    let mut current_path: Option<PathBuf> = None;
    let mut current_body = String::new();

    for line in response.lines() {
        if let Some(path) = line.strip_prefix("--- ").and_then(|s| s.strip_suffix(" ---")) {
            if let Some(prev) = current_path.take() {
                fs::write(&prev, current_body.trim_end()).await?;
            }
            current_path = Some(project_dir.join(path));
            current_body.clear();
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(prev) = current_path {
        fs::write(&prev, current_body.trim_end()).await?;
    }
    Ok(())
}
