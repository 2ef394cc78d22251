//! Per-file generation loop: builds a complete-context prompt, calls the
//! LLM gateway, writes the result, and runs correction passes.
//!
//! Prompt packing and the 100 KB default truncation budget are grounded
//! on `context_packer/packer.rs::trim_to_budget` (char budget = tokens *
//! 4, truncate lowest-priority context first). The multi-pass correction
//! loop (spec §4.4) is grounded on the same file's staged-fix pattern:
//! apply a deterministic fix, re-check, stop once the gate passes or the
//! fixed foci are exhausted.

use std::sync::Arc;

use regex::Regex;
use tokio::fs;

use crate::error::ForgeResult;
use crate::gateway::{LlmGateway, LlmRequest};
use crate::model::{FileStep, IncrementalContext};
use crate::security::safe_join;
use crate::validator::{java_package_from_path, validate};

const DEFAULT_CONTEXT_BUDGET_BYTES: usize = 100 * 1024;

/// The five fixed foci of the §4.4 correction loop. Only the first three
/// have a deterministic rule-based fix; the last two are re-validate-only
/// passes that catch corrections made upstream.
const CORRECTION_FOCI: &[&str] = &["syntax", "semantic", "integration", "cross-reference", "final"];

/// Builds the prompt for one file: the step's own description plus every
/// previously completed file's content, truncated to `budget_bytes` by
/// dropping the oldest completed files first when the total would exceed
/// the cap (spec §4.3).
pub fn build_prompt(step: &FileStep, ctx: &IncrementalContext, budget_bytes: usize) -> String {
    let mut header = format!(
        "Generate the file `{}`.\n\nObjective: {}\n\n",
        step.relative_path, step.description
    );
    if !step.depends_on.is_empty() {
        header.push_str(&format!("Depends on: {}\n\n", step.depends_on.join(", ")));
    }

    let mut context_blocks = Vec::new();
    let mut used = header.len();
    for (path, content) in ctx.completed_files.iter().rev() {
        let block = format!("--- {path} ---\n{content}\n\n");
        if used + block.len() > budget_bytes {
            tracing::debug!(path, "dropping file from prompt context, over budget");
            continue;
        }
        used += block.len();
        context_blocks.push(block);
    }
    context_blocks.reverse();

    header.push_str("Existing generated files for context:\n\n");
    header.push_str(&context_blocks.concat());
    header
}

pub struct IncrementalExecutor {
    gateway: Arc<LlmGateway>,
    project_root: std::path::PathBuf,
    max_iterations_per_file: u32,
    context_budget_bytes: usize,
    main_class: String,
    min_passing_score: u8,
}

impl IncrementalExecutor {
    pub fn new(
        gateway: Arc<LlmGateway>,
        project_root: std::path::PathBuf,
        max_iterations_per_file: u32,
        main_class: String,
        min_passing_score: u8,
    ) -> Self {
        Self {
            gateway,
            project_root,
            max_iterations_per_file,
            context_budget_bytes: DEFAULT_CONTEXT_BUDGET_BYTES,
            main_class,
            min_passing_score: min_passing_score.min(95),
        }
    }

    /// Runs the full plan: for each file, generate, validate/correct, write
    /// to disk (with a `.bak` of any prior content), and record it in `ctx`
    /// so later files see it as context.
    pub async fn run(&self, ctx: &mut IncrementalContext) -> ForgeResult<()> {
        let plan = ctx.plan.clone();
        for step in &plan {
            if step.completed {
                continue;
            }
            self.generate_file(step, ctx).await?;
        }
        Ok(())
    }

    async fn generate_file(&self, step: &FileStep, ctx: &mut IncrementalContext) -> ForgeResult<()> {
        let mut last_content = String::new();
        for iteration in 0..self.max_iterations_per_file.max(1) {
            let prompt = if iteration == 0 {
                build_prompt(step, ctx, self.context_budget_bytes)
            } else {
                format!(
                    "{}\n\nThe previous attempt had issues. Previous content:\n{}\n\nProduce a corrected full file.",
                    build_prompt(step, ctx, self.context_budget_bytes),
                    last_content
                )
            };

            let request = LlmRequest {
                operation: "incremental.generate".into(),
                system_prompt: None,
                prompt,
                max_tokens: None,
            };
            last_content = self.gateway.call(request).await?;

            if looks_complete(&last_content) {
                break;
            }
            tracing::warn!(
                file = step.relative_path.as_str(),
                iteration,
                "generated file looks incomplete, retrying"
            );
        }

        last_content = self.correct(step, ctx, last_content);

        self.write_with_backup(&step.relative_path, &last_content).await?;
        ctx.record_file(&step.relative_path, last_content);
        Ok(())
    }

    /// Runs the file through the five fixed correction foci (spec §4.4):
    /// syntax, semantic, and integration passes apply a deterministic fix
    /// before re-validating; cross-reference and final are re-validate-only
    /// passes. Stops early once the file clears `min_passing_score`.
    fn correct(&self, step: &FileStep, ctx: &IncrementalContext, mut content: String) -> String {
        for (pass, focus) in CORRECTION_FOCI.iter().enumerate() {
            let mut trial_files = ctx.completed_files.clone();
            trial_files.insert(step.relative_path.clone(), content.clone());
            let result = validate(&trial_files, &self.main_class);

            if result.passing(self.min_passing_score) {
                break;
            }

            let fixed = match pass {
                0 => add_missing_package(&content, step),
                1 => add_missing_semicolons(&content),
                2 => remove_unused_imports(&content),
                _ => content.clone(),
            };

            if fixed != content {
                tracing::debug!(
                    file = step.relative_path.as_str(),
                    focus,
                    score = result.score,
                    "applied correction pass"
                );
            }
            content = fixed;
        }
        content
    }

    async fn write_with_backup(&self, relative_path: &str, content: &str) -> ForgeResult<()> {
        let target = safe_join(&self.project_root, relative_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::metadata(&target).await.is_ok() {
            let mut backup_name = target.as_os_str().to_os_string();
            backup_name.push(".backup");
            fs::copy(&target, std::path::PathBuf::from(backup_name)).await?;
        }
        fs::write(&target, content).await?;
        Ok(())
    }
}

/// Heuristic completeness check used between correction passes: rejects
/// empty output and output with unbalanced braces, the two failure modes
/// an incomplete generation most commonly produces.
fn looks_complete(content: &str) -> bool {
    if content.trim().is_empty() {
        return false;
    }
    content.matches('{').count() == content.matches('}').count()
}

/// Syntax-focus fix: inserts the package declaration implied by the
/// file's path when a `.java` file is missing one entirely.
fn add_missing_package(content: &str, step: &FileStep) -> String {
    if !step.relative_path.ends_with(".java") || content.lines().any(|l| l.trim_start().starts_with("package ")) {
        return content.to_string();
    }
    let package = java_package_from_path(&step.relative_path);
    if package.is_empty() {
        return content.to_string();
    }
    format!("package {package};\n\n{content}")
}

/// Semantic-focus fix: appends a missing `;` to lines that look like a
/// terminated statement (ends in an identifier, literal, or closing
/// paren/bracket) but have none.
fn add_missing_semicolons(content: &str) -> String {
    let statement_like = Regex::new(r"[\w\)\]\"']$").unwrap();
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim_end();
            let is_candidate = !trimmed.is_empty()
                && !trimmed.ends_with(['{', '}', ';', ',', ':'])
                && !trimmed.trim_start().starts_with('@')
                && !trimmed.trim_start().starts_with("//")
                && !trimmed.trim_start().starts_with("package")
                && !trimmed.trim_start().starts_with("import")
                && (trimmed.contains('=') || trimmed.trim_start().starts_with("return "))
                && statement_like.is_match(trimmed);
            if is_candidate {
                format!("{trimmed};")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Integration-focus fix: drops `import` lines whose simple class name
/// never appears anywhere else in the file body.
fn remove_unused_imports(content: &str) -> String {
    let import_re = Regex::new(r"^\s*import\s+([\w.]+)\s*;").unwrap();
    content
        .lines()
        .filter(|line| {
            let Some(caps) = import_re.captures(line) else { return true };
            let simple_name = caps[1].rsplit('.').next().unwrap_or(&caps[1]).to_string();
            content.lines().filter(|l| *l != *line).any(|l| l.contains(&simple_name))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_build_prompt_includes_objective_and_deps() {
        let step = FileStep {
            relative_path: "Main.java".into(),
            description: "entry point".into(),
            depends_on: vec!["Config.java".into()],
            completed: false,
            iterations: 0,
        };
        let ctx = IncrementalContext::new(Uuid::new_v4(), vec![step.clone()]);
        let prompt = build_prompt(&step, &ctx, 100_000);
        assert!(prompt.contains("entry point"));
        assert!(prompt.contains("Config.java"));
    }

    #[test]
    fn test_build_prompt_truncates_over_budget() {
        let step = FileStep {
            relative_path: "Main.java".into(),
            description: "entry point".into(),
            depends_on: vec![],
            completed: false,
            iterations: 0,
        };
        let mut ctx = IncrementalContext::new(Uuid::new_v4(), vec![step.clone()]);
        ctx.record_file("Big.java", "x".repeat(10_000));
        let prompt = build_prompt(&step, &ctx, 500);
        assert!(!prompt.contains("Big.java"));
    }

    #[test]
    fn test_looks_complete_rejects_unbalanced() {
        assert!(!looks_complete(""));
        assert!(!looks_complete("public class Main {"));
        assert!(looks_complete("public class Main {}"));
    }

    #[test]
    fn test_add_missing_package_inserts_declaration() {
        let step = FileStep {
            relative_path: "src/main/java/com/generated/welcomer/Main.java".into(),
            description: String::new(),
            depends_on: vec![],
            completed: false,
            iterations: 0,
        };
        let fixed = add_missing_package("public class Main {}", &step);
        assert!(fixed.starts_with("package com.generated.welcomer;"));
    }

    #[test]
    fn test_add_missing_package_is_noop_when_present() {
        let step = FileStep {
            relative_path: "src/main/java/com/generated/welcomer/Main.java".into(),
            description: String::new(),
            depends_on: vec![],
            completed: false,
            iterations: 0,
        };
        let content = "package com.generated.welcomer;\n\npublic class Main {}";
        assert_eq!(add_missing_package(content, &step), content);
    }

    #[test]
    fn test_remove_unused_imports_drops_unreferenced() {
        let content = "import java.util.List;\nimport java.util.Map;\n\npublic class Main {\n    List<String> x;\n}";
        let fixed = remove_unused_imports(content);
        assert!(fixed.contains("import java.util.List;"));
        assert!(!fixed.contains("import java.util.Map;"));
    }

    #[test]
    fn test_add_missing_semicolons_fixes_return_statement() {
        let content = "int go() {\n    return 1\n}";
        let fixed = add_missing_semicolons(content);
        assert!(fixed.contains("return 1;"));
    }
}
