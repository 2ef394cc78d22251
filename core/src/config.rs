//! Pipeline configuration.
//!
//! Mirrors the teacher's `SwarmConfig` pattern: defaults overridable by
//! environment variables, parsed once at startup. See spec §6
//! "Configuration (enumerated)" for the full key list.

use std::path::PathBuf;

fn env_u32(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_u64(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|s| matches!(s.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Top-level pipeline configuration, built the way `SwarmConfig::default()`
/// layers environment overrides on fixed defaults.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Selects the incremental file-by-file pipeline (§4.3) over the
    /// coarse multi-pass generator (§4.1 Generation phase).
    pub incremental_mode: bool,
    /// Session-level minimum for incremental completion (0..100).
    pub target_accuracy: u8,
    /// Minimum passing score for cross-file validation (0..100).
    pub min_passing_score: u8,
    /// Maximum correction passes per file in incremental mode.
    pub max_iterations_per_file: u32,
    /// Maximum compile/repair loop iterations per session.
    pub max_compilation_attempts: u32,
    /// Maximum generation attempts in coarse (non-incremental) mode.
    pub max_generation_attempts: u32,
    /// Circuit breaker: consecutive failures before an operation opens.
    pub circuit_breaker_failure_threshold: u32,
    /// Circuit breaker: open -> half-open cooldown.
    pub circuit_breaker_open_timeout_ms: u64,
    /// Cap on LLM gateway exponential backoff.
    pub llm_backoff_cap_ms: u64,
    /// Wall-clock timeout for a single build invocation.
    pub build_timeout_ms: u64,
    /// Filesystem root under which `generated/<userId>/<pluginName>` trees
    /// are created.
    pub project_root: PathBuf,
    /// Default max retries for a scheduled task (spec: Task.maxRetries).
    pub task_max_retries: u32,
    /// Session TTL before eviction from the in-memory session store.
    pub session_ttl_secs: u64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            incremental_mode: env_bool("FORGE_INCREMENTAL_MODE", false),
            target_accuracy: env_u32("FORGE_TARGET_ACCURACY", 98).min(100) as u8,
            min_passing_score: env_u32("FORGE_MIN_PASSING_SCORE", 95).min(100) as u8,
            max_iterations_per_file: env_u32("FORGE_MAX_ITERATIONS_PER_FILE", 5),
            max_compilation_attempts: env_u32("FORGE_MAX_COMPILATION_ATTEMPTS", 5),
            max_generation_attempts: env_u32("FORGE_MAX_GENERATION_ATTEMPTS", 3),
            circuit_breaker_failure_threshold: env_u32("FORGE_CB_FAILURE_THRESHOLD", 5),
            circuit_breaker_open_timeout_ms: env_u64("FORGE_CB_OPEN_TIMEOUT_MS", 30_000),
            llm_backoff_cap_ms: env_u64("FORGE_LLM_BACKOFF_CAP_MS", 30_000),
            build_timeout_ms: env_u64("FORGE_BUILD_TIMEOUT_MS", 600_000),
            project_root: std::env::var("FORGE_PROJECT_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::current_dir().unwrap_or_default().join("generated")),
            task_max_retries: env_u32("FORGE_TASK_MAX_RETRIES", 3),
            session_ttl_secs: env_u64("FORGE_SESSION_TTL_SECS", 24 * 60 * 60),
        }
    }
}

impl ForgeConfig {
    /// Path for a specific creation request: `<project_root>/<userId>/<pluginName>`.
    pub fn plugin_path(&self, user_id: &str, plugin_name: &str) -> PathBuf {
        self.project_root.join(user_id).join(plugin_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let cfg = ForgeConfig {
            project_root: PathBuf::from("/tmp/forge-test"),
            ..Default::default()
        };
        assert_eq!(cfg.target_accuracy, 98);
        assert_eq!(cfg.min_passing_score, 95);
        assert_eq!(cfg.max_iterations_per_file, 5);
        assert_eq!(cfg.max_compilation_attempts, 5);
        assert_eq!(cfg.max_generation_attempts, 3);
        assert_eq!(cfg.circuit_breaker_failure_threshold, 5);
        assert_eq!(cfg.circuit_breaker_open_timeout_ms, 30_000);
        assert_eq!(cfg.build_timeout_ms, 600_000);
    }

    #[test]
    fn test_plugin_path_layout() {
        let cfg = ForgeConfig {
            project_root: PathBuf::from("/cwd/generated"),
            ..Default::default()
        };
        assert_eq!(
            cfg.plugin_path("user-1", "Welcomer"),
            PathBuf::from("/cwd/generated/user-1/Welcomer")
        );
    }
}
