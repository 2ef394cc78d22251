//! Core data model (spec §3), collected in one module the way the teacher
//! keeps every session/task type in `state/types.rs` rather than scattering
//! one type per file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall lifecycle state of a `createPlugin` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A single `createPlugin` invocation, tracked end to end across the six
/// orchestrator phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub plugin_name: String,
    pub prompt: String,
    pub status: SessionStatus,
    /// 0..100, weighted across phases per spec §4.1 (15/10/35/15/20/5).
    pub progress: u8,
    pub current_phase: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, plugin_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            plugin_name: plugin_name.into(),
            prompt: prompt.into(),
            status: SessionStatus::Pending,
            progress: 0,
            current_phase: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn enter_phase(&mut self, phase: &str, progress_floor: u8) {
        self.status = SessionStatus::Running;
        self.current_phase = Some(phase.to_string());
        self.progress = self.progress.max(progress_floor);
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.progress = 100;
        self.current_phase = None;
        self.touch();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.error = Some(reason.into());
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = SessionStatus::Cancelled;
        self.touch();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// Status of a scheduled `Task` as it moves through the C6 scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    /// Spec §4.2: only these get the generalist/high-capability selection
    /// fallback when no capable+available agent exists.
    pub fn allows_fallback_selection(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// A unit of work dispatched to an `Agent` by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub session_id: Uuid,
    pub task_type: String,
    pub priority: TaskPriority,
    pub action: String,
    pub data: serde_json::Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub assigned_agent_id: Option<Uuid>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        session_id: Uuid,
        task_type: impl Into<String>,
        action: impl Into<String>,
        data: serde_json::Value,
        priority: TaskPriority,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            task_type: task_type.into(),
            priority,
            action: action.into(),
            data,
            retry_count: 0,
            max_retries,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            assigned_agent_id: None,
            result: None,
            error: None,
        }
    }

    /// Spec §4.2: these actions don't mark their agent unavailable, so a
    /// phase's analysis/optimization/quality sub-tasks can fan out
    /// concurrently onto the same agent.
    pub fn is_quick(&self) -> bool {
        matches!(
            self.action.as_str(),
            "classify_intent"
                | "refine_prompt"
                | "extract_requirements"
                | "optimize_prompt"
                | "enhance_prompt"
                | "validate_generated_code"
                | "final_quality_assessment"
        )
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Performance-tracked worker in the C6 scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub capabilities: Vec<String>,
    pub available: bool,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub total_duration_secs: f64,
}

impl Agent {
    pub fn new(name: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            capabilities,
            available: true,
            tasks_completed: 0,
            tasks_failed: 0,
            total_duration_secs: 0.0,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }

    pub fn avg_duration_secs(&self) -> f64 {
        if self.tasks_completed == 0 {
            0.0
        } else {
            self.total_duration_secs / self.tasks_completed as f64
        }
    }

    /// `0.7*successRate + 0.3*(1/(avgSec+1))`, generalized from the
    /// teacher's `ranked_by_health` success-rate/latency blend.
    pub fn score(&self) -> f64 {
        0.7 * self.success_rate() + 0.3 * (1.0 / (self.avg_duration_secs() + 1.0))
    }

    pub fn record_success(&mut self, duration_secs: f64) {
        self.tasks_completed += 1;
        self.total_duration_secs += duration_secs;
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }

    pub fn can_handle(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// One file targeted by the incremental planner (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStep {
    pub relative_path: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub completed: bool,
    pub iterations: u32,
}

/// Running state threaded through the C5 incremental executor for a
/// single session: every completed file's content plus the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalContext {
    pub session_id: Uuid,
    pub plan: Vec<FileStep>,
    pub completed_files: std::collections::BTreeMap<String, String>,
    pub failure_signals: Vec<String>,
}

impl IncrementalContext {
    pub fn new(session_id: Uuid, plan: Vec<FileStep>) -> Self {
        Self {
            session_id,
            plan,
            completed_files: std::collections::BTreeMap::new(),
            failure_signals: Vec::new(),
        }
    }

    pub fn record_file(&mut self, relative_path: &str, content: String) {
        self.completed_files.insert(relative_path.to_string(), content);
        if let Some(step) = self.plan.iter_mut().find(|s| s.relative_path == relative_path) {
            step.completed = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.plan.iter().all(|s| s.completed)
    }
}

/// Result of the C4 cross-file validator: additive penalties subtracted
/// from a starting score of 100. `is_valid` is derived, never set
/// independently, so it stays equivalent to `issues.is_empty()` (spec
/// §4.4, property 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: u8,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub contextual_errors: Vec<String>,
}

impl ValidationResult {
    pub fn new(score: u8, issues: Vec<String>, suggestions: Vec<String>, contextual_errors: Vec<String>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            score,
            issues,
            suggestions,
            contextual_errors,
        }
    }

    pub fn passing(&self, min_passing_score: u8) -> bool {
        self.score >= min_passing_score
    }
}

/// Severity classification for a single compiler diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

/// One parsed line from a Maven `[ERROR]`/`[WARNING]` build report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationDiagnostic {
    pub severity: DiagnosticSeverity,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
    pub raw: String,
}
