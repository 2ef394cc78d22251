//! C6 Agent/Task Scheduler.
//!
//! Grounded on `registry/mod.rs`'s `ProviderRegistry` (capability-tagged
//! workers, `ranked_by_health` scoring) generalized to the spec's task
//! dispatch model: quick tasks bypass availability gating, regular tasks
//! claim the highest-scoring capable, available agent. Spec §4.2:
//! ties broken by insertion order, and high/critical priority tasks fall
//! back to a generalist (>= 4 capabilities) when nothing matches.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{ForgeError, ForgeResult};
use crate::model::{Agent, Task, TaskStatus};

/// An agent is treated as a generalist fallback candidate once it
/// declares this many capabilities (spec §4.2).
const GENERALIST_CAPABILITY_THRESHOLD: usize = 4;

pub struct Scheduler {
    agents: HashMap<Uuid, Agent>,
    /// Registration order, preserved separately from the `HashMap` so
    /// score ties resolve deterministically (spec §4.2).
    order: Vec<Uuid>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register_agent(&mut self, agent: Agent) {
        if !self.agents.contains_key(&agent.id) {
            self.order.push(agent.id);
        }
        self.agents.insert(agent.id, agent);
    }

    pub fn agent(&self, id: &Uuid) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// Candidates in registration order, the shape every selection pass
    /// sorts over so a stable sort keeps ties in insertion order.
    fn ordered_agents(&self) -> Vec<&Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id)).collect()
    }

    /// Picks the highest-scoring agent capable of `capability`. Quick
    /// tasks (spec §4.2) are allowed to land on a busy agent; regular
    /// tasks require `available`. If no capable+available agent exists
    /// and the task is high/critical priority, falls back to any
    /// available generalist (>= 4 capabilities); otherwise fails.
    pub fn dispatch(&mut self, task: &mut Task, capability: &str) -> ForgeResult<Uuid> {
        let quick = task.is_quick();
        let ordered = self.ordered_agents();

        let mut candidates: Vec<&Agent> = ordered.iter().copied().filter(|a| a.can_handle(capability) && (quick || a.available)).collect();

        if candidates.is_empty() && task.priority.allows_fallback_selection() {
            candidates = ordered
                .iter()
                .copied()
                .filter(|a| (quick || a.available) && a.capabilities.len() >= GENERALIST_CAPABILITY_THRESHOLD)
                .collect();
        }

        candidates.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(std::cmp::Ordering::Equal));

        let chosen_id = candidates
            .first()
            .map(|a| a.id)
            .ok_or_else(|| ForgeError::Internal(format!("no agent available for capability {capability}")))?;

        if !quick {
            if let Some(agent) = self.agents.get_mut(&chosen_id) {
                agent.available = false;
            }
        }

        task.assigned_agent_id = Some(chosen_id);
        task.status = TaskStatus::Assigned;
        task.updated_at = chrono::Utc::now();
        Ok(chosen_id)
    }

    /// Marks a task complete and records the outcome against the agent
    /// that ran it, updating its scheduler score.
    pub fn complete_task(&mut self, task: &mut Task, duration_secs: f64) {
        task.status = TaskStatus::Completed;
        task.updated_at = chrono::Utc::now();
        if let Some(agent_id) = task.assigned_agent_id {
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.record_success(duration_secs);
                if !task.is_quick() {
                    agent.available = true;
                }
            }
        }
    }

    /// Marks a task failed. If retries remain, requeues it; otherwise
    /// terminal-fails it. Always frees the agent back up.
    pub fn fail_task(&mut self, task: &mut Task, error: impl Into<String>) {
        if let Some(agent_id) = task.assigned_agent_id {
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.record_failure();
                if !task.is_quick() {
                    agent.available = true;
                }
            }
        }
        task.retry_count += 1;
        task.error = Some(error.into());
        task.updated_at = chrono::Utc::now();
        task.status = if task.can_retry() {
            task.assigned_agent_id = None;
            TaskStatus::Queued
        } else {
            TaskStatus::Failed
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskPriority;

    fn agent(name: &str, caps: &[&str]) -> Agent {
        Agent::new(name, caps.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_dispatch_picks_highest_scoring_capable_agent() {
        let mut scheduler = Scheduler::new();
        let mut fast = agent("fast", &["generate"]);
        fast.record_success(1.0);
        let slow = agent("slow", &["generate"]);
        let fast_id = fast.id;
        scheduler.register_agent(fast);
        scheduler.register_agent(slow);

        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "generate", "write_file", serde_json::json!({}), TaskPriority::Medium, 3);
        let chosen = scheduler.dispatch(&mut task, "generate").unwrap();
        assert_eq!(chosen, fast_id);
        assert_eq!(task.status, TaskStatus::Assigned);
    }

    #[test]
    fn test_quick_task_can_use_busy_agent() {
        let mut scheduler = Scheduler::new();
        let mut a = agent("only", &["creation"]);
        a.available = false;
        scheduler.register_agent(a);

        let session_id = Uuid::new_v4();
        let mut task = Task::new(
            session_id,
            "creation",
            "classify_intent",
            serde_json::json!({}),
            TaskPriority::Low,
            0,
        );
        let result = scheduler.dispatch(&mut task, "creation");
        assert!(result.is_ok());
    }

    #[test]
    fn test_fail_requeues_when_retries_remain() {
        let mut scheduler = Scheduler::new();
        let a = agent("a", &["generate"]);
        scheduler.register_agent(a);
        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "generate", "write_file", serde_json::json!({}), TaskPriority::Medium, 3);
        scheduler.dispatch(&mut task, "generate").unwrap();
        scheduler.fail_task(&mut task, "boom");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.retry_count, 1);
    }

    #[test]
    fn test_fail_terminal_when_retries_exhausted() {
        let mut scheduler = Scheduler::new();
        let a = agent("a", &["generate"]);
        scheduler.register_agent(a);
        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "generate", "write_file", serde_json::json!({}), TaskPriority::Medium, 0);
        scheduler.dispatch(&mut task, "generate").unwrap();
        scheduler.fail_task(&mut task, "boom");
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn test_no_capable_agent_errors() {
        let mut scheduler = Scheduler::new();
        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "generate", "write_file", serde_json::json!({}), TaskPriority::Medium, 3);
        assert!(scheduler.dispatch(&mut task, "generate").is_err());
    }

    #[test]
    fn test_critical_priority_falls_back_to_generalist() {
        let mut scheduler = Scheduler::new();
        let generalist = agent("generalist", &["a", "b", "c", "d", "e"]);
        let generalist_id = generalist.id;
        scheduler.register_agent(generalist);

        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "exotic", "write_file", serde_json::json!({}), TaskPriority::Critical, 3);
        let chosen = scheduler.dispatch(&mut task, "exotic").unwrap();
        assert_eq!(chosen, generalist_id);
    }

    #[test]
    fn test_low_priority_does_not_fall_back() {
        let mut scheduler = Scheduler::new();
        scheduler.register_agent(agent("generalist", &["a", "b", "c", "d", "e"]));

        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "exotic", "write_file", serde_json::json!({}), TaskPriority::Low, 3);
        assert!(scheduler.dispatch(&mut task, "exotic").is_err());
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let mut scheduler = Scheduler::new();
        let first = agent("first", &["generate"]);
        let first_id = first.id;
        let second = agent("second", &["generate"]);
        scheduler.register_agent(first);
        scheduler.register_agent(second);

        let session_id = Uuid::new_v4();
        let mut task = Task::new(session_id, "generate", "write_file", serde_json::json!({}), TaskPriority::Medium, 3);
        let chosen = scheduler.dispatch(&mut task, "generate").unwrap();
        assert_eq!(chosen, first_id);
    }
}
