//! Builds the ordered file plan for incremental generation.
//!
//! The dependency graph between [`FileStep`]s is topologically sorted
//! with `petgraph`'s Kahn's-algorithm implementation (spec §4.3/§8
//! property 5: files are generated in dependency order). Cycles are
//! broken deterministically by relative-path order rather than failing
//! the whole plan, since a malformed LLM-declared dependency must not
//! block the session.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::FileStep;

/// Orders `steps` so that every file appears after the files it depends
/// on. Unknown dependencies (referring to a path not present in `steps`)
/// are ignored rather than rejected, since the LLM may declare a
/// dependency on a file it decided not to generate.
pub fn plan_files(mut steps: Vec<FileStep>) -> Vec<FileStep> {
    steps.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut graph = DiGraph::<String, ()>::new();
    let mut index_of: HashMap<String, NodeIndex> = HashMap::new();
    for step in &steps {
        let idx = graph.add_node(step.relative_path.clone());
        index_of.insert(step.relative_path.clone(), idx);
    }
    for step in &steps {
        let Some(&to) = index_of.get(&step.relative_path) else { continue };
        for dep in &step.depends_on {
            if let Some(&from) = index_of.get(dep) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let order = match toposort(&graph, None) {
        Ok(order) => order,
        Err(cycle) => {
            tracing::warn!(
                node = graph[cycle.node_id()].as_str(),
                "dependency cycle detected in file plan, breaking at detected node"
            );
            break_cycle_order(&graph)
        }
    };

    let mut by_path: HashMap<String, FileStep> =
        steps.into_iter().map(|s| (s.relative_path.clone(), s)).collect();

    order
        .into_iter()
        .filter_map(|idx| {
            let path = graph[idx].clone();
            by_path.remove(&path)
        })
        .collect()
}

/// Falls back to the deterministic lexical order already established by
/// sorting `steps`, which is always a valid (if dependency-blind) plan.
fn break_cycle_order(graph: &DiGraph<String, ()>) -> Vec<NodeIndex> {
    let mut indices: Vec<NodeIndex> = graph.node_indices().collect();
    indices.sort_by_key(|idx| graph[*idx].clone());
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(path: &str, deps: &[&str]) -> FileStep {
        FileStep {
            relative_path: path.into(),
            description: String::new(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            completed: false,
            iterations: 0,
        }
    }

    #[test]
    fn test_orders_by_dependency() {
        let steps = vec![
            step("B.java", &["A.java"]),
            step("A.java", &[]),
            step("C.java", &["B.java", "A.java"]),
        ];
        let plan = plan_files(steps);
        let order: Vec<&str> = plan.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(order, vec!["A.java", "B.java", "C.java"]);
    }

    #[test]
    fn test_unknown_dependency_ignored() {
        let steps = vec![step("A.java", &["Missing.java"])];
        let plan = plan_files(steps);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_cycle_does_not_panic() {
        let steps = vec![step("A.java", &["B.java"]), step("B.java", &["A.java"])];
        let plan = plan_files(steps);
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_independent_files_are_lexically_ordered() {
        let steps = vec![step("Z.java", &[]), step("A.java", &[])];
        let plan = plan_files(steps);
        let order: Vec<&str> = plan.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(order, vec!["A.java", "Z.java"]);
    }
}
