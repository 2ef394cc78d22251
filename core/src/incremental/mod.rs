//! C5 Incremental Planner + Executor.
//!
//! Grounded on `work_packet/types.rs` (per-file context/objective shape)
//! and `context_packer/packer.rs` (token-budgeted truncation). The
//! dependency DAG and its topological ordering are grounded on
//! `petgraph`'s usage elsewhere in the teacher's `coordination` crate.

pub mod executor;
pub mod planner;

pub use executor::{build_prompt, IncrementalExecutor};
pub use planner::plan_files;
