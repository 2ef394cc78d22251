//! C3 Compile/Repair Engine.

pub mod diagnostics;
pub mod engine;
pub mod rules;

pub use engine::{BuildOutcome, BuildRunner, CompileRepairEngine};
