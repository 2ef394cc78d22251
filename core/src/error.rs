//! Unified error surface for the plugin-generation pipeline.
//!
//! Each layer (gateway, parser, validator, compiler, scheduler) defines its
//! own `thiserror` enum; [`ForgeError`] is the kind-tagged union exposed at
//! the orchestrator boundary, matching the error kinds enumerated in the
//! spec's error handling design: `config`, `llm`, `parse`, `validation`,
//! `compile`, `timeout`, `internal`, `cancelled`.

use thiserror::Error;

/// Top-level error kind, used for user-visible classification and for
/// deciding whether a failure is recoverable within the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Llm,
    Parse,
    Validation,
    Compile,
    Timeout,
    Internal,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Llm => "llm",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Compile => "compile",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The pipeline-wide error type.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("llm gateway error: {0}")]
    Llm(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("compile error: {0}")]
    Compile(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Llm(_) => ErrorKind::Llm,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Compile(_) => ErrorKind::Compile,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type ForgeResult<T> = Result<T, ForgeError>;
