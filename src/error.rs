//! # Error Taxonomy
//!
//! This module defines the error type that every observable failure from the
//! executor core eventually normalizes into. Unlike an open set of ad-hoc
//! error structs, every [`ExecutorError`] carries a stable `id` so callers can
//! route on category without pattern-matching message text.
//!
//! ## Taxonomy
//!
//! - `UnknownSync` / `UnknownAsync` — generic wrappers for a failure that
//!   wasn't already an [`ExecutorError`] when it crossed the executor
//!   boundary.
//! - `Abort` — produced by the cancellation subsystem ([`crate::abort`]).
//! - `Domain` — an open set: plugins and callers mint their own `id`s (e.g.
//!   `"REQUEST_ERROR"`) by constructing `ExecutorError::domain(..)`.
//!
//! `id()` never changes after construction, and two errors sharing an `id`
//! are considered equivalent for routing purposes even if their messages or
//! causes differ.

use std::sync::Arc;

use thiserror::Error;

use crate::abort::AbortError;

/// The stable, machine-routable error type produced at the executor
/// boundary.
///
/// `ExecutorError` is `Clone` because the lifecycle executor needs to hand a
/// copy to `on_error` plugin hooks while still holding the original to
/// potentially rethrow unchanged (§4.3 error path in `SPEC_FULL.md`). The
/// cause chain is `Arc<ExecutorError>` rather than a boxed `dyn Error` so
/// cloning a deeply-wrapped error stays O(1).
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    /// Unclassified failure raised synchronously (the hook or task value
    /// thrown was not already an `ExecutorError`).
    #[error("{message}")]
    UnknownSync {
        message: String,
        cause: Option<Arc<ExecutorError>>,
        /// The foreign error this was wrapped from, kept around as a plain
        /// `dyn Error` so it survives past the `anyhow::Error` boundary that
        /// produced it.
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
    /// Unclassified failure raised from an async hook or task.
    #[error("{message}")]
    UnknownAsync {
        message: String,
        cause: Option<Arc<ExecutorError>>,
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
    /// Produced by the abort pool or a signal-aware operation.
    #[error("abort: {0}")]
    Abort(AbortError),
    /// An open-set, caller- or plugin-defined category.
    #[error("{message}")]
    Domain {
        id: String,
        message: String,
        cause: Option<Arc<ExecutorError>>,
    },
}

impl ExecutorError {
    /// Stable, machine-readable category. Never changes after construction.
    pub fn id(&self) -> &str {
        match self {
            ExecutorError::UnknownSync { .. } => "UNKNOWN_SYNC_ERROR",
            ExecutorError::UnknownAsync { .. } => "UNKNOWN_ASYNC_ERROR",
            ExecutorError::Abort(_) => "ABORT_ERROR",
            ExecutorError::Domain { id, .. } => id.as_str(),
        }
    }

    /// Human-readable message: resolved from the cause's own message when
    /// the cause is a throwable, falling back to `id` otherwise.
    pub fn message(&self) -> &str {
        match self {
            ExecutorError::UnknownSync { message, .. }
            | ExecutorError::UnknownAsync { message, .. }
            | ExecutorError::Domain { message, .. } => message.as_str(),
            ExecutorError::Abort(e) => e.message.as_str(),
        }
    }

    /// The original cause, when it differs from the resolved message.
    pub fn cause(&self) -> Option<&Arc<ExecutorError>> {
        match self {
            ExecutorError::UnknownSync { cause, .. }
            | ExecutorError::UnknownAsync { cause, .. }
            | ExecutorError::Domain { cause, .. } => cause.as_ref(),
            ExecutorError::Abort(_) => None,
        }
    }

    /// The foreign error a `wrap_sync`/`wrap_async`/`wrap`/`From` conversion
    /// was built from, when this is an `UnknownSync`/`UnknownAsync` and the
    /// conversion captured one. `Domain` and hand-built `UnknownSync`/
    /// `UnknownAsync` values (e.g. via a `Default`-style construction) have
    /// no foreign source and return `None`.
    pub fn source_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ExecutorError::UnknownSync { source, .. } | ExecutorError::UnknownAsync { source, .. } => {
                source.as_deref()
            }
            _ => None,
        }
    }

    /// Construct a caller/plugin-defined domain error.
    pub fn domain(id: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutorError::Domain {
            id: id.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an existing `ExecutorError` as the cause of a new domain error,
    /// e.g. when a retry gives up and reports a `"RETRY_EXHAUSTED"` domain
    /// error whose cause is the last attempt's failure.
    pub fn domain_with_cause(
        id: impl Into<String>,
        message: impl Into<String>,
        cause: ExecutorError,
    ) -> Self {
        ExecutorError::Domain {
            id: id.into(),
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Apply the "wrap unless already an `ExecutorError`" rule from
    /// `spec.md` §7 to a synchronously-raised failure.
    pub fn wrap_sync(cause: impl Into<anyhow::Error>) -> Self {
        let cause = cause.into();
        let message = cause.to_string();
        let source: Box<dyn std::error::Error + Send + Sync> = cause.into();
        ExecutorError::UnknownSync {
            message,
            cause: None,
            source: Some(Arc::from(source)),
        }
    }

    /// Apply the "wrap unless already an `ExecutorError`" rule from
    /// `spec.md` §7 to an asynchronously-raised failure (hook, task, or
    /// `on_error` override). If `cause` is already an `ExecutorError` it is
    /// passed through unchanged rather than double-wrapped.
    pub fn wrap_async(cause: impl Into<anyhow::Error>) -> Self {
        let cause = cause.into();
        match cause.downcast::<ExecutorError>() {
            Ok(already) => already,
            Err(cause) => {
                let message = cause.to_string();
                let source: Box<dyn std::error::Error + Send + Sync> = cause.into();
                ExecutorError::UnknownAsync {
                    message,
                    cause: None,
                    source: Some(Arc::from(source)),
                }
            }
        }
    }

    /// Generic wrap constructor matching the "wrap unless already an
    /// `ExecutorError`" rule without committing to sync or async framing;
    /// an alias for [`ExecutorError::wrap_async`].
    pub fn wrap(cause: impl Into<anyhow::Error>) -> Self {
        Self::wrap_async(cause)
    }

    /// `true` iff this error originated from the cancellation subsystem.
    pub fn is_abort(&self) -> bool {
        matches!(self, ExecutorError::Abort(_))
    }
}

impl From<AbortError> for ExecutorError {
    fn from(e: AbortError) -> Self {
        ExecutorError::Abort(e)
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        ExecutorError::wrap_async(err)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for ExecutorError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ExecutorError::wrap_async(anyhow::Error::from(err))
    }
}
