//! # Plugin Contract
//!
//! The lifecycle interface every plugin implements, plus the handful of
//! supporting types it's expressed in terms of: [`HookKind`] (the closed set
//! of pipeline phases), [`Task`] (the boxed unit of work a plugin may
//! replace or skip), and [`ExecOutcome`] (the typed form of "a plugin
//! supplied a value instead of running the task, or handed back a
//! replacement task to run in its place").
//!
//! Modeled on `PluginHooks`/`PluginLifecycle` in `ultrafast-gateway`'s plugin
//! module: every hook has a default no-op body, so a plugin only overrides
//! the phases it cares about.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type returned by every plugin hook.
pub type PluginResult<T> = Result<T, ExecutorError>;

/// The unit of work an executor runs, and that a plugin may replace
/// (`on_exec` returning `ExecOutcome::ReplacementTask`) or skip entirely
/// (`ExecOutcome::Value`).
///
/// The `for<'a>` bound lets the returned future borrow `ctx` for the
/// duration of the call (rather than requiring a `'static` future that could
/// never reference it) — this is what lets [`crate::retry::RetryPlugin`]
/// build a replacement task that awaits the original task, passing the same
/// `ctx` through, several times in a loop.
pub type Task<P, R> =
    Arc<dyn for<'a> Fn(&'a mut ExecutionContext<P, R>) -> BoxFuture<'a, Result<R, ExecutorError>> + Send + Sync>;

/// The closed set of pipeline phases a plugin can hook into. Narrowed from
/// an open hook-name string because Rust's static dispatch has no analog of
/// invoking an arbitrary named method discovered at runtime — see
/// `SPEC_FULL.md` §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HookKind {
    Before,
    Exec,
    Success,
    Error,
    Finally,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::Exec => "exec",
            HookKind::Success => "success",
            HookKind::Error => "error",
            HookKind::Finally => "finally",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `on_exec` produced when it chose to intervene, instead of letting
/// the pipeline run the original task.
pub enum ExecOutcome<P, R> {
    /// A final value — the task is not run at all.
    Value(R),
    /// A replacement task to run instead of (or wrapping) the original —
    /// this is how [`crate::retry::RetryPlugin`] re-drives a failing task.
    ReplacementTask(Task<P, R>),
}

impl<P, R> std::fmt::Debug for ExecOutcome<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecOutcome::Value(_) => f.write_str("ExecOutcome::Value(..)"),
            ExecOutcome::ReplacementTask(_) => f.write_str("ExecOutcome::ReplacementTask(..)"),
        }
    }
}

/// A pluggable lifecycle participant in the execution pipeline.
///
/// Every method has a default no-op implementation, so a plugin need only
/// override the hooks relevant to it. `plugin_name` is the one required
/// method.
#[async_trait]
pub trait Plugin<P, R>: Send + Sync
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// Stable identifier used for logging and `only_one` de-duplication.
    fn plugin_name(&self) -> &str;

    /// When `true`, registering a second plugin whose identity, name, or
    /// concrete type matches this one is rejected — see
    /// `LifecycleExecutor::use_plugin`.
    fn only_one(&self) -> bool {
        false
    }

    /// Gate for whether this plugin participates in `hook` at all, given
    /// the current context. Checked before every dispatch.
    fn enabled(&self, _hook: HookKind, _ctx: &ExecutionContext<P, R>) -> bool {
        true
    }

    /// Support for `only_one`'s type-identity check (`SPEC_FULL.md` §9).
    fn as_any(&self) -> &dyn Any;

    async fn on_before(&self, _ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<P>> {
        Ok(None)
    }

    async fn on_exec(
        &self,
        _ctx: &mut ExecutionContext<P, R>,
        _task: Task<P, R>,
    ) -> PluginResult<Option<ExecOutcome<P, R>>> {
        Ok(None)
    }

    async fn on_success(&self, _ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<R>> {
        Ok(None)
    }

    async fn on_error(&self, _ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<ExecutorError>> {
        Ok(None)
    }

    async fn on_finally(&self, _ctx: &mut ExecutionContext<P, R>) -> PluginResult<()> {
        Ok(())
    }
}
