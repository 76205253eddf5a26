//! # Lifecycle Executor
//!
//! [`LifecycleExecutor`] orchestrates the complete lifecycle — `before` →
//! `exec` → `after` → `error` → `finally` — around a single user-supplied
//! task. Modeled on the before/run/after wrapper shape in
//! `ultrafast-gateway::middleware::plugin_middleware` and the
//! log-then-convert-then-propagate error path in
//! `ultrafast-gateway::error_handling::ErrorHandler`.
//!
//! Two surfaces are offered, matching `spec.md` §4.3: [`LifecycleExecutor::exec`]
//! propagates the normalized [`ExecutorError`] via `Result`'s `?` (the Rust
//! rendering of "throws"), while [`LifecycleExecutor::exec_no_error`] always
//! returns successfully, embedding the outcome in [`Outcome`] (the Rust
//! rendering of "returns error-as-value").

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::pipeline;
use crate::plugin::{ExecOutcome, HookKind, Plugin, Task};

/// Hook-name configuration for one [`LifecycleExecutor`]. `error_hook` and
/// `finally_hook` are fixed to `HookKind::Error`/`HookKind::Finally` per
/// `spec.md` §4.3 and so are not configurable fields here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Defaults to `[HookKind::Before]`.
    pub before_hooks: Vec<HookKind>,
    /// Defaults to `[HookKind::Success]`.
    pub after_hooks: Vec<HookKind>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            before_hooks: vec![HookKind::Before],
            after_hooks: vec![HookKind::Success],
        }
    }
}

/// Raised synchronously by [`LifecycleExecutor::use_plugin`] — a
/// configuration error, never wrapped into [`ExecutorError`] per
/// `spec.md` §7's taxonomy ("Configuration errors ... raised synchronously
/// as a plain error; never wrapped").
#[derive(Debug, Error)]
pub enum PluginRegistrationError {
    /// `only_one` rejected a duplicate, matched by identity, `plugin_name`,
    /// or concrete type (the union rule from `spec.md` §9's Open Questions).
    #[error("plugin \"{0}\" declares only_one and a matching plugin is already registered")]
    Duplicate(String),
}

/// The outcome of [`LifecycleExecutor::exec_no_error`]: always returned
/// successfully, with failure embedded as a value instead of propagated
/// through `Result`'s `?` operator.
#[derive(Debug)]
pub enum Outcome<R> {
    Success(R),
    Failure(ExecutorError),
}

impl<R> Outcome<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn ok(self) -> Option<R> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn err(self) -> Option<ExecutorError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}

/// Orchestrates `before` → `exec` → `after` → `error` → `finally` around a
/// user task. Plugins are owned by the executor (`use_plugin` only appends)
/// and stored as `Arc<dyn Plugin<P, R>>` so a stateful plugin — the abort
/// pool, notably — can be registered once and its `Arc` handle kept
/// elsewhere (e.g. to call `abort_all` between `exec` calls).
pub struct LifecycleExecutor<P, R> {
    plugins: Vec<Arc<dyn Plugin<P, R>>>,
    config: LifecycleConfig,
}

impl<P, R> LifecycleExecutor<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            plugins: Vec::new(),
            config,
        }
    }

    /// Register a plugin, preserving insertion order. Rejects a duplicate
    /// when the new plugin declares `only_one()` and an already-registered
    /// plugin matches by `Arc` identity, equal `plugin_name`, or equal
    /// concrete type — the union of the three checks per `spec.md` §9.
    pub fn use_plugin(&mut self, plugin: Arc<dyn Plugin<P, R>>) -> Result<(), PluginRegistrationError> {
        if plugin.only_one() {
            let conflicts = self.plugins.iter().any(|existing| {
                Arc::ptr_eq(existing, &plugin)
                    || existing.plugin_name() == plugin.plugin_name()
                    || existing.as_any().type_id() == plugin.as_any().type_id()
            });
            if conflicts {
                return Err(PluginRegistrationError::Duplicate(plugin.plugin_name().to_string()));
            }
        }

        tracing::debug!(plugin = plugin.plugin_name(), "registered plugin");
        self.plugins.push(plugin);
        Ok(())
    }

    /// `exec(data, task)`: run the full lifecycle with `data` as the
    /// context's initial parameters. Propagates the normalized
    /// [`ExecutorError`] on failure.
    pub async fn exec(&self, data: P, task: Task<P, R>) -> Result<R, ExecutorError> {
        let mut ctx = ExecutionContext::new(data);
        let result = self.run_lifecycle(&mut ctx, task).await;
        self.run_finally(&mut ctx).await;
        ctx.reset();
        result
    }

    /// `exec(data, task)` that never propagates through `?` — the error is
    /// embedded in the returned [`Outcome`] instead.
    pub async fn exec_no_error(&self, data: P, task: Task<P, R>) -> Outcome<R> {
        match self.exec(data, task).await {
            Ok(v) => Outcome::Success(v),
            Err(e) => Outcome::Failure(e),
        }
    }

    async fn run_lifecycle(&self, ctx: &mut ExecutionContext<P, R>, task: Task<P, R>) -> Result<R, ExecutorError> {
        match self.run_steps(ctx, task).await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.run_error_path(ctx, e).await),
        }
    }

    async fn run_steps(&self, ctx: &mut ExecutionContext<P, R>, task: Task<P, R>) -> Result<R, ExecutorError> {
        if let Some(new_params) = pipeline::run_before_hooks(&self.plugins, &self.config.before_hooks, ctx).await? {
            ctx.set_parameters(new_params);
        }

        let exec_outcome = pipeline::dispatch_exec(&self.plugins, ctx, task.clone()).await?;
        let exec_times = ctx.hooks_runtimes().times;

        // `Task` is typed to always return `ExecutorError` (see `plugin.rs`), so
        // the "wrap unless already an `ExecutorError`" rule from `spec.md` §7
        // is enforced by construction here: there is nothing left to
        // normalize at this call site, only at the boundary where a task
        // author converts a foreign error via `ExecutorError::wrap_async`.
        //
        // This follows `spec.md` §4.3 step 3's three-way branch literally:
        // `exec_times` (the `times` counter from `HookRuntimes`, per §3.1
        // "counts plugins that actually executed the current hook") is
        // checked first, independently of whether a plugin produced a value.
        // Only the `exec_times > 0` + no-outcome corner is a deliberate,
        // documented proxy rather than the literal rule — see SPEC_FULL.md §9.
        let value = if exec_times == 0 {
            task(ctx).await?
        } else {
            match exec_outcome {
                Some(ExecOutcome::ReplacementTask(replacement)) => replacement(ctx).await?,
                Some(ExecOutcome::Value(v)) => v,
                None => {
                    // A plugin's `on_exec` ran (`exec_times > 0`) but produced
                    // no outcome. The trait's default no-op body returns this
                    // same `Ok(None)` as an explicit "I decline to
                    // intervene", so this case is indistinguishable from "no
                    // plugin implemented the hook" without extending the
                    // `Plugin` trait with participation tracking no test in
                    // `spec.md` §8 depends on. The literal source behavior
                    // would skip the task and return its absent `returnValue`
                    // as the final result — impossible here since `R` has no
                    // general "absent" value — so this falls back to running
                    // the task, same as the `exec_times == 0` branch.
                    task(ctx).await?
                }
            }
        };

        match pipeline::run_after_hooks(&self.plugins, &self.config.after_hooks, ctx).await? {
            Some(overridden) => Ok(overridden),
            None => Ok(value),
        }
    }

    /// `spec.md` §4.3's error path: record the error, run `onError`
    /// (whose non-`None` return becomes the effective error), then rethrow
    /// unchanged if it's already an `ExecutorError`, else wrap it.
    async fn run_error_path(&self, ctx: &mut ExecutionContext<P, R>, error: ExecutorError) -> ExecutorError {
        ctx.set_error(error);

        match pipeline::dispatch_error(&self.plugins, ctx).await {
            Ok(Some(effective)) => ctx.set_error(effective),
            Ok(None) => {}
            Err(e) => ctx.set_error(e),
        }

        let final_error = ctx.error().cloned().unwrap_or_else(|| {
            ExecutorError::domain("UNKNOWN_ASYNC_ERROR", "error path reached with no recorded error")
        });

        tracing::error!(id = final_error.id(), message = final_error.message(), "exec failed");
        final_error
    }

    async fn run_finally(&self, ctx: &mut ExecutionContext<P, R>) {
        ctx.runtimes(|r| r.continue_on_error = true);
        pipeline::dispatch_finally(&self.plugins, ctx).await;
    }
}

impl<P, R> LifecycleExecutor<P, R>
where
    P: Default + Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    /// `exec(task)`: run the full lifecycle with empty (`Default`)
    /// parameters.
    pub async fn exec_default(&self, task: Task<P, R>) -> Result<R, ExecutorError> {
        self.exec(P::default(), task).await
    }

    /// `exec(task)` variant of [`LifecycleExecutor::exec_no_error`].
    pub async fn exec_no_error_default(&self, task: Task<P, R>) -> Outcome<R> {
        self.exec_no_error(P::default(), task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Rewriter(i32);

    #[async_trait]
    impl Plugin<i32, i32> for Rewriter {
        fn plugin_name(&self) -> &str {
            "rewriter"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_before(&self, ctx: &mut ExecutionContext<i32, i32>) -> crate::plugin::PluginResult<Option<i32>> {
            Ok(Some(ctx.parameters() + self.0))
        }
    }

    #[tokio::test]
    async fn s1_before_hook_rewrites_parameters() {
        let mut executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(Rewriter(1))).unwrap();

        let task: Task<i32, i32> = Arc::new(|ctx| {
            let v = *ctx.parameters();
            Box::pin(async move { Ok(v) })
        });

        let result = executor.exec(1, task).await.unwrap();
        assert_eq!(result, 2);
    }

    struct CacheHit;

    #[async_trait]
    impl Plugin<i32, &'static str> for CacheHit {
        fn plugin_name(&self) -> &str {
            "cache"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_exec(
            &self,
            _ctx: &mut ExecutionContext<i32, &'static str>,
            _task: Task<i32, &'static str>,
        ) -> crate::plugin::PluginResult<Option<ExecOutcome<i32, &'static str>>> {
            Ok(Some(ExecOutcome::Value("cached")))
        }
    }

    #[tokio::test]
    async fn s2_on_exec_injects_cache_hit_and_skips_task() {
        let mut executor: LifecycleExecutor<i32, &'static str> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(CacheHit)).unwrap();

        let called = Arc::new(AtomicU32::new(0));
        let called2 = called.clone();
        let task: Task<i32, &'static str> = Arc::new(move |_ctx| {
            called2.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok("fresh") })
        });

        let result = executor.exec_default(task).await.unwrap();
        assert_eq!(result, "cached");
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    struct CounterA(Arc<AtomicU32>);
    struct CounterB(Arc<AtomicU32>);

    #[async_trait]
    impl Plugin<i32, i32> for CounterA {
        fn plugin_name(&self) -> &str {
            "a"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_finally(&self, _ctx: &mut ExecutionContext<i32, i32>) -> crate::plugin::PluginResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl Plugin<i32, i32> for CounterB {
        fn plugin_name(&self) -> &str {
            "b"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_finally(&self, _ctx: &mut ExecutionContext<i32, i32>) -> crate::plugin::PluginResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn s6_finally_always_runs_for_every_plugin_even_on_task_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(CounterA(counter.clone()))).unwrap();
        executor.use_plugin(Arc::new(CounterB(counter.clone()))).unwrap();

        let task: Task<i32, i32> = Arc::new(|_ctx| Box::pin(async { Err(ExecutorError::domain("X", "boom")) }));

        let result = executor.exec_default(task).await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    struct FailingFinally;

    #[async_trait]
    impl Plugin<i32, i32> for FailingFinally {
        fn plugin_name(&self) -> &str {
            "failing-finally"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_finally(&self, _ctx: &mut ExecutionContext<i32, i32>) -> crate::plugin::PluginResult<()> {
            Err(ExecutorError::domain("FINALLY_BOOM", "cleanup exploded"))
        }
    }

    #[tokio::test]
    async fn finally_plugin_error_does_not_stop_later_finally_plugins_or_change_outcome() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(FailingFinally)).unwrap();
        executor.use_plugin(Arc::new(CounterB(counter.clone()))).unwrap();

        let task: Task<i32, i32> = Arc::new(|_ctx| Box::pin(async { Err(ExecutorError::domain("X", "boom")) }));

        let result = executor.exec_default(task).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().id(), "X");
        assert_eq!(counter.load(Ordering::SeqCst), 1, "B's finally must still run");
    }

    #[tokio::test]
    async fn use_plugin_rejects_only_one_duplicate_by_name() {
        struct Tagged;
        #[async_trait]
        impl Plugin<i32, i32> for Tagged {
            fn plugin_name(&self) -> &str {
                "singleton"
            }
            fn only_one(&self) -> bool {
                true
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(Tagged)).unwrap();
        let err = executor.use_plugin(Arc::new(Tagged)).unwrap_err();
        assert!(matches!(err, PluginRegistrationError::Duplicate(_)));
    }

    #[tokio::test]
    async fn exec_no_error_embeds_failure_as_a_value() {
        let executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        let task: Task<i32, i32> = Arc::new(|_ctx| Box::pin(async { Err(ExecutorError::domain("X", "boom")) }));
        let outcome = executor.exec_no_error_default(task).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.err().unwrap().id(), "X");
    }

    #[tokio::test]
    async fn already_executor_error_passes_through_unchanged() {
        let executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
        let task: Task<i32, i32> = Arc::new(|_ctx| Box::pin(async { Err(ExecutorError::domain("REQUEST_ERROR", "bad")) }));
        let err = executor.exec_default(task).await.unwrap_err();
        assert_eq!(err.id(), "REQUEST_ERROR");
    }
}
