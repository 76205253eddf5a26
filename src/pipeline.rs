//! # Plugin Pipeline
//!
//! Dispatches one named hook across an ordered list of plugins, honoring
//! enablement, chain-break flags, and the `continue_on_error` override.
//! `spec.md` §4.2 describes a single generic `runHook` because the source
//! language lets a plugin's hook method return anything; Rust's hook methods
//! are typed per phase ([`crate::plugin::Plugin::on_before`] returns
//! `Option<P>`, `on_success` returns `Option<R>`, and so on), so this module
//! has one dispatch function per phase instead of one generic one — same
//! shape as `PluginManager::before_request`/`after_response` in
//! `ultrafast-gateway::plugins`, which likewise has a dedicated method per
//! phase rather than a single reflective dispatcher.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::plugin::{ExecOutcome, HookKind, Plugin, PluginResult, Task};

/// Single-hook dispatch for `onBefore`.
///
/// Iterates `plugins` in order, skipping disabled ones, honoring
/// `break_chain`/`return_break_chain`, and returning the last non-`None`
/// plugin return value (the "last non-undefined wins" rule from
/// `spec.md` §9).
pub async fn dispatch_before<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    ctx: &mut ExecutionContext<P, R>,
) -> PluginResult<Option<P>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    ctx.reset_hooks_runtimes(Some(HookKind::Before));
    let mut last_return = None;

    for (index, plugin) in plugins.iter().enumerate() {
        if ctx.should_skip_plugin_hook(plugin.as_ref(), HookKind::Before) {
            continue;
        }
        if ctx.should_break_chain() {
            break;
        }

        let times = ctx.hooks_runtimes().times + 1;
        ctx.record_dispatch(plugin.plugin_name(), HookKind::Before, index, times);
        tracing::debug!(plugin = plugin.plugin_name(), hook = %HookKind::Before, index, "dispatching plugin hook");

        match plugin.on_before(ctx).await {
            Ok(Some(v)) => {
                last_return = Some(v);
                if ctx.should_break_chain_on_return() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if ctx.should_continue_on_error() => {
                tracing::warn!(plugin = plugin.plugin_name(), hook = %HookKind::Before, error = %e, "hook error swallowed by continue_on_error");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(last_return)
}

/// Single-hook dispatch for `onExec`. `task` is passed to every dispatched
/// plugin (cheap — `Task` is an `Arc`) so a plugin can wrap it in a
/// replacement without the pipeline needing to know which plugin will use it.
pub async fn dispatch_exec<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    ctx: &mut ExecutionContext<P, R>,
    task: Task<P, R>,
) -> PluginResult<Option<ExecOutcome<P, R>>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    ctx.reset_hooks_runtimes(Some(HookKind::Exec));
    let mut last_return = None;

    for (index, plugin) in plugins.iter().enumerate() {
        if ctx.should_skip_plugin_hook(plugin.as_ref(), HookKind::Exec) {
            continue;
        }
        if ctx.should_break_chain() {
            break;
        }

        let times = ctx.hooks_runtimes().times + 1;
        ctx.record_dispatch(plugin.plugin_name(), HookKind::Exec, index, times);
        tracing::debug!(plugin = plugin.plugin_name(), hook = %HookKind::Exec, index, "dispatching plugin hook");

        match plugin.on_exec(ctx, task.clone()).await {
            Ok(Some(outcome)) => {
                last_return = Some(outcome);
                if ctx.should_break_chain_on_return() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if ctx.should_continue_on_error() => {
                tracing::warn!(plugin = plugin.plugin_name(), hook = %HookKind::Exec, error = %e, "hook error swallowed by continue_on_error");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(last_return)
}

/// Single-hook dispatch for `onSuccess`.
pub async fn dispatch_success<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    ctx: &mut ExecutionContext<P, R>,
) -> PluginResult<Option<R>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    ctx.reset_hooks_runtimes(Some(HookKind::Success));
    let mut last_return = None;

    for (index, plugin) in plugins.iter().enumerate() {
        if ctx.should_skip_plugin_hook(plugin.as_ref(), HookKind::Success) {
            continue;
        }
        if ctx.should_break_chain() {
            break;
        }

        let times = ctx.hooks_runtimes().times + 1;
        ctx.record_dispatch(plugin.plugin_name(), HookKind::Success, index, times);
        tracing::debug!(plugin = plugin.plugin_name(), hook = %HookKind::Success, index, "dispatching plugin hook");

        match plugin.on_success(ctx).await {
            Ok(Some(v)) => {
                last_return = Some(v);
                if ctx.should_break_chain_on_return() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if ctx.should_continue_on_error() => {
                tracing::warn!(plugin = plugin.plugin_name(), hook = %HookKind::Success, error = %e, "hook error swallowed by continue_on_error");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(last_return)
}

/// Single-hook dispatch for `onError`. Ordinary chain-break rules apply;
/// whether a hook's error is swallowed still depends on `continue_on_error`,
/// which defaults to unset for this phase (an `onError` plugin that itself
/// errors propagates unless the caller explicitly opted in).
pub async fn dispatch_error<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    ctx: &mut ExecutionContext<P, R>,
) -> PluginResult<Option<ExecutorError>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    ctx.reset_hooks_runtimes(Some(HookKind::Error));
    let mut last_return = None;

    for (index, plugin) in plugins.iter().enumerate() {
        if ctx.should_skip_plugin_hook(plugin.as_ref(), HookKind::Error) {
            continue;
        }
        if ctx.should_break_chain() {
            break;
        }

        let times = ctx.hooks_runtimes().times + 1;
        ctx.record_dispatch(plugin.plugin_name(), HookKind::Error, index, times);
        tracing::debug!(plugin = plugin.plugin_name(), hook = %HookKind::Error, index, "dispatching plugin hook");

        match plugin.on_error(ctx).await {
            Ok(Some(v)) => {
                last_return = Some(v);
                if ctx.should_break_chain_on_return() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if ctx.should_continue_on_error() => {
                tracing::warn!(plugin = plugin.plugin_name(), hook = %HookKind::Error, error = %e, "hook error swallowed by continue_on_error");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(last_return)
}

/// Single-hook dispatch for `onFinally`. Forces `continue_on_error` for the
/// duration of this dispatch so that every plugin's cleanup hook always
/// runs, matching the finally-block guarantee from `spec.md` §4.3: "the
/// `continueOnError` override around `finallyHook` ensures cleanup hooks
/// always all run."
pub async fn dispatch_finally<P, R>(plugins: &[Arc<dyn Plugin<P, R>>], ctx: &mut ExecutionContext<P, R>)
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    ctx.reset_hooks_runtimes(Some(HookKind::Finally));
    ctx.runtimes(|r| r.continue_on_error = true);

    for (index, plugin) in plugins.iter().enumerate() {
        if ctx.should_skip_plugin_hook(plugin.as_ref(), HookKind::Finally) {
            continue;
        }
        if ctx.should_break_chain() {
            break;
        }

        let times = ctx.hooks_runtimes().times + 1;
        ctx.record_dispatch(plugin.plugin_name(), HookKind::Finally, index, times);
        tracing::debug!(plugin = plugin.plugin_name(), hook = %HookKind::Finally, index, "dispatching plugin hook");

        if let Err(e) = plugin.on_finally(ctx).await {
            tracing::warn!(plugin = plugin.plugin_name(), hook = %HookKind::Finally, error = %e, "finally hook error swallowed");
        }
    }
}

/// Multi-hook dispatch for a `before_hooks` configuration of one or more
/// names: runs [`dispatch_before`] once per entry, accumulating the last
/// non-`None` return and stopping early on `break_chain`. Non-`Before`
/// entries are logged and skipped — `LifecycleConfig::before_hooks` is
/// typed `Vec<HookKind>` to preserve the "name or ordered list of names"
/// shape from `spec.md`, but only `HookKind::Before` entries dispatch
/// `on_before` (the methods behind the other variants have incompatible
/// return types).
pub async fn run_before_hooks<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    hook_names: &[HookKind],
    ctx: &mut ExecutionContext<P, R>,
) -> PluginResult<Option<P>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let mut last = None;
    for &name in hook_names {
        if name != HookKind::Before {
            tracing::warn!(hook = %name, "before_hooks entry is not Before-shaped; skipping");
            continue;
        }
        match dispatch_before(plugins, ctx).await {
            Ok(v) => {
                if v.is_some() {
                    last = v;
                }
            }
            Err(e) => {
                if ctx.should_continue_on_error() {
                    tracing::warn!(hook = %name, error = %e, "before-hook error swallowed by continue_on_error");
                } else {
                    return Err(e);
                }
            }
        }
        if ctx.should_break_chain() {
            break;
        }
    }
    Ok(last)
}

/// Multi-hook dispatch for an `after_hooks` configuration; symmetric with
/// [`run_before_hooks`] but over [`dispatch_success`].
pub async fn run_after_hooks<P, R>(
    plugins: &[Arc<dyn Plugin<P, R>>],
    hook_names: &[HookKind],
    ctx: &mut ExecutionContext<P, R>,
) -> PluginResult<Option<R>>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    let mut last = None;
    for &name in hook_names {
        if name != HookKind::Success {
            tracing::warn!(hook = %name, "after_hooks entry is not Success-shaped; skipping");
            continue;
        }
        match dispatch_success(plugins, ctx).await {
            Ok(v) => {
                if v.is_some() {
                    last = v;
                }
            }
            Err(e) => {
                if ctx.should_continue_on_error() {
                    tracing::warn!(hook = %name, error = %e, "after-hook error swallowed by continue_on_error");
                } else {
                    return Err(e);
                }
            }
        }
        if ctx.should_break_chain() {
            break;
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use async_trait::async_trait;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Rewriter {
        delta: i32,
    }

    #[async_trait]
    impl Plugin<i32, i32> for Rewriter {
        fn plugin_name(&self) -> &str {
            "rewriter"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_before(&self, ctx: &mut ExecutionContext<i32, i32>) -> PluginResult<Option<i32>> {
            Ok(Some(ctx.parameters() + self.delta))
        }
    }

    struct BreakAfterFirst;

    #[async_trait]
    impl Plugin<i32, i32> for BreakAfterFirst {
        fn plugin_name(&self) -> &str {
            "breaker"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_before(&self, ctx: &mut ExecutionContext<i32, i32>) -> PluginResult<Option<i32>> {
            ctx.runtimes(|r| r.break_chain = true);
            Ok(Some(1))
        }
    }

    struct NeverCalled(Arc<AtomicUsize>);

    #[async_trait]
    impl Plugin<i32, i32> for NeverCalled {
        fn plugin_name(&self) -> &str {
            "never"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_before(&self, _ctx: &mut ExecutionContext<i32, i32>) -> PluginResult<Option<i32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn dispatch_before_returns_last_non_none_value() {
        let plugins: Vec<Arc<dyn Plugin<i32, i32>>> =
            vec![Arc::new(Rewriter { delta: 1 }), Arc::new(Rewriter { delta: 10 })];
        let mut ctx = ExecutionContext::new(0);
        let result = dispatch_before(&plugins, &mut ctx).await.unwrap();
        assert_eq!(result, Some(10));
        assert_eq!(ctx.hooks_runtimes().times, 2);
    }

    #[tokio::test]
    async fn break_chain_stops_before_next_plugin() {
        let counter = Arc::new(AtomicUsize::new(0));
        let plugins: Vec<Arc<dyn Plugin<i32, i32>>> =
            vec![Arc::new(BreakAfterFirst), Arc::new(NeverCalled(counter.clone()))];
        let mut ctx = ExecutionContext::new(0);
        dispatch_before(&plugins, &mut ctx).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0, "second plugin must never run");
    }

    #[tokio::test]
    async fn empty_plugin_list_returns_none_and_only_touches_hook_name() {
        let plugins: Vec<Arc<dyn Plugin<i32, i32>>> = vec![];
        let mut ctx = ExecutionContext::new(0);
        let result = dispatch_before(&plugins, &mut ctx).await.unwrap();
        assert!(result.is_none());
        assert_eq!(ctx.hooks_runtimes().hook_name, Some(HookKind::Before));
        assert_eq!(ctx.hooks_runtimes().times, 0);
    }

    struct Disabled;

    #[async_trait]
    impl Plugin<i32, i32> for Disabled {
        fn plugin_name(&self) -> &str {
            "disabled"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn enabled(&self, _hook: HookKind, _ctx: &ExecutionContext<i32, i32>) -> bool {
            false
        }
        async fn on_before(&self, _ctx: &mut ExecutionContext<i32, i32>) -> PluginResult<Option<i32>> {
            Ok(Some(999))
        }
    }

    #[tokio::test]
    async fn disabled_plugin_is_skipped_without_incrementing_times() {
        let plugins: Vec<Arc<dyn Plugin<i32, i32>>> = vec![Arc::new(Disabled)];
        let mut ctx = ExecutionContext::new(0);
        let result = dispatch_before(&plugins, &mut ctx).await.unwrap();
        assert!(result.is_none());
        assert_eq!(ctx.hooks_runtimes().times, 0);
    }
}
