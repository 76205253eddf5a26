//! # Abort Plugin
//!
//! [`AbortPlugin`] exposes an [`AbortPool`] as a lifecycle plugin: `on_before`
//! registers the call under a pool key and injects a [`CancellationToken`]
//! back into the parameters, `on_success` cleans the entry up, and `on_error`
//! makes sure a now-cancelled entry is removed and its error carries the
//! registered key. `spec.md` §4.4.a describes this wiring in terms of a
//! pipeline-visible `AbortController`; the Rust rendering threads a
//! `CancellationToken` through `P` instead, since there's no ambient
//! request-scoped object every task implicitly shares the way there is in
//! the source runtime.
//!
//! Because `P` is generic and opaque to this crate, `AbortPlugin` can't reach
//! into a caller's parameter struct on its own — it's built with an
//! `extract`/`inject_signal` pair, the same "caller supplies the accessor"
//! shape `ultrafast-gateway::plugins::mod` uses for its
//! `PluginHooks`/`PluginLifecycle` callbacks.

use std::any::Any;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::abort::{AbortConfig, AbortPool, AbortPoolConfig, AbortSignal};
use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::plugin::{Plugin, PluginResult};

/// The pool key this call was registered under, stashed in the context's
/// extension slot so `on_success`/`on_error` can find it without
/// re-deriving it (re-deriving would mint a fresh auto-generated key if the
/// caller's `AbortConfig` carried neither `id` nor `request_id`).
struct AbortKey(String);

/// Exposes an [`AbortPool`] as a plugin on `P`.
///
/// `extract` reads the call's [`AbortConfig`] out of its parameters;
/// `inject_signal` writes the registered [`CancellationToken`] back in. Both
/// are plain closures rather than a trait so a caller can adapt any `P`
/// without implementing anything.
pub struct AbortPlugin<P, R> {
    name: String,
    pool: AbortPool,
    extract: Box<dyn Fn(&P) -> AbortConfig + Send + Sync>,
    inject_signal: Box<dyn Fn(&mut P, AbortSignal) + Send + Sync>,
    _marker: PhantomData<fn() -> R>,
}

impl<P, R> AbortPlugin<P, R> {
    pub fn new(
        pool_config: AbortPoolConfig,
        extract: impl Fn(&P) -> AbortConfig + Send + Sync + 'static,
        inject_signal: impl Fn(&mut P, AbortSignal) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: "abort".to_string(),
            pool: AbortPool::new(pool_config),
            extract: Box::new(extract),
            inject_signal: Box::new(inject_signal),
            _marker: PhantomData,
        }
    }

    /// The underlying pool, so an embedder can call `abort`/`abort_all` from
    /// outside an `exec` call (e.g. a user navigating away cancels every
    /// in-flight request tagged with their session id).
    pub fn pool(&self) -> &AbortPool {
        &self.pool
    }
}

#[async_trait]
impl<P, R> Plugin<P, R> for AbortPlugin<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn on_before(&self, ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<P>> {
        let mut config = (self.extract)(ctx.parameters());

        // Pin down the key before registering so a later re-derivation (there
        // isn't one here, but future callers of `generate_key` shouldn't mint
        // a second key for the same call) agrees with what `register` used.
        let key = self.pool.generate_key(&config);
        config.request_id = Some(key.clone());

        let handle = self.pool.register(config);
        ctx.ext_insert(AbortKey(handle.key.clone()));

        let mut params = ctx.parameters().clone();
        (self.inject_signal)(&mut params, handle.signal);
        Ok(Some(params))
    }

    async fn on_success(&self, ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<R>> {
        if let Some(AbortKey(key)) = ctx.ext_remove::<AbortKey>() {
            self.pool.cleanup(&key);
        }
        Ok(None)
    }

    async fn on_error(&self, ctx: &mut ExecutionContext<P, R>) -> PluginResult<Option<ExecutorError>> {
        let Some(AbortKey(key)) = ctx.ext_remove::<AbortKey>() else {
            return Ok(None);
        };

        let effective = match ctx.error() {
            Some(ExecutorError::Abort(abort_error)) if abort_error.abort_id.is_none() => {
                let mut abort_error = abort_error.clone();
                abort_error.abort_id = Some(key.clone());
                Some(ExecutorError::Abort(abort_error))
            }
            _ => None,
        };

        // Whether the failure was this call's own abort or something else
        // entirely, the slot must not outlive the call.
        self.pool.cleanup(&key);

        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::is_abort_error;
    use crate::executor::{LifecycleConfig, LifecycleExecutor};
    use crate::plugin::Task;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::advance;

    #[derive(Clone, Default)]
    struct Params {
        request_id: Option<String>,
        signal: Option<AbortSignal>,
    }

    fn plugin(pool_config: AbortPoolConfig) -> Arc<AbortPlugin<Params, &'static str>> {
        Arc::new(AbortPlugin::new(
            pool_config,
            |p: &Params| AbortConfig {
                request_id: p.request_id.clone(),
                ..Default::default()
            },
            |p: &mut Params, signal: AbortSignal| {
                p.signal = Some(signal);
            },
        ))
    }

    #[tokio::test]
    async fn s4_successful_call_cleans_up_its_pool_entry() {
        let abort_plugin = plugin(AbortPoolConfig::default());
        let pool = abort_plugin.pool().clone();

        let mut executor: LifecycleExecutor<Params, &'static str> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(abort_plugin).unwrap();

        let task: Task<Params, &'static str> = Arc::new(|_ctx| Box::pin(async { Ok("done") }));
        let result = executor
            .exec(
                Params {
                    request_id: Some("r1".to_string()),
                    ..Default::default()
                },
                task,
            )
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert!(pool.is_empty(), "cleanup must remove the entry on success");
    }

    #[tokio::test]
    async fn on_before_injects_a_signal_the_task_can_observe() {
        let abort_plugin = plugin(AbortPoolConfig::default());

        let mut executor: LifecycleExecutor<Params, bool> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(abort_plugin).unwrap();

        let task: Task<Params, bool> =
            Arc::new(|ctx| {
                let has_signal = ctx.parameters().signal.is_some();
                Box::pin(async move { Ok(has_signal) })
            });

        let result = executor
            .exec(
                Params {
                    request_id: Some("r2".to_string()),
                    ..Default::default()
                },
                task,
            )
            .await
            .unwrap();

        assert!(result, "task must observe an injected cancellation signal");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abort_surfaces_as_a_classifiable_abort_error() {
        let abort_plugin = plugin(AbortPoolConfig {
            pool_name: "timeout-test".to_string(),
            default_timeout: Some(Duration::from_millis(50)),
        });
        let pool = abort_plugin.pool().clone();

        let mut executor: LifecycleExecutor<Params, ()> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(abort_plugin).unwrap();

        let task: Task<Params, ()> = Arc::new(|ctx| {
            let signal = ctx.parameters().signal.clone();
            Box::pin(async move {
                crate::abort::race_with_abort(std::future::pending::<()>(), signal.as_ref())
                    .await
                    .map_err(ExecutorError::from)
            })
        });

        let exec_future = executor.exec(
            Params {
                request_id: Some("r3".to_string()),
                ..Default::default()
            },
            task,
        );
        tokio::pin!(exec_future);

        advance(Duration::from_millis(100)).await;
        let err = exec_future.await.unwrap_err();

        assert!(is_abort_error(&err));
        if let ExecutorError::Abort(abort_error) = &err {
            assert_eq!(abort_error.abort_id.as_deref(), Some("r3"));
            assert!(
                abort_error.is_timeout(),
                "a pool-timeout abort must be classifiable as a timeout, not just as an abort"
            );
            assert_eq!(abort_error.timeout, Some(Duration::from_millis(50)));
        } else {
            panic!("expected an abort error");
        }
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn manual_abort_on_the_pool_handle_is_observed_by_a_pending_task() {
        let abort_plugin = plugin(AbortPoolConfig::default());
        let pool = abort_plugin.pool().clone();

        let mut executor: LifecycleExecutor<Params, ()> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(abort_plugin).unwrap();

        let task: Task<Params, ()> = Arc::new(|ctx| {
            let signal = ctx.parameters().signal.clone();
            Box::pin(async move {
                crate::abort::race_with_abort(std::future::pending::<()>(), signal.as_ref())
                    .await
                    .map_err(ExecutorError::from)
            })
        });

        let exec_future = executor.exec(
            Params {
                request_id: Some("r4".to_string()),
                ..Default::default()
            },
            task,
        );
        tokio::pin!(exec_future);

        tokio::task::yield_now().await;
        pool.abort("r4");

        let err = exec_future.await.unwrap_err();
        assert!(is_abort_error(&err));
        if let ExecutorError::Abort(abort_error) = &err {
            assert!(
                !abort_error.is_timeout(),
                "a manually-aborted entry must never be classified as a timeout"
            );
        } else {
            panic!("expected an abort error");
        }
    }
}
