//! # Retry Plugin
//!
//! [`RetryPlugin`] re-drives a failing task on the `exec` hook: it returns a
//! replacement [`crate::plugin::Task`] that repeatedly invokes the original
//! task until it succeeds, `should_retry` rejects the error, or attempts are
//! exhausted. Modeled on the attempt-loop-with-delay shape of
//! `ultrafast-gateway::error_handling::ErrorHandler::retry_with_backoff`,
//! narrowed to a fixed inter-attempt delay per `spec.md` §4.5 (the original's
//! exponential-backoff cap is not part of this plugin's contract).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::plugin::{ExecOutcome, Plugin, PluginResult, Task};

/// Decides whether a failed attempt should be retried. Boxed so a plugin
/// instance can be built with a closure, the same shape as
/// `AbortConfig::on_aborted` in `crate::abort`.
pub type ShouldRetry = Arc<dyn Fn(&ExecutorError) -> bool + Send + Sync>;

/// Configuration for one [`RetryPlugin`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Total invocation count is `max_retries + 1`. Defaults to 3.
    pub max_retries: u32,
    /// Delay awaited between attempts. Defaults to 0 (no delay, suitable for
    /// deterministic tests).
    pub retry_delay: Duration,
    /// Defaults to "retry any error that is not an abort" — see
    /// [`crate::abort::is_abort_error`].
    pub should_retry: ShouldRetry,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::ZERO,
            should_retry: Arc::new(|e: &ExecutorError| !e.is_abort()),
        }
    }
}

/// A lifecycle plugin that re-drives the task on failure.
///
/// Registered on the exec hook only — every other hook keeps the trait's
/// default no-op body. `only_one` is not set: nothing prevents an embedder
/// from stacking retry plugins with different predicates, though doing so is
/// unusual.
pub struct RetryPlugin {
    name: String,
    config: RetryConfig,
}

impl RetryPlugin {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            name: "retry".to_string(),
            config,
        }
    }

    /// Register under a distinct name — useful when stacking more than one
    /// retry plugin (e.g. a fast inner retry and a slower outer one).
    pub fn named(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

#[async_trait]
impl<P, R> Plugin<P, R> for RetryPlugin
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

    async fn on_exec(
        &self,
        _ctx: &mut ExecutionContext<P, R>,
        task: Task<P, R>,
    ) -> PluginResult<Option<ExecOutcome<P, R>>> {
        let max_retries = self.config.max_retries;
        let retry_delay = self.config.retry_delay;
        let should_retry = self.config.should_retry.clone();
        let plugin_name = self.name.clone();

        let replacement: Task<P, R> = Arc::new(move |ctx| {
            let task = task.clone();
            let should_retry = should_retry.clone();
            let plugin_name = plugin_name.clone();
            Box::pin(async move {
                let mut attempt = 0u32;
                loop {
                    match task(ctx).await {
                        Ok(value) => return Ok(value),
                        Err(error) => {
                            let exhausted = attempt >= max_retries;
                            let retryable = should_retry(&error);

                            if exhausted || !retryable {
                                if exhausted && retryable {
                                    tracing::warn!(
                                        plugin = plugin_name.as_str(),
                                        attempts = attempt + 1,
                                        error = %error,
                                        "retry attempts exhausted, rethrowing last error unchanged"
                                    );
                                }
                                return Err(error);
                            }

                            tracing::debug!(
                                plugin = plugin_name.as_str(),
                                attempt = attempt + 1,
                                error = %error,
                                delay_ms = retry_delay.as_millis() as u64,
                                "retrying after failed attempt"
                            );

                            if retry_delay > Duration::ZERO {
                                tokio::time::sleep(retry_delay).await;
                            }
                            attempt += 1;
                        }
                    }
                }
            })
        });

        Ok(Some(ExecOutcome::ReplacementTask(replacement)))
    }
}
