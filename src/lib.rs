//! # Executor Core
//!
//! A pluggable task-execution engine: a single user-supplied task is driven
//! through a configurable lifecycle of plugin hooks (`before` → `exec` →
//! `success`/`error` → `finally`), with first-class support for
//! cancellation, timeouts, and retry.
//!
//! ## Overview
//!
//! - [`ExecutionContext`] carries one call's parameters, return value, error,
//!   and pipeline dispatch state.
//! - [`Plugin`] is the lifecycle interface every plugin implements; every
//!   hook has a no-op default, so a plugin overrides only what it needs.
//! - [`LifecycleExecutor`] orchestrates the pipeline around a task and
//!   normalizes whatever escapes into an [`ExecutorError`].
//! - [`AbortPool`]/[`AbortPlugin`] provide cancellation and timeout support,
//!   with duplicate-key pre-emption for rapid re-submits.
//! - [`RetryPlugin`] re-drives a failing task on the exec hook, subject to a
//!   predicate and a fixed inter-attempt delay.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use executor_core::{ExecutionContext, LifecycleConfig, LifecycleExecutor, Plugin, PluginResult};
//!
//! struct Doubler;
//!
//! #[async_trait]
//! impl Plugin<i32, i32> for Doubler {
//!     fn plugin_name(&self) -> &str {
//!         "doubler"
//!     }
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//!     async fn on_before(&self, ctx: &mut ExecutionContext<i32, i32>) -> PluginResult<Option<i32>> {
//!         Ok(Some(ctx.parameters() * 2))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut executor: LifecycleExecutor<i32, i32> = LifecycleExecutor::new(LifecycleConfig::default());
//! executor.use_plugin(Arc::new(Doubler)).unwrap();
//!
//! let task: executor_core::Task<i32, i32> = Arc::new(|ctx| {
//!     let value = *ctx.parameters();
//!     Box::pin(async move { Ok(value) })
//! });
//!
//! let result = executor.exec(21, task).await.unwrap();
//! assert_eq!(result, 42);
//! # }
//! ```
//!
//! ## Cancellation and Retry
//!
//! [`AbortPlugin`] and [`RetryPlugin`] are ordinary plugins: register one or
//! both alongside any application-specific plugins via
//! [`LifecycleExecutor::use_plugin`]. See each module's documentation for a
//! worked example — `abort_plugin` for timeout/cancellation wiring,
//! `retry` for retry configuration and the non-retryable-abort rule.
//!
//! ## Non-goals
//!
//! This crate has no HTTP surface, no UI, and no provider-specific adapters
//! — it is the lifecycle engine only. Logging goes through `tracing`;
//! wiring a subscriber (e.g. `tracing-subscriber`) is the embedding
//! application's responsibility, not this crate's.

pub mod abort;
pub mod abort_plugin;
pub mod context;
mod duration_serde;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod plugin;
pub mod retry;

pub use abort::{race_with_abort, AbortConfig, AbortError, AbortHandle, AbortPool, AbortPoolConfig, AbortSignal};
pub use abort_plugin::AbortPlugin;
pub use context::{ExecutionContext, HookRuntimes};
pub use error::ExecutorError;
pub use executor::{LifecycleConfig, LifecycleExecutor, Outcome, PluginRegistrationError};
pub use plugin::{BoxFuture, ExecOutcome, HookKind, Plugin, PluginResult, Task};
pub use retry::{RetryConfig, RetryPlugin, ShouldRetry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;
    use async_trait::async_trait;

    struct Uppercase;

    #[async_trait]
    impl Plugin<String, String> for Uppercase {
        fn plugin_name(&self) -> &str {
            "uppercase"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        async fn on_before(&self, ctx: &mut ExecutionContext<String, String>) -> PluginResult<Option<String>> {
            Ok(Some(ctx.parameters().to_uppercase()))
        }
    }

    #[tokio::test]
    async fn public_surface_composes_a_working_executor() {
        let mut executor: LifecycleExecutor<String, String> = LifecycleExecutor::new(LifecycleConfig::default());
        executor.use_plugin(Arc::new(Uppercase)).unwrap();

        let task: Task<String, String> = Arc::new(|ctx| {
            let value = ctx.parameters().clone();
            Box::pin(async move { Ok(value) })
        });

        let result = executor.exec("hello".to_string(), task).await.unwrap();
        assert_eq!(result, "HELLO");
    }
}
