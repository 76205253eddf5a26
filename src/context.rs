//! # Execution Context
//!
//! [`ExecutionContext`] is the single piece of mutable state threaded through
//! one `exec` call: the task's parameters, its eventual return value or
//! error, and a snapshot of where the plugin pipeline currently stands
//! ([`HookRuntimes`]). Everything else in this crate — the pipeline, the
//! executor, the abort plugin, the retry plugin — reads and writes this
//! context; nothing outside it is allowed to reach the live runtimes state,
//! only owned snapshots.
//!
//! Modeled on `RequestContext` in `ultrafast-gateway` (a per-call struct with
//! accessor methods, built once per request and threaded through the
//! pipeline) and on the private-state-behind-accessors shape in
//! `ultrafast-models-sdk::circuit_breaker`.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::ExecutorError;
use crate::plugin::{HookKind, Plugin};

/// A read-only snapshot of the pipeline's current dispatch state.
///
/// Returned by value from [`ExecutionContext::hooks_runtimes`] — there is no
/// way to obtain a mutable reference to the live state, which is how this
/// crate satisfies `spec.md` §3.1's "frozen" requirement without needing
/// interior-mutability tricks or a runtime freeze check.
#[derive(Debug, Clone, Default)]
pub struct HookRuntimes {
    /// Name of the plugin currently (or most recently) executing.
    pub plugin_name: Option<String>,
    /// Position of that plugin in the ordered list.
    pub plugin_index: Option<usize>,
    /// Hook currently being dispatched.
    pub hook_name: Option<HookKind>,
    /// Per-hook plugin execution counter; reset whenever the pipeline
    /// switches to a new hook name.
    pub times: u32,
    /// If set by a plugin, the pipeline stops before invoking the next one.
    pub break_chain: bool,
    /// If set and a plugin has just produced a value, the pipeline stops
    /// after that plugin.
    pub return_break_chain: bool,
    /// If set, a hook invocation that errors is swallowed and dispatch
    /// continues — used for `finally`-style dispatch.
    pub continue_on_error: bool,
}

/// Per-invocation state for one `exec` call.
///
/// `parameters`, `return_value`, `error`, and the runtimes snapshot are all
/// private fields reachable only through the methods below — there is no
/// `pub` field an embedder could bypass to mutate or alias the live state.
pub struct ExecutionContext<P, R> {
    parameters: P,
    return_value: Option<R>,
    error: Option<ExecutorError>,
    runtimes: HookRuntimes,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl<P, R> ExecutionContext<P, R>
where
    P: Clone,
{
    /// Construct a context, cloning `parameters` to decouple the context
    /// from whatever the caller continues to hold. This is the Rust
    /// rendering of `spec.md` §3.1's shallow clone — `Clone` already does
    /// the right one-level-copy thing for `Vec`, `HashMap`, newtype structs,
    /// `chrono::DateTime`, etc.
    pub fn new(parameters: P) -> Self {
        Self {
            parameters: parameters.clone(),
            return_value: None,
            error: None,
            runtimes: HookRuntimes::default(),
            extensions: HashMap::new(),
        }
    }

    /// Current parameters. Read-only: the only way to change them is
    /// [`Self::set_parameters`].
    pub fn parameters(&self) -> &P {
        &self.parameters
    }

    /// Replace the parameters with a clone of `parameters` — how `onBefore`
    /// hooks mutate inputs without the context aliasing the caller's value.
    pub fn set_parameters(&mut self, parameters: P) {
        self.parameters = parameters.clone();
    }

    /// The task's (or an overriding plugin's) result, if one has been set.
    pub fn return_value(&self) -> Option<&R> {
        self.return_value.as_ref()
    }

    /// Take ownership of the return value, leaving `None` behind.
    pub fn take_return_value(&mut self) -> Option<R> {
        self.return_value.take()
    }

    pub fn set_return_value(&mut self, value: R) {
        self.return_value = Some(value);
    }

    /// Last observed error, if any. `error` and `return_value` are
    /// independent: during `finally` neither implies anything about the
    /// other.
    pub fn error(&self) -> Option<&ExecutorError> {
        self.error.as_ref()
    }

    /// Store `error` as the context's current error. Accepts any
    /// `ExecutorError` value as-is — no additional wrapping happens here;
    /// normalization is the executor's job at the outer boundary
    /// (`spec.md` §3.4).
    pub fn set_error(&mut self, error: ExecutorError) {
        self.error = Some(error);
    }

    /// A frozen snapshot of the current dispatch state.
    pub fn hooks_runtimes(&self) -> HookRuntimes {
        self.runtimes.clone()
    }

    /// Merge an update into the runtimes store. The only way to mutate
    /// runtimes state; there is no public field to assign into directly.
    pub fn runtimes(&mut self, update: impl FnOnce(&mut HookRuntimes)) {
        update(&mut self.runtimes);
    }

    /// Convenience for recording the most recent non-`None` plugin return
    /// value's presence — callers track the value itself locally (the
    /// pipeline is generic over differently-typed hook returns; see
    /// `pipeline.rs`), this only updates the bookkeeping fields.
    pub fn record_dispatch(&mut self, plugin_name: &str, hook: HookKind, index: usize, times: u32) {
        self.runtimes(|r| {
            r.plugin_name = Some(plugin_name.to_string());
            r.hook_name = Some(hook);
            r.plugin_index = Some(index);
            r.times = times;
        });
    }

    /// `resetHooksRuntimes` from `spec.md` §4.1.
    ///
    /// With `Some(hook)`: clears `times`, `break_chain`, `return_break_chain`,
    /// `plugin_name`, and `plugin_index`, then sets `hook_name`.
    /// `continue_on_error` is deliberately preserved across this reset —
    /// the executor sets it before dispatching `onFinally` (`spec.md` §4.3
    /// step 7), and `onFinally`'s own dispatch calls this same reset as its
    /// first step; clearing `continue_on_error` here would undo that and
    /// break the finally-always-runs guarantee.
    ///
    /// With `None`: clears every field (used by [`Self::reset`]).
    pub fn reset_hooks_runtimes(&mut self, hook_name: Option<HookKind>) {
        match hook_name {
            Some(hook) => {
                let continue_on_error = self.runtimes.continue_on_error;
                self.runtimes = HookRuntimes {
                    hook_name: Some(hook),
                    continue_on_error,
                    ..HookRuntimes::default()
                };
            }
            None => {
                self.runtimes = HookRuntimes::default();
            }
        }
    }

    /// Clears `hooksRuntimes`, `returnValue`, and `error` — called at the
    /// end of every `exec` call.
    pub fn reset(&mut self) {
        self.return_value = None;
        self.error = None;
        self.runtimes = HookRuntimes::default();
        self.extensions.clear();
    }

    pub fn should_break_chain(&self) -> bool {
        self.runtimes.break_chain
    }

    pub fn should_break_chain_on_return(&self) -> bool {
        self.runtimes.return_break_chain
    }

    pub fn should_continue_on_error(&self) -> bool {
        self.runtimes.continue_on_error
    }

    /// `true` iff `plugin` should be skipped for `hook` on this call —
    /// either it is disabled for this hook, or (the Rust rendering of "lacks
    /// a callable for `hookName`") it declines to participate via
    /// [`Plugin::enabled`].
    pub fn should_skip_plugin_hook(&self, plugin: &dyn Plugin<P, R>, hook: HookKind) -> bool {
        !plugin.enabled(hook, self)
    }

    /// Per-call scratch space, one slot per type, for a plugin to carry its
    /// own state across hook phases within a single `exec` call without
    /// reaching into `parameters`/`return_value`/`error`. Modeled on
    /// `http::Extensions` (the request-scoped type map `axum`, and so
    /// `ultrafast-gateway`, builds its own request context on top of) —
    /// [`crate::abort_plugin::AbortPlugin`] is the one plugin in this crate
    /// that needs it, to remember the pool key it registered in `on_before`
    /// by the time `on_success`/`on_error` run.
    pub fn ext_insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.extensions
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn ext_get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions.get(&TypeId::of::<T>()).and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn ext_remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }
}
