//! # Abort Pool
//!
//! A named registry of cancellation tokens with duplicate-key pre-emption,
//! optional per-entry timeouts, and a [`race_with_abort`] helper for
//! defending signal-unaware operations. This is the cancellation subsystem
//! described in `SPEC_FULL.md` §4.4 — exposed to a [`crate::executor::LifecycleExecutor`]
//! as a plugin through [`crate::abort_plugin::AbortPlugin`].
//!
//! The registry is keyed by string: `request_id`, falling back to `id`,
//! falling back to an auto-generated `"<pool_name>-<counter>"`. Registering
//! an already-live key pre-empts (cancels) the existing entry before
//! installing the new one — this is how the pool avoids leaking resources
//! on rapid re-submits (e.g. typeahead search).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error produced by the cancellation subsystem.
///
/// `timeout` is set (and positive) only for timer-driven aborts; manual
/// aborts leave it `None`, which is what [`AbortError::is_timeout`] tests.
#[derive(Debug, Clone)]
pub struct AbortError {
    pub message: String,
    pub abort_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl AbortError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            abort_id: None,
            timeout: None,
        }
    }

    pub fn with_abort_id(mut self, abort_id: impl Into<String>) -> Self {
        self.abort_id = Some(abort_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `true` iff this abort was fired by a timer rather than a manual
    /// `abort()` call.
    pub fn is_timeout(&self) -> bool {
        matches!(self.timeout, Some(t) if t > Duration::ZERO)
    }

    /// Human-readable summary: message, request id, and timeout if present.
    pub fn description(&self) -> String {
        let mut parts = vec![self.message.clone()];
        if let Some(id) = &self.abort_id {
            parts.push(format!("abort_id={id}"));
        }
        if let Some(t) = self.timeout {
            parts.push(format!("timeout={t:?}"));
        }
        parts.join(" | ")
    }
}

impl fmt::Display for AbortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for AbortError {}

/// Caller-supplied registration record for one abort-pool entry.
///
/// `on_aborted`/`on_aborted_timeout` receive a *sanitized* clone of this
/// config (callbacks stripped) to avoid recursive callback invocation —
/// see `SPEC_FULL.md` §4.4.
#[derive(Clone)]
pub struct AbortConfig {
    pub id: Option<String>,
    pub request_id: Option<String>,
    pub abort_timeout: Option<Duration>,
    /// An externally-owned token the caller wants synchronized into this
    /// registration: cancelling it also cancels the pool's own signal.
    pub signal: Option<CancellationToken>,
    pub on_aborted: Option<Arc<dyn Fn(&AbortConfig) + Send + Sync>>,
    pub on_aborted_timeout: Option<Arc<dyn Fn(&AbortConfig) + Send + Sync>>,
}

impl fmt::Debug for AbortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortConfig")
            .field("id", &self.id)
            .field("request_id", &self.request_id)
            .field("abort_timeout", &self.abort_timeout)
            .finish()
    }
}

impl Default for AbortConfig {
    fn default() -> Self {
        Self {
            id: None,
            request_id: None,
            abort_timeout: None,
            signal: None,
            on_aborted: None,
            on_aborted_timeout: None,
        }
    }
}

impl AbortConfig {
    fn sanitized(&self) -> Self {
        Self {
            id: self.id.clone(),
            request_id: self.request_id.clone(),
            abort_timeout: self.abort_timeout,
            signal: None,
            on_aborted: None,
            on_aborted_timeout: None,
        }
    }
}

/// The observable half of an abort-pool registration.
///
/// Pairs a [`CancellationToken`] with the [`AbortError`] that caused its
/// cancellation, once it has one. Both [`AbortPool::abort`] and the
/// per-entry timeout timer record their reason here *before* cancelling the
/// token, so anything racing against this signal (see [`race_with_abort`])
/// or reading it back afterwards (see
/// [`crate::abort_plugin::AbortPlugin::on_error`]) can tell a timed-out
/// entry from a manually aborted one instead of observing an identical
/// generic error either way. Cheaply `Clone` — both fields are
/// reference-counted.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<AbortError>>>,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The reason this signal was cancelled — `None` until [`Self::fire`]
    /// has run. Read after the fact by `race_with_abort` and by
    /// `AbortPlugin::on_error` to recover whether the firing entry was a
    /// timeout or a manual abort.
    pub fn reason(&self) -> Option<AbortError> {
        self.reason.lock().unwrap().clone()
    }

    /// Record `reason` (first writer wins) and cancel the token. Recording
    /// before cancelling means anything already waiting on
    /// `cancelled()`/`is_cancelled()` observes a populated `reason()` as
    /// soon as it wakes.
    fn fire(&self, reason: AbortError) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.token.cancel();
    }
}

/// The signal/controller pair handed back from [`AbortPool::register`].
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pub key: String,
    pub signal: AbortSignal,
}

struct PoolEntry {
    signal: AbortSignal,
    timeout_handle: Option<JoinHandle<()>>,
    config: AbortConfig,
}

/// Configuration for an [`AbortPool`], shaped the way
/// `ultrafast-gateway::config` shapes its own config structs — see
/// `SPEC_FULL.md` §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortPoolConfig {
    pub pool_name: String,
    #[serde(with = "crate::duration_serde::option")]
    pub default_timeout: Option<Duration>,
}

impl Default for AbortPoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "default".to_string(),
            default_timeout: None,
        }
    }
}

struct Inner {
    pool_name: String,
    entries: DashMap<String, PoolEntry>,
    counter: AtomicU64,
    default_timeout: Option<Duration>,
}

/// Named registry of live cancellation tokens.
///
/// Cheaply `Clone`-able: internally an `Arc`, so a handle can be kept
/// alongside the executor (to call `abort_all` from outside an `exec` call)
/// while also being registered as a plugin.
#[derive(Clone)]
pub struct AbortPool {
    inner: Arc<Inner>,
}

impl AbortPool {
    pub fn new(config: AbortPoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool_name: config.pool_name,
                entries: DashMap::new(),
                counter: AtomicU64::new(0),
                default_timeout: config.default_timeout,
            }),
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.inner.pool_name
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// `generateKey` from `spec.md` §4.4: `request_id`, else `id`, else an
    /// auto-generated `"<pool_name>-<counter>"`.
    pub fn generate_key(&self, config: &AbortConfig) -> String {
        if let Some(rid) = &config.request_id {
            return rid.clone();
        }
        if let Some(id) = &config.id {
            return id.clone();
        }
        let n = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.inner.pool_name, n)
    }

    /// Register a new entry for `config`, pre-empting any existing entry
    /// under the same key.
    pub fn register(&self, config: AbortConfig) -> AbortHandle {
        let key = self.generate_key(&config);

        if self.inner.entries.contains_key(&key) {
            tracing::debug!(pool = %self.inner.pool_name, key = %key, "pre-empting existing abort-pool entry");
            self.abort(&key);
        }

        let signal = AbortSignal::new();

        if let Some(external) = &config.signal {
            let internal = signal.clone();
            let external = external.clone();
            tokio::spawn(async move {
                external.cancelled().await;
                internal.fire(AbortError::new("The operation was aborted"));
            });
        }

        let effective_timeout = config.abort_timeout.or(self.inner.default_timeout);

        let handle_slot: Option<JoinHandle<()>> = match effective_timeout {
            Some(t) if t > Duration::ZERO => {
                let inner = Arc::clone(&self.inner);
                let key_for_timer = key.clone();
                let timer_signal = signal.clone();
                let config_for_timer = config.clone();
                Some(tokio::spawn(async move {
                    tokio::time::sleep(t).await;
                    if timer_signal.is_cancelled() {
                        return;
                    }
                    if let Some((_, entry)) = inner.entries.remove(&key_for_timer) {
                        entry.signal.fire(
                            AbortError::new("The operation timed out")
                                .with_abort_id(key_for_timer.clone())
                                .with_timeout(t),
                        );
                        tracing::warn!(
                            pool = %inner.pool_name,
                            key = %key_for_timer,
                            timeout_ms = t.as_millis() as u64,
                            "abort-pool entry timed out"
                        );
                        if let Some(cb) = &config_for_timer.on_aborted_timeout {
                            cb(&config_for_timer.sanitized());
                        }
                    }
                }))
            }
            _ => None,
        };

        tracing::debug!(pool = %self.inner.pool_name, key = %key, "registered abort-pool entry");

        self.inner.entries.insert(
            key.clone(),
            PoolEntry {
                signal: signal.clone(),
                timeout_handle: handle_slot,
                config,
            },
        );

        AbortHandle { key, signal }
    }

    /// Manually abort the entry for `key` (or via `AbortConfig`'s key).
    /// Returns `true` iff an entry existed. A callback that panics/propagates
    /// is not caught — it surfaces to the caller of `abort`, matching
    /// `spec.md`'s "does not roll back the abort" rule.
    pub fn abort(&self, key: &str) -> bool {
        let Some((_, entry)) = self.inner.entries.remove(key) else {
            return false;
        };

        if let Some(h) = entry.timeout_handle {
            h.abort();
        }
        entry
            .signal
            .fire(AbortError::new("The operation was aborted").with_abort_id(key.to_string()));

        tracing::info!(pool = %self.inner.pool_name, key = %key, "aborted abort-pool entry");

        if let Some(cb) = &entry.config.on_aborted {
            cb(&entry.config.sanitized());
        }
        true
    }

    /// Abort every live entry; the pool is empty afterwards.
    pub fn abort_all(&self) {
        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for key in keys {
            self.abort(&key);
        }
    }

    /// Remove an entry without firing its token — used after a successful
    /// completion so the pool doesn't leak the slot.
    pub fn cleanup(&self, key: &str) -> bool {
        let Some((_, entry)) = self.inner.entries.remove(key) else {
            return false;
        };
        if let Some(h) = entry.timeout_handle {
            h.abort();
        }
        tracing::debug!(pool = %self.inner.pool_name, key = %key, "cleaned up abort-pool entry");
        true
    }
}

/// Race `fut` against `signal`. Returns `fut`'s value unchanged if `signal`
/// is `None`. If `signal` is already cancelled, rejects immediately with its
/// recorded [`AbortSignal::reason`] (falling back to a generic message if
/// somehow unset). Otherwise installs a one-shot abort listener that rejects
/// the same way; the listener is dropped (and so removed) on both race
/// outcomes — `tokio::select!` drops the losing branch's future, which for
/// `CancellationToken::cancelled()` deregisters its waiter.
pub async fn race_with_abort<F, T>(fut: F, signal: Option<&AbortSignal>) -> Result<T, AbortError>
where
    F: std::future::Future<Output = T>,
{
    let Some(signal) = signal else {
        return Ok(fut.await);
    };

    if signal.is_cancelled() {
        return Err(signal
            .reason()
            .unwrap_or_else(|| AbortError::new("The operation was aborted")));
    }

    tokio::select! {
        value = fut => Ok(value),
        _ = signal.cancelled() => Err(signal
            .reason()
            .unwrap_or_else(|| AbortError::new("The operation was aborted"))),
    }
}

/// Classification helper mirroring `spec.md` §4.4's `isAbortError`: matches
/// an [`AbortError`] directly or an [`crate::error::ExecutorError::Abort`].
pub fn is_abort_error(err: &crate::error::ExecutorError) -> bool {
    err.is_abort()
}
