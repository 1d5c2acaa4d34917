//! In-process transport to a reference [`AuthorityState`].
//!
//! Cloned handles share one authority. Latency, outages and restarts can be
//! injected, which is what the guest-side tests and the local demo need.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::AuthorityError;
use crate::state::{AuthorityState, PersistedState};
use crate::transport::{RowChange, RpcTransport};

#[derive(Debug)]
struct Inner {
    state: Mutex<AuthorityState>,
    offline: AtomicBool,
    latency: Option<Duration>,
    log: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct LocalTransport {
    inner: Arc<Inner>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(AuthorityState::default())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalTransport {
    pub fn new(state: AuthorityState) -> Self {
        Self::build(state, None)
    }

    /// Every call sleeps for `latency` before it reaches the authority.
    pub fn with_latency(state: AuthorityState, latency: Duration) -> Self {
        Self::build(state, Some(latency))
    }

    fn build(state: AuthorityState, latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                offline: AtomicBool::new(false),
                latency,
                log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Restart the authority, keeping only what it had persisted.
    pub fn restart(&self) {
        let mut state = lock(&self.inner.state);
        let persisted = state.persisted();
        state.restart(Some(persisted));
    }

    /// Restart the authority with nothing persisted.
    pub fn restart_cold(&self) {
        lock(&self.inner.state).restart(None::<PersistedState>);
    }

    /// Run `f` against the authority state directly.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut AuthorityState) -> R) -> R {
        f(&mut lock(&self.inner.state))
    }

    /// Method names of every call that reached the authority.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.inner.log).clone()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        lock(&self.inner.log).iter().filter(|m| *m == method).count()
    }

    fn dispatch(inner: &Inner, method: &str, params: &Value) -> Result<Value, AuthorityError> {
        if inner.offline.load(Ordering::SeqCst) {
            return Err(AuthorityError::Transport("authority offline".into()));
        }
        lock(&inner.log).push(method.to_string());
        lock(&inner.state).dispatch(method, params)
    }
}

impl RpcTransport for LocalTransport {
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, AuthorityError>> + Send {
        let inner = Arc::clone(&self.inner);
        let method = method.to_string();
        async move {
            if let Some(latency) = inner.latency {
                tokio::time::sleep(latency).await;
            }
            Self::dispatch(&inner, &method, &params)
        }
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<RowChange>> {
        Some(lock(&self.inner.state).subscribe())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
