//! Registry of in-flight requests.
//!
//! Every outbound call registers a cancellation token here and is raced
//! against a per-request deadline. The registry belongs to one transport
//! generation: when the client is recreated the old registry is retired,
//! which cancels everything it still tracks and refuses new registrations,
//! so nothing issued under a superseded generation can resolve afterwards.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_session::TimeoutError;

/// Failure of a registered request.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The deadline fired first; the call was cancelled.
    #[error(transparent)]
    Timeout(TimeoutError),

    /// Cancelled via `cancel`, `abort_all` or retirement.
    #[error("Request aborted: {label} (generation {generation})")]
    Aborted { label: String, generation: u64 },

    /// The transport itself failed.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug)]
struct RegistryInner {
    tag: String,
    generation: u64,
    next_id: AtomicU64,
    retired: AtomicBool,
    active: Mutex<HashMap<u64, CancellationToken>>,
}

impl RegistryInner {
    fn remove(&self, id: u64) -> Option<CancellationToken> {
        self.active.lock().remove(&id)
    }
}

/// Handle to one registered request.
///
/// Cancelling is idempotent: cancelling a settled or already cancelled
/// request does nothing.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    id: u64,
    generation: u64,
    token: CancellationToken,
    registry: Weak<RegistryInner>,
}

impl InFlightRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel this request. Returns whether it was still registered.
    pub fn cancel(&self) -> bool {
        let was_active = self
            .registry
            .upgrade()
            .and_then(|registry| registry.remove(self.id))
            .is_some();
        self.token.cancel();
        was_active
    }
}

/// Removes the registry entry when the request settles, however it settles.
struct SettleGuard<'a> {
    registry: &'a RegistryInner,
    id: u64,
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Tracks in-flight requests for one transport generation.
#[derive(Debug, Clone)]
pub struct AbortRegistry {
    inner: Arc<RegistryInner>,
}

impl AbortRegistry {
    /// Create a registry. `tag` is used in log lines.
    pub fn new(tag: impl Into<String>, generation: u64) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tag: tag.into(),
                generation,
                next_id: AtomicU64::new(1),
                retired: AtomicBool::new(false),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Number of requests currently registered.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    pub fn is_retired(&self) -> bool {
        self.inner.retired.load(Ordering::SeqCst)
    }

    /// Register a request and get its handle.
    ///
    /// On a retired registry the returned handle is already cancelled.
    pub fn register(&self) -> InFlightRequest {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        {
            // The retired check and the insert share the lock `retire` holds.
            let mut active = self.inner.active.lock();
            if self.is_retired() {
                token.cancel();
            } else {
                active.insert(id, token.clone());
            }
        }
        InFlightRequest {
            id,
            generation: self.inner.generation,
            token,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Cancel one request by id. Returns whether it was registered.
    pub fn cancel(&self, id: u64) -> bool {
        match self.inner.remove(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered request and return how many there were.
    pub fn abort_all(&self) -> usize {
        self.drain(false)
    }

    /// Abort everything and refuse further registrations.
    pub fn retire(&self) -> usize {
        self.drain(true)
    }

    fn drain(&self, retire: bool) -> usize {
        let drained: Vec<CancellationToken> = {
            let mut active = self.inner.active.lock();
            if retire {
                self.inner.retired.store(true, Ordering::SeqCst);
            }
            active.drain().map(|(_, token)| token).collect()
        };
        let count = drained.len();
        if count > 0 {
            info!(
                tag = %self.inner.tag,
                generation = self.inner.generation,
                count,
                "Aborting in-flight requests"
            );
        }
        for token in drained {
            token.cancel();
        }
        count
    }

    /// Run `future` as a registered request with a deadline.
    ///
    /// The future is dropped (cancelling whatever I/O it owns) when the
    /// deadline fires or the request is aborted.
    pub async fn run<F>(
        &self,
        label: &str,
        timeout: Duration,
        future: F,
    ) -> Result<F::Output, FetchError>
    where
        F: Future,
    {
        let request = self.register();
        let _guard = SettleGuard {
            registry: &self.inner,
            id: request.id,
        };
        let aborted = || FetchError::Aborted {
            label: label.to_string(),
            generation: self.inner.generation,
        };

        if request.is_cancelled() {
            debug!(tag = %self.inner.tag, label, "Registry retired, refusing request");
            return Err(aborted());
        }

        tokio::select! {
            biased;
            _ = request.token.cancelled() => {
                debug!(tag = %self.inner.tag, label, "Request aborted");
                Err(aborted())
            }
            output = future => Ok(output),
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    tag = %self.inner.tag,
                    label,
                    timeout_ms = timeout.as_millis() as u64,
                    "Aborting request after deadline"
                );
                request.token.cancel();
                Err(FetchError::Timeout(TimeoutError::new(label, timeout)))
            }
        }
    }

    /// Execute an HTTP request through the registry.
    pub async fn fetch(
        &self,
        http: &reqwest::Client,
        request: reqwest::Request,
        timeout: Duration,
    ) -> Result<reqwest::Response, FetchError> {
        let label = request.url().path().to_string();
        let response = self.run(&label, timeout, http.execute(request)).await??;
        Ok(response)
    }
}
