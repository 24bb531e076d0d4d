//! Interface to the auth subsystem.
//!
//! Tether never talks to the token endpoint itself. It consumes three
//! operations from whatever auth library the application uses: "get current
//! session", "establish a session from a token pair", and a lifecycle event
//! stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::session::Session;

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Errors reported by the auth subsystem.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The auth service answered with an error.
    #[error("Auth API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The auth service could not be reached.
    #[error("Auth network error: {0}")]
    Network(String),
}

impl AuthError {
    /// True when the error says the credentials themselves are unusable
    /// (refresh token revoked, expired or malformed), as opposed to a
    /// transient failure. Only these errors justify clearing persisted tokens.
    pub fn is_invalid_credential(&self) -> bool {
        match self {
            AuthError::Api { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("invalid") || message.contains("refresh")
            }
            AuthError::Network(_) => false,
        }
    }
}

/// Auth lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    TokenRefreshed,
    SignedOut,
    InitialSession,
}

/// A lifecycle event emitted by the auth subsystem.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Operations consumed from the auth subsystem.
#[async_trait]
pub trait AuthSubsystem: Send + Sync + std::fmt::Debug {
    /// The auth library's own "get current session". May hang under lock
    /// contention; callers always wrap it in a deadline.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Establish a live session from a persisted token pair.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Session>, AuthError>;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Shared auth subsystem.
pub type SharedAuth = Arc<dyn AuthSubsystem>;

// ============================================================================
// InMemoryAuth (for testing)
// ============================================================================

/// How [`InMemoryAuth::set_session`] responds.
#[derive(Debug, Clone)]
pub enum SetSessionBehavior {
    /// Issue this session (and emit `SignedIn`).
    Issue(Session),
    /// Reject with an API error carrying this message.
    Reject(String),
    /// Fail with a network error.
    Unreachable,
}

/// Scriptable in-memory auth subsystem for tests.
#[derive(Debug)]
pub struct InMemoryAuth {
    current: RwLock<Option<Session>>,
    get_latency: RwLock<Option<Duration>>,
    set_latency: RwLock<Option<Duration>>,
    set_behavior: RwLock<SetSessionBehavior>,
    events: broadcast::Sender<AuthEvent>,
    get_calls: AtomicU32,
    set_calls: AtomicU32,
}

impl InMemoryAuth {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(None),
            get_latency: RwLock::new(None),
            set_latency: RwLock::new(None),
            set_behavior: RwLock::new(SetSessionBehavior::Unreachable),
            events,
            get_calls: AtomicU32::new(0),
            set_calls: AtomicU32::new(0),
        }
    }

    /// Start with a current session.
    pub fn with_session(self, session: Session) -> Self {
        *self.current.write() = Some(session);
        self
    }

    /// Delay `get_session` by `latency` (use a long one to simulate a hang).
    pub fn with_get_latency(self, latency: Duration) -> Self {
        *self.get_latency.write() = Some(latency);
        self
    }

    /// Delay `set_session` by `latency`.
    pub fn with_set_latency(self, latency: Duration) -> Self {
        *self.set_latency.write() = Some(latency);
        self
    }

    /// Script `set_session`.
    pub fn with_set_behavior(self, behavior: SetSessionBehavior) -> Self {
        *self.set_behavior.write() = behavior;
        self
    }

    pub fn set_get_latency(&self, latency: Option<Duration>) {
        *self.get_latency.write() = latency;
    }

    /// Sign in and emit `SignedIn`.
    pub fn sign_in(&self, session: Session) {
        *self.current.write() = Some(session.clone());
        self.emit(AuthEventKind::SignedIn, Some(session));
    }

    /// Replace the session and emit `TokenRefreshed`.
    pub fn refresh(&self, session: Session) {
        *self.current.write() = Some(session.clone());
        self.emit(AuthEventKind::TokenRefreshed, Some(session));
    }

    /// Sign out and emit `SignedOut`.
    pub fn sign_out(&self) {
        *self.current.write() = None;
        self.emit(AuthEventKind::SignedOut, None);
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::SeqCst)
    }

    async fn wait(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for InMemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthSubsystem for InMemoryAuth {
    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.get_latency.read();
        Self::wait(latency).await;
        Ok(self.current.read().clone())
    }

    async fn set_session(
        &self,
        _access_token: &str,
        _refresh_token: &str,
    ) -> Result<Option<Session>, AuthError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.set_latency.read();
        Self::wait(latency).await;

        let behavior = self.set_behavior.read().clone();
        match behavior {
            SetSessionBehavior::Issue(session) => {
                self.sign_in(session.clone());
                Ok(Some(session))
            }
            SetSessionBehavior::Reject(message) => Err(AuthError::Api {
                status: 400,
                message,
            }),
            SetSessionBehavior::Unreachable => {
                Err(AuthError::Network("auth service unreachable".to_string()))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
