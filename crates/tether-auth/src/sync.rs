//! Keeps the token cache and mirror in step with auth lifecycle events.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_session::{AuthEvent, AuthEventKind, AuthSubsystem, TokenCache, TokenMirror};

/// Background task writing sessions through to both caches.
///
/// Events are applied one at a time in arrival order, which serializes every
/// write the task makes. The task stops when dropped or when the auth event
/// stream closes.
#[derive(Debug)]
pub struct SessionSync {
    task: JoinHandle<()>,
}

impl SessionSync {
    /// Subscribe to `auth` and start the sync task.
    pub fn spawn(auth: &dyn AuthSubsystem, cache: TokenCache, mirror: Arc<TokenMirror>) -> Self {
        let mut events = auth.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => apply(&event, &cache, &mirror).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session sync lagged behind auth events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Auth event stream closed, stopping session sync");
                        break;
                    }
                }
            }
        });
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn apply(event: &AuthEvent, cache: &TokenCache, mirror: &TokenMirror) {
    match (event.kind, &event.session) {
        (
            AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed | AuthEventKind::InitialSession,
            Some(session),
        ) => {
            debug!(kind = ?event.kind, user_id = %session.user_id, "Persisting session");
            cache.write(session);
            mirror.save(session).await;
        }
        (AuthEventKind::SignedOut, _) => {
            info!("Signed out, clearing cached sessions");
            cache.clear();
            mirror.clear().await;
        }
        (kind, None) => debug!(?kind, "Auth event without a session, ignoring"),
    }
}
