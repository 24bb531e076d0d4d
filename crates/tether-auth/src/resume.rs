//! App lifecycle handling.
//!
//! After the app comes back from the background, requests issued before
//! suspension may still be hanging on dead sockets, or may resolve into a
//! state that has moved on. On every resume the coordinator aborts them all
//! and swaps in a fresh transport, then optionally warms the auth session in
//! the background.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_client::{ClientHandle, Recreated};
use tether_config::TetherConfig;
use tether_session::{SharedAuth, TokenCache, TokenMirror, with_timeout};

/// Environment signal from the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycleEvent {
    Resumed,
    Backgrounded,
}

/// Resume behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeSettings {
    pub warm_session: bool,
    pub warm_delay: Duration,
    /// Deadline for the warm-up `get_session`.
    pub warm_deadline: Duration,
}

impl Default for ResumeSettings {
    fn default() -> Self {
        Self::from(&TetherConfig::default())
    }
}

impl From<&TetherConfig> for ResumeSettings {
    fn from(config: &TetherConfig) -> Self {
        Self {
            warm_session: config.resume.warm_session,
            warm_delay: config.resume.warm_delay(),
            warm_deadline: config.hydration.direct(),
        }
    }
}

/// Reacts to app lifecycle events.
#[derive(Debug)]
pub struct ResumeCoordinator {
    client: ClientHandle,
    auth: SharedAuth,
    cache: TokenCache,
    mirror: Arc<TokenMirror>,
    settings: ResumeSettings,
    warmup: Mutex<Option<JoinHandle<()>>>,
}

impl ResumeCoordinator {
    pub fn new(
        client: ClientHandle,
        auth: SharedAuth,
        cache: TokenCache,
        mirror: Arc<TokenMirror>,
    ) -> Self {
        Self {
            client,
            auth,
            cache,
            mirror,
            settings: ResumeSettings::default(),
            warmup: Mutex::new(None),
        }
    }

    pub fn with_settings(mut self, settings: ResumeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Process start: copy the mirror back into the primary cache if the
    /// primary lost its session, then recreate the client so it sees it.
    pub async fn cold_start(&self) -> Recreated {
        let restored = self.mirror.write_back(&self.cache).await;
        let recreated = self.client.recreate();
        info!(
            restored,
            generation = recreated.handle.generation(),
            "Cold start complete"
        );
        recreated
    }

    /// Abort everything in flight, recreate the client and schedule a
    /// warm-up. Returns the number of aborted requests.
    pub fn on_resume(&self) -> usize {
        let Recreated { aborted, .. } = self.client.recreate();
        info!(aborted, "App resumed, data client recreated");

        let mut warmup = self.warmup.lock();
        if let Some(previous) = warmup.take() {
            debug!("Cancelling pending session warm-up");
            previous.abort();
        }
        if self.settings.warm_session {
            *warmup = Some(self.spawn_warmup());
        }
        aborted
    }

    /// Handle one lifecycle event.
    pub fn handle(&self, event: AppLifecycleEvent) {
        match event {
            AppLifecycleEvent::Resumed => {
                self.on_resume();
            }
            AppLifecycleEvent::Backgrounded => debug!("App backgrounded"),
        }
    }

    /// Whether a warm-up is scheduled or running.
    pub fn warmup_pending(&self) -> bool {
        self.warmup
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Consume lifecycle events until the channel closes.
    pub fn listen(self: Arc<Self>, mut events: mpsc::Receiver<AppLifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event);
            }
            debug!("Lifecycle channel closed");
        })
    }

    fn spawn_warmup(&self) -> JoinHandle<()> {
        let auth = self.auth.clone();
        let delay = self.settings.warm_delay;
        let deadline = self.settings.warm_deadline;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match with_timeout(auth.get_session(), deadline, "getSession-warm").await {
                Ok(Ok(Some(_))) => debug!("Session warmed"),
                Ok(Ok(None)) => debug!("No session to warm"),
                Ok(Err(e)) => warn!(error = %e, "Session warm-up failed"),
                Err(timeout) => warn!(%timeout, "Session warm-up timed out"),
            }
        })
    }
}

impl Drop for ResumeCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.warmup.lock().take() {
            task.abort();
        }
    }
}
