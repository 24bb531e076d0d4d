//! Staged session hydration.
//!
//! The auth library's own "get session" can hang indefinitely on a device
//! whose local storage is contended, and a hung call looks exactly like a
//! signed-out user. The hydrator tries progressively more independent
//! sources, each under its own deadline, and stops at the first that yields
//! a session:
//!
//! 1. **Direct**: the auth library's `get_session`
//! 2. **Cache hydration**: `set_session` from the primary cache's tokens
//! 3. **Mirror restoration**: `set_session` from the durable mirror
//! 4. **Verification**: one short final `get_session`
//!
//! If all four fail the result is `None`. A run never takes longer than the
//! sum of the stage deadlines.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use tether_config::HydrationConfig;
use tether_session::{Session, SharedAuth, TokenCache, TokenMirror, with_timeout};

/// Which stage produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationStage {
    Direct,
    CacheHydration,
    MirrorRestore,
    Verification,
}

impl HydrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HydrationStage::Direct => "direct",
            HydrationStage::CacheHydration => "cache-hydration",
            HydrationStage::MirrorRestore => "mirror-restore",
            HydrationStage::Verification => "verification",
        }
    }
}

impl fmt::Display for HydrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a traced hydration run.
#[derive(Debug, Clone)]
pub struct Hydration {
    pub session: Option<Session>,
    /// `None` when every stage failed.
    pub stage: Option<HydrationStage>,
    pub elapsed: Duration,
}

/// Per-stage deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDeadlines {
    pub direct: Duration,
    pub cache_hydration: Duration,
    pub mirror_restore: Duration,
    pub verification: Duration,
    pub user_lookup: Duration,
}

impl Default for StageDeadlines {
    fn default() -> Self {
        Self::from(&HydrationConfig::default())
    }
}

impl From<&HydrationConfig> for StageDeadlines {
    fn from(config: &HydrationConfig) -> Self {
        Self {
            direct: config.direct(),
            cache_hydration: config.cache_hydration(),
            mirror_restore: config.mirror_restore(),
            verification: config.verification(),
            user_lookup: config.user_lookup(),
        }
    }
}

impl StageDeadlines {
    /// Upper bound on a full run.
    pub fn total(&self) -> Duration {
        self.direct + self.cache_hydration + self.mirror_restore + self.verification
    }
}

/// Obtains a usable session without trusting any single source.
#[derive(Debug, Clone)]
pub struct SessionHydrator {
    auth: SharedAuth,
    cache: TokenCache,
    mirror: Arc<TokenMirror>,
    deadlines: StageDeadlines,
}

impl SessionHydrator {
    pub fn new(auth: SharedAuth, cache: TokenCache, mirror: Arc<TokenMirror>) -> Self {
        Self {
            auth,
            cache,
            mirror,
            deadlines: StageDeadlines::default(),
        }
    }

    pub fn with_deadlines(mut self, deadlines: StageDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn deadlines(&self) -> &StageDeadlines {
        &self.deadlines
    }

    /// Run the stages and return the first session found.
    pub async fn hydrate(&self) -> Option<Session> {
        self.hydrate_traced().await.session
    }

    /// [`hydrate`](Self::hydrate), also reporting the winning stage and the
    /// time taken.
    pub async fn hydrate_traced(&self) -> Hydration {
        let started = Instant::now();
        let finish = |session: Option<Session>, stage: Option<HydrationStage>| {
            let elapsed = started.elapsed();
            match stage {
                Some(stage) => info!(
                    %stage,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Session hydrated"
                ),
                None => warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "All hydration stages failed"
                ),
            }
            Hydration {
                session,
                stage,
                elapsed,
            }
        };

        if let Some(session) = self.direct().await {
            // The auth library already holds this session; nothing to persist.
            return finish(Some(session), Some(HydrationStage::Direct));
        }

        if let Some(session) = self.from_cache().await {
            self.persist(&session).await;
            return finish(Some(session), Some(HydrationStage::CacheHydration));
        }

        if let Some(session) = self.from_mirror().await {
            self.persist(&session).await;
            return finish(Some(session), Some(HydrationStage::MirrorRestore));
        }

        if let Some(session) = self.verify().await {
            self.persist(&session).await;
            return finish(Some(session), Some(HydrationStage::Verification));
        }

        finish(None, None)
    }

    /// The user id from the primary cache. Never touches the auth library.
    pub fn cached_user_id(&self) -> Option<String> {
        self.cache.user_id()
    }

    /// The user id from the cache, else from a bounded `get_session`.
    pub async fn user_id_with_fallback(&self) -> Option<String> {
        if let Some(user_id) = self.cached_user_id() {
            return Some(user_id);
        }

        debug!("No cached user id, asking auth");
        match with_timeout(
            self.auth.get_session(),
            self.deadlines.user_lookup,
            "getSession-user",
        )
        .await
        {
            Ok(Ok(session)) => session.map(|s| s.user_id),
            Ok(Err(e)) => {
                warn!(error = %e, "User lookup failed");
                None
            }
            Err(timeout) => {
                warn!(%timeout, "User lookup timed out");
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stages
    // ─────────────────────────────────────────────────────────────────────

    async fn direct(&self) -> Option<Session> {
        self.get_session(HydrationStage::Direct, self.deadlines.direct, "getSession-direct")
            .await
    }

    async fn from_cache(&self) -> Option<Session> {
        let stage = HydrationStage::CacheHydration;
        let Some(record) = self.cache.read_for_hydration() else {
            debug!(%stage, "No cached refresh token");
            return None;
        };
        let refresh_token = record.refresh_token.as_deref().unwrap_or_default();
        let access_token = record.access_token.as_deref().unwrap_or_default();

        match with_timeout(
            self.auth.set_session(access_token, refresh_token),
            self.deadlines.cache_hydration,
            "setSession-cache",
        )
        .await
        {
            Ok(Ok(Some(session))) => Some(session),
            Ok(Ok(None)) => {
                debug!(%stage, "set_session returned no session");
                None
            }
            Ok(Err(e)) => {
                warn!(%stage, error = %e, "Cache hydration rejected");
                if e.is_invalid_credential() {
                    info!("Cached refresh token is invalid, clearing primary cache");
                    self.cache.clear();
                }
                None
            }
            Err(timeout) => {
                warn!(%stage, %timeout, "Cache hydration timed out");
                None
            }
        }
    }

    async fn from_mirror(&self) -> Option<Session> {
        let stage = HydrationStage::MirrorRestore;
        match with_timeout(
            self.mirror.restore(self.auth.as_ref()),
            self.deadlines.mirror_restore,
            "mirror-restore",
        )
        .await
        {
            Ok(session) => session,
            Err(timeout) => {
                warn!(%stage, %timeout, "Mirror restoration timed out");
                None
            }
        }
    }

    async fn verify(&self) -> Option<Session> {
        self.get_session(
            HydrationStage::Verification,
            self.deadlines.verification,
            "getSession-verify",
        )
        .await
    }

    async fn get_session(
        &self,
        stage: HydrationStage,
        deadline: Duration,
        label: &str,
    ) -> Option<Session> {
        match with_timeout(self.auth.get_session(), deadline, label).await {
            Ok(Ok(session)) => {
                if session.is_none() {
                    debug!(%stage, "No session from auth");
                }
                session
            }
            Ok(Err(e)) => {
                warn!(%stage, error = %e, "get_session failed");
                None
            }
            Err(timeout) => {
                warn!(%stage, %timeout, "get_session timed out");
                None
            }
        }
    }

    async fn persist(&self, session: &Session) {
        self.cache.write(session);
        self.mirror.save(session).await;
    }
}
