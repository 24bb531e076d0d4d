//! Durable token mirror.
//!
//! Keeps a second copy of the session in a store that survives the primary
//! cache being wiped (native secure storage vs. webview storage). The mirror
//! is a fallback only: the primary cache is always consulted first.
//!
//! Reads go through a bounded deadline, because the native storage bridge can
//! stall for seconds right after a resume. A successful read is kept in
//! memory for a short TTL so one hydration burst does not pay for repeated
//! slow reads.

use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::auth::AuthSubsystem;
use crate::cache::TokenCache;
use crate::deadline::with_timeout;
use crate::session::{MirroredSessionRecord, Session, is_fresh};
use crate::store::SharedDurableStore;

/// Default mirror key in the durable store.
pub const DEFAULT_MIRROR_KEY: &str = "authTokenMirror";

/// Default deadline for a durable read.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(800);

/// Default deadline for a mirror-driven restore.
pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Default in-memory TTL for a successful read.
pub const DEFAULT_MEMORY_TTL: Duration = Duration::from_secs(5);

/// Mirror timing knobs.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub key: String,
    pub load_timeout: Duration,
    pub restore_timeout: Duration,
    pub memory_ttl: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_MIRROR_KEY.to_string(),
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            restore_timeout: DEFAULT_RESTORE_TIMEOUT,
            memory_ttl: DEFAULT_MEMORY_TTL,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    record: MirroredSessionRecord,
    cached_at: Instant,
}

/// In-memory copy plus an epoch bumped on every invalidation. A store read
/// only populates the memory copy if no invalidation happened while it ran.
#[derive(Debug, Default)]
struct MemoryCache {
    entry: Option<MemoryEntry>,
    epoch: u64,
}

/// Durable session mirror.
#[derive(Debug)]
pub struct TokenMirror {
    store: SharedDurableStore,
    config: MirrorConfig,
    memory: Mutex<MemoryCache>,
}

impl TokenMirror {
    /// Create a mirror with default timings.
    pub fn new(store: SharedDurableStore) -> Self {
        Self::with_config(store, MirrorConfig::default())
    }

    /// Create a mirror with explicit timings.
    pub fn with_config(store: SharedDurableStore, config: MirrorConfig) -> Self {
        Self {
            store,
            config,
            memory: Mutex::new(MemoryCache::default()),
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    /// Persist `session` with the current capture time. Best-effort.
    pub async fn save(&self, session: &Session) {
        let record = MirroredSessionRecord::capture(session, Utc::now());
        let epoch = self.epoch();
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize mirror record");
                return;
            }
        };

        match with_timeout(
            self.store.set(&self.config.key, &json),
            self.config.load_timeout,
            "mirror-save",
        )
        .await
        {
            Ok(Ok(())) => {
                self.remember(record, epoch);
                debug!("Session saved to mirror");
            }
            Ok(Err(e)) => warn!(error = %e, "Failed to save session to mirror"),
            Err(timeout) => warn!(%timeout, "Mirror save timed out"),
        }
    }

    /// Load the mirrored record.
    ///
    /// Timeouts and storage errors read as absent. Malformed data reads as
    /// absent and is cleared.
    pub async fn load(&self) -> Option<MirroredSessionRecord> {
        if let Some(record) = self.memory_hit() {
            trace!("Mirror served from memory");
            return Some(record);
        }

        let epoch = self.epoch();
        let raw = match with_timeout(
            self.store.get(&self.config.key),
            self.config.load_timeout,
            "mirror-load",
        )
        .await
        {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to load from mirror");
                return None;
            }
            Err(timeout) => {
                warn!(%timeout, "Mirror load timed out, storage bridge may be suspended");
                return None;
            }
        };

        match MirroredSessionRecord::from_json(&raw) {
            Some(record) => {
                self.remember(record.clone(), epoch);
                Some(record)
            }
            None => {
                info!("Invalid mirror data, clearing");
                self.clear().await;
                None
            }
        }
    }

    /// True when a usable mirrored record exists.
    pub async fn has_tokens(&self) -> bool {
        self.load().await.is_some()
    }

    /// Delete the mirrored record. Best-effort.
    pub async fn clear(&self) {
        self.invalidate_memory();
        let removed = with_timeout(
            self.store.remove(&self.config.key),
            self.config.load_timeout,
            "mirror-clear",
        )
        .await;
        // Reads that overlapped the delete must not repopulate memory.
        self.invalidate_memory();
        match removed {
            Ok(Ok(())) => debug!("Mirror cleared"),
            Ok(Err(e)) => warn!(error = %e, "Failed to clear mirror"),
            Err(timeout) => warn!(%timeout, "Mirror clear timed out"),
        }
    }

    /// Drop the in-memory copy only.
    ///
    /// Any load or save still in flight will not repopulate it.
    pub fn invalidate_memory(&self) {
        let mut memory = self.memory.lock();
        memory.entry = None;
        memory.epoch += 1;
    }

    /// Re-establish a live session from the mirrored tokens.
    ///
    /// The returned session is not written anywhere; the caller persists it.
    /// An error that marks the refresh token itself as invalid clears the
    /// mirror so it is not retried forever. Timeouts and transient errors
    /// leave it in place.
    pub async fn restore(&self, auth: &dyn AuthSubsystem) -> Option<Session> {
        let started = Instant::now();

        let Some(mirrored) = self.load().await else {
            debug!("No mirrored tokens available");
            return None;
        };

        debug!("Attempting session restoration from mirror");
        match with_timeout(
            auth.set_session(&mirrored.access_token, &mirrored.refresh_token),
            self.config.restore_timeout,
            "setSession-mirror",
        )
        .await
        {
            Ok(Ok(Some(session))) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Session restored from mirror"
                );
                Some(session)
            }
            Ok(Ok(None)) => {
                debug!("Mirror restore returned no session");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Mirror restore rejected");
                if e.is_invalid_credential() {
                    self.clear().await;
                }
                None
            }
            Err(timeout) => {
                warn!(
                    %timeout,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Mirror restore timed out"
                );
                None
            }
        }
    }

    /// The mirrored access token if it is not within `buffer` of expiry.
    ///
    /// Served from memory when fresh; never re-validated against the network.
    /// Records without a known expiry are trusted as-is.
    pub async fn cached_access_token(&self, buffer: Duration) -> Option<String> {
        let record = self.load().await?;
        if let Some(expires_at) = record.expires_at()
            && !is_fresh(expires_at, Utc::now(), buffer)
        {
            debug!("Mirrored access token expired");
            return None;
        }
        Some(record.access_token)
    }

    /// Copy the mirrored record back into the primary cache when the primary
    /// has no refresh token. Run before the client is recreated at cold start
    /// so the new client finds a session immediately.
    pub async fn write_back(&self, cache: &TokenCache) -> bool {
        if cache.has_refresh_token() {
            debug!("Primary cache already has a token, skipping write-back");
            return false;
        }

        let Some(record) = self.load().await else {
            debug!("No mirror record to write back");
            return false;
        };

        cache.write_record(&record.to_cached_record());
        info!("Primary cache restored from mirror");
        true
    }

    fn epoch(&self) -> u64 {
        self.memory.lock().epoch
    }

    fn memory_hit(&self) -> Option<MirroredSessionRecord> {
        let memory = self.memory.lock();
        memory
            .entry
            .as_ref()
            .filter(|entry| entry.cached_at.elapsed() < self.config.memory_ttl)
            .map(|entry| entry.record.clone())
    }

    fn remember(&self, record: MirroredSessionRecord, epoch: u64) {
        let mut memory = self.memory.lock();
        if memory.epoch != epoch {
            trace!("Mirror invalidated during read, not caching");
            return;
        }
        memory.entry = Some(MemoryEntry {
            record,
            cached_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::{InMemoryAuth, SetSessionBehavior};
    use crate::store::{DurableStore, KeyValueStore, MemoryDurableStore, MemoryStore};

    fn session() -> Session {
        Session::new(
            "access",
            "refresh",
            Utc::now() + chrono::Duration::hours(1),
            "user-1",
        )
    }

    fn mirror(store: Arc<MemoryDurableStore>) -> TokenMirror {
        TokenMirror::new(store)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = mirror(store.clone());
        mirror.save(&session()).await;

        let raw = store.get(DEFAULT_MIRROR_KEY).await.unwrap().unwrap();
        assert!(raw.contains("\"saved_at\""));
        assert!(raw.contains("\"user_id\":\"user-1\""));

        mirror.invalidate_memory();
        let loaded = mirror.load().await.unwrap();
        assert_eq!(loaded.refresh_token, "refresh");
        assert!(loaded.saved_at > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_times_out_as_absent() {
        let store = Arc::new(MemoryDurableStore::new());
        store
            .set(DEFAULT_MIRROR_KEY, r#"{"access_token":"a","refresh_token":"r"}"#)
            .await
            .unwrap();
        store.set_latency(Some(Duration::from_secs(10)));

        let started = Instant::now();
        assert!(mirror(store).load().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_malformed_record_is_cleared() {
        let store = Arc::new(MemoryDurableStore::new());
        store
            .set(DEFAULT_MIRROR_KEY, r#"{"access_token":"only"}"#)
            .await
            .unwrap();

        assert!(mirror(store.clone()).load().await.is_none());
        assert_eq!(store.get(DEFAULT_MIRROR_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_cache_avoids_repeated_reads() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = mirror(store.clone());
        mirror.save(&session()).await;

        // Underlying record vanishes; the memory copy still serves.
        store.remove(DEFAULT_MIRROR_KEY).await.unwrap();
        assert!(mirror.load().await.is_some());

        tokio::time::advance(DEFAULT_MEMORY_TTL + Duration::from_millis(1)).await;
        assert!(mirror.load().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_load_is_not_cached() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = Arc::new(mirror(store.clone()));
        mirror
            .save(&Session::new(
                "old-user-token",
                "old-refresh",
                Utc::now() + chrono::Duration::hours(1),
                "old-user",
            ))
            .await;
        mirror.invalidate_memory();
        store.set_latency(Some(Duration::from_millis(100)));

        // Reads the record at t=100ms, before the delete lands at t=150ms.
        let pending = tokio::spawn({
            let mirror = mirror.clone();
            async move { mirror.load().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        mirror.clear().await;
        pending.await.unwrap();

        assert!(mirror.load().await.is_none());
        assert!(
            mirror
                .cached_access_token(Duration::from_secs(30))
                .await
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_load_is_not_cached() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = Arc::new(mirror(store.clone()));
        mirror.save(&session()).await;
        mirror.invalidate_memory();
        store.set_latency(Some(Duration::from_millis(100)));

        let pending = tokio::spawn({
            let mirror = mirror.clone();
            async move { mirror.load().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        mirror.invalidate_memory();
        assert!(pending.await.unwrap().is_some());

        // Only a fresh store read can answer now.
        store.set_latency(None);
        store.remove(DEFAULT_MIRROR_KEY).await.unwrap();
        assert!(mirror.load().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_clear_races_concurrent_load() {
        let auth = InMemoryAuth::new()
            .with_set_latency(Duration::from_millis(200))
            .with_set_behavior(SetSessionBehavior::Reject(
                "Invalid Refresh Token: Already Used".to_string(),
            ));
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = Arc::new(mirror(store.clone()));
        mirror.save(&session()).await;
        mirror.invalidate_memory();
        store.set_latency(Some(Duration::from_millis(100)));

        let restoring = tokio::spawn({
            let mirror = mirror.clone();
            async move { mirror.restore(&auth).await }
        });
        // Starts a store read at t=250ms that lands at t=350ms, after the
        // rejected restore begins clearing (t=300ms) but before the delete.
        tokio::time::sleep(Duration::from_millis(250)).await;
        mirror.invalidate_memory();
        let loading = tokio::spawn({
            let mirror = mirror.clone();
            async move { mirror.load().await }
        });

        assert!(restoring.await.unwrap().is_none());
        loading.await.unwrap();
        assert!(mirror.load().await.is_none());
    }

    #[tokio::test]
    async fn test_restore_success_does_not_touch_cache() {
        let restored = Session::new(
            "fresh-access",
            "fresh-refresh",
            Utc::now() + chrono::Duration::hours(1),
            "user-1",
        );
        let auth = InMemoryAuth::new().with_set_behavior(SetSessionBehavior::Issue(restored.clone()));
        let mirror = mirror(Arc::new(MemoryDurableStore::new()));
        mirror.save(&session()).await;

        assert_eq!(mirror.restore(&auth).await, Some(restored));
        assert_eq!(auth.set_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_refresh_token_clears_mirror() {
        let auth = InMemoryAuth::new().with_set_behavior(SetSessionBehavior::Reject(
            "Invalid Refresh Token: Already Used".to_string(),
        ));
        let mirror = mirror(Arc::new(MemoryDurableStore::new()));
        mirror.save(&session()).await;

        assert!(mirror.restore(&auth).await.is_none());
        assert!(mirror.load().await.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_mirror() {
        let auth = InMemoryAuth::new().with_set_behavior(SetSessionBehavior::Unreachable);
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = mirror(store.clone());
        mirror.save(&session()).await;

        assert!(mirror.restore(&auth).await.is_none());
        mirror.invalidate_memory();
        assert!(mirror.load().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_timeout_keeps_mirror() {
        let auth = InMemoryAuth::new()
            .with_set_latency(Duration::from_secs(30))
            .with_set_behavior(SetSessionBehavior::Issue(session()));
        let mirror = mirror(Arc::new(MemoryDurableStore::new()));
        mirror.save(&session()).await;

        let started = Instant::now();
        assert!(mirror.restore(&auth).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(mirror.has_tokens().await);
    }

    #[tokio::test]
    async fn test_cached_access_token_respects_expiry() {
        let mirror = mirror(Arc::new(MemoryDurableStore::new()));
        mirror.save(&session()).await;
        assert_eq!(
            mirror.cached_access_token(Duration::from_secs(30)).await.as_deref(),
            Some("access")
        );

        let stale = Session::new("old", "r", Utc::now() + chrono::Duration::seconds(5), "u");
        mirror.save(&stale).await;
        assert!(mirror.cached_access_token(Duration::from_secs(30)).await.is_none());
    }

    #[tokio::test]
    async fn test_write_back_fills_empty_primary() {
        let primary = Arc::new(MemoryStore::new());
        let cache = TokenCache::new(primary.clone(), "primary");
        let mirror = mirror(Arc::new(MemoryDurableStore::new()));
        mirror.save(&session()).await;

        assert!(mirror.write_back(&cache).await);
        assert_eq!(cache.read().unwrap().refresh_token, "refresh");

        // Second call is a no-op: the primary already has a refresh token.
        assert!(!mirror.write_back(&cache).await);
        assert!(primary.get("primary").unwrap().is_some());
    }
}
