//! Synchronous token cache over the primary key-value store.
//!
//! Reads never fail: storage errors and malformed blobs are logged and
//! treated as a miss, and a malformed blob is removed so it cannot poison
//! later reads.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::session::{CachedSessionRecord, Session, from_epoch_secs, is_fresh};
use crate::store::SharedStore;

/// Default safety buffer before access-token expiry.
pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::from_secs(30);

/// Token cache over the primary store.
#[derive(Debug, Clone)]
pub struct TokenCache {
    store: SharedStore,
    key: String,
    safety_buffer: Duration,
}

impl TokenCache {
    /// Create a cache reading `key` from `store`.
    pub fn new(store: SharedStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            safety_buffer: DEFAULT_SAFETY_BUFFER,
        }
    }

    /// Override the expiry safety buffer.
    pub fn with_safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn safety_buffer(&self) -> Duration {
        self.safety_buffer
    }

    /// A fully populated session whose access token is not within the safety
    /// buffer of expiry.
    pub fn read(&self) -> Option<Session> {
        self.read_at(Utc::now())
    }

    /// [`read`](Self::read) with an explicit clock.
    pub fn read_at(&self, now: DateTime<Utc>) -> Option<Session> {
        let record = self.load_record()?;

        let Some(expires_at) = record
            .access_token
            .as_ref()
            .and(record.expires_at)
            .and_then(from_epoch_secs)
        else {
            debug!("Cached session missing required fields");
            return None;
        };

        if !is_fresh(expires_at, now, self.safety_buffer) {
            debug!(expires_at = %expires_at, "Cached session expired or expiring soon");
            return None;
        }

        match record.to_session() {
            Some(session) => {
                trace!(expires_at = %expires_at, "Valid cached session found");
                Some(session)
            }
            None => {
                debug!("Cached session is partial, treating as absent");
                None
            }
        }
    }

    /// The cached record whenever it carries a refresh token. Access-token
    /// expiry is deliberately not checked: a refresh token is what mints the
    /// next access token.
    pub fn read_for_hydration(&self) -> Option<CachedSessionRecord> {
        let record = self.load_record()?;
        if !record.has_refresh_token() {
            debug!("No refresh token in cache");
            return None;
        }
        Some(record)
    }

    /// The validated access token.
    pub fn access_token(&self) -> Option<String> {
        self.read().map(|s| s.access_token)
    }

    /// The user id of a valid cached session.
    pub fn user_id(&self) -> Option<String> {
        self.read().map(|s| s.user_id)
    }

    /// True when a record with a refresh token exists, regardless of expiry.
    pub fn has_refresh_token(&self) -> bool {
        self.raw_record().is_some_and(|r| r.has_refresh_token())
    }

    /// Overwrite the record with `session`.
    pub fn write(&self, session: &Session) {
        self.write_record(&CachedSessionRecord::from_session(session));
    }

    /// Overwrite the record wholesale.
    pub fn write_record(&self, record: &CachedSessionRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cached session");
                return;
            }
        };
        match self.store.set(&self.key, &json) {
            Ok(()) => trace!(key = %self.key, "Cached session written"),
            Err(e) => warn!(error = %e, "Failed to write cached session"),
        }
    }

    /// Remove the record.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(error = %e, "Failed to clear cached session");
        }
    }

    fn load_record(&self) -> Option<CachedSessionRecord> {
        let record = self.raw_record();
        if record.is_none() {
            trace!("No cached session found");
        }
        record
    }

    fn raw_record(&self) -> Option<CachedSessionRecord> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Error reading cached session");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Cached session is corrupt, clearing");
                self.clear();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::SessionError;
    use crate::store::{KeyValueStore, MemoryStore};

    const KEY: &str = "sb-test-auth-token";

    fn cache_with(store: Arc<MemoryStore>) -> TokenCache {
        TokenCache::new(store, KEY)
    }

    fn session_expiring_in(secs: i64) -> Session {
        Session::new(
            "access",
            "refresh",
            Utc::now() + chrono::Duration::seconds(secs),
            "user-1",
        )
    }

    #[test]
    fn test_expiry_buffer() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store);

        cache.write(&session_expiring_in(10));
        assert!(cache.read().is_none());

        cache.write(&session_expiring_in(60));
        let session = cache.read().unwrap();
        assert_eq!(session.access_token, "access");
        assert_eq!(cache.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn test_read_at_injected_clock() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store).with_safety_buffer(Duration::from_secs(5));
        let session = session_expiring_in(60);
        cache.write(&session);

        let before = session.expires_at - chrono::Duration::seconds(6);
        let inside = session.expires_at - chrono::Duration::seconds(4);
        assert!(cache.read_at(before).is_some());
        assert!(cache.read_at(inside).is_none());
    }

    #[test]
    fn test_missing_store_entry_is_miss() {
        let cache = cache_with(Arc::new(MemoryStore::new()));
        assert!(cache.read().is_none());
        assert!(cache.read_for_hydration().is_none());
        assert!(!cache.has_refresh_token());
    }

    #[test]
    fn test_missing_fields_is_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(KEY, r#"{"access_token": "a", "refresh_token": "r"}"#)
            .unwrap();
        let cache = cache_with(store);
        assert!(cache.read().is_none());
        // Still usable for hydration: the refresh token is there.
        assert!(cache.read_for_hydration().is_some());
    }

    #[test]
    fn test_corrupt_record_is_cleared() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "{not json").unwrap();
        let cache = cache_with(store.clone());

        assert!(cache.read().is_none());
        assert_eq!(store.get(KEY).unwrap(), None);
    }

    #[test]
    fn test_hydration_read_ignores_expiry() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache_with(store);
        cache.write(&session_expiring_in(-3600));

        assert!(cache.read().is_none());
        let record = cache.read_for_hydration().unwrap();
        assert_eq!(record.refresh_token.as_deref(), Some("refresh"));
    }

    #[derive(Debug)]
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> crate::Result<Option<String>> {
            Err(SessionError::Storage("quota exceeded".to_string()))
        }

        fn set(&self, _key: &str, _value: &str) -> crate::Result<()> {
            Err(SessionError::Storage("quota exceeded".to_string()))
        }

        fn remove(&self, _key: &str) -> crate::Result<()> {
            Err(SessionError::Storage("quota exceeded".to_string()))
        }
    }

    #[test]
    fn test_storage_failures_never_escape() {
        let cache = TokenCache::new(Arc::new(BrokenStore), KEY);
        cache.write(&session_expiring_in(60));
        cache.clear();
        assert!(cache.read().is_none());
        assert!(cache.access_token().is_none());
    }
}
