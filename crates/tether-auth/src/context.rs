//! Wiring from configuration.

use std::sync::Arc;

use tether_client::{ClientBuilder, ClientHandle, TokenSource};
use tether_config::TetherConfig;
use tether_session::{
    MirrorConfig, SharedAuth, SharedDurableStore, SharedStore, TokenCache, TokenMirror,
};

use crate::hydrator::{SessionHydrator, StageDeadlines};
use crate::resume::{ResumeCoordinator, ResumeSettings};
use crate::sync::SessionSync;

/// Primary cache for `config`.
pub fn token_cache(config: &TetherConfig, store: SharedStore) -> TokenCache {
    TokenCache::new(store, config.cache.primary_key(&config.backend))
        .with_safety_buffer(config.cache.safety_buffer())
}

/// Durable mirror for `config`.
pub fn token_mirror(config: &TetherConfig, store: SharedDurableStore) -> TokenMirror {
    let mirror_config = MirrorConfig {
        key: config.cache.mirror_key.clone(),
        load_timeout: config.cache.mirror_load_timeout(),
        restore_timeout: config.cache.mirror_restore_timeout(),
        memory_ttl: config.cache.mirror_memory_ttl(),
    };
    TokenMirror::with_config(store, mirror_config)
}

/// Data client for `config`.
pub fn data_client(
    config: &TetherConfig,
    cache: TokenCache,
    mirror: Arc<TokenMirror>,
) -> tether_client::Result<ClientHandle> {
    let tokens = if config.client.mirror_fallback {
        TokenSource::with_mirror_fallback(cache, mirror)
    } else {
        TokenSource::cache_only(cache)
    };

    let mut builder = ClientBuilder::new()
        .base_url(&config.backend.url)
        .api_key_header(&config.backend.api_key_header)
        .query_timeout(config.client.query_timeout())
        .tokens(tokens);
    if let Some(key) = &config.backend.api_key {
        builder = builder.api_key(key);
    }
    if let Some(agent) = &config.client.user_agent {
        builder = builder.user_agent(agent);
    }
    builder.build()
}

/// Everything a process needs to keep a session alive.
#[derive(Debug)]
pub struct SessionContext {
    pub cache: TokenCache,
    pub mirror: Arc<TokenMirror>,
    pub client: ClientHandle,
    pub hydrator: SessionHydrator,
    pub resume: Arc<ResumeCoordinator>,
    pub sync: SessionSync,
}

impl SessionContext {
    /// Build and start every component. Must be called inside a tokio runtime.
    pub fn from_config(
        config: &TetherConfig,
        primary: SharedStore,
        durable: SharedDurableStore,
        auth: SharedAuth,
    ) -> tether_client::Result<Self> {
        let cache = token_cache(config, primary);
        let mirror = Arc::new(token_mirror(config, durable));
        let client = data_client(config, cache.clone(), mirror.clone())?;

        let hydrator = SessionHydrator::new(auth.clone(), cache.clone(), mirror.clone())
            .with_deadlines(StageDeadlines::from(&config.hydration));
        let resume = ResumeCoordinator::new(client.clone(), auth.clone(), cache.clone(), mirror.clone())
            .with_settings(ResumeSettings::from(config));
        let sync = SessionSync::spawn(auth.as_ref(), cache.clone(), mirror.clone());

        Ok(Self {
            cache,
            mirror,
            client,
            hydrator,
            resume: Arc::new(resume),
            sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tether_session::{InMemoryAuth, MemoryDurableStore, MemoryStore};

    #[test]
    fn test_cache_uses_configured_key_and_buffer() {
        let mut config = TetherConfig::default();
        config.backend.project_id = Some("abc".to_string());
        config.cache.safety_buffer_secs = 45;

        let cache = token_cache(&config, Arc::new(MemoryStore::new()));
        assert_eq!(cache.key(), "sb-abc-auth-token");
        assert_eq!(cache.safety_buffer(), Duration::from_secs(45));
    }

    #[test]
    fn test_mirror_uses_configured_timings() {
        let mut config = TetherConfig::default();
        config.cache.mirror_load_timeout_ms = 200;
        let mirror = token_mirror(&config, Arc::new(MemoryDurableStore::new()));
        assert_eq!(mirror.config().load_timeout, Duration::from_millis(200));
        assert_eq!(mirror.config().key, "authTokenMirror");
    }

    #[test]
    fn test_invalid_backend_url_is_rejected() {
        let config = TetherConfig::default().with_backend_url("not a url");
        let cache = token_cache(&config, Arc::new(MemoryStore::new()));
        let mirror = Arc::new(token_mirror(&config, Arc::new(MemoryDurableStore::new())));
        assert!(data_client(&config, cache, mirror).is_err());
    }

    #[tokio::test]
    async fn test_context_from_config() {
        let config = TetherConfig::default().with_api_key("anon");
        let context = SessionContext::from_config(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryDurableStore::new()),
            Arc::new(InMemoryAuth::new()),
        )
        .unwrap();

        assert_eq!(context.client.generation(), 0);
        assert_eq!(
            context.hydrator.deadlines().total(),
            config.hydration.worst_case()
        );
        assert!(!context.sync.is_finished());
    }
}
