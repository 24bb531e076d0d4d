//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use tether_auth::SessionContext;
use tether_config::TetherConfig;
use tether_session::{
    FileDurableStore, FileStore, InMemoryAuth, KeyValueStore, MemoryDurableStore, MemoryStore,
    Session,
};

pub const PRIMARY_KEY: &str = "sb-local-auth-token";

/// A session valid for an hour.
pub fn session(token: &str) -> Session {
    Session::new(
        token,
        format!("{token}-refresh"),
        Utc::now() + chrono::Duration::hours(1),
        "user-1",
    )
    .with_email("patient@example.com")
}

/// In-memory stores plus a scripted auth subsystem, wired from defaults.
pub struct Harness {
    pub config: TetherConfig,
    pub auth: Arc<InMemoryAuth>,
    pub primary: Arc<MemoryStore>,
    pub durable: Arc<MemoryDurableStore>,
    pub context: SessionContext,
}

impl Harness {
    pub fn new(config: TetherConfig, auth: InMemoryAuth) -> anyhow::Result<Self> {
        let auth = Arc::new(auth);
        let primary = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let context =
            SessionContext::from_config(&config, primary.clone(), durable.clone(), auth.clone())?;
        Ok(Self {
            config,
            auth,
            primary,
            durable,
            context,
        })
    }

    /// Overwrite the primary record with bytes that do not parse.
    pub fn corrupt_primary(&self) {
        self.primary
            .set(PRIMARY_KEY, "{\"access_token\": \"trunc")
            .expect("memory store write");
    }
}

/// File-backed stores in a temporary directory.
pub struct FileHarness {
    pub temp_dir: TempDir,
    pub primary: Arc<FileStore>,
    pub durable: Arc<FileDurableStore>,
}

impl FileHarness {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let primary = Arc::new(FileStore::new(temp_dir.path().join("primary")));
        let durable = Arc::new(FileDurableStore::new(temp_dir.path().join("mirror")));
        Ok(Self {
            temp_dir,
            primary,
            durable,
        })
    }
}

/// Let spawned tasks run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Poll `check` until it holds, failing after about five seconds.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
