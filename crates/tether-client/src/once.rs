//! Write-once flags for one-time side effects.
//!
//! Several tasks (or several devices) may race to perform the same
//! notification. The winner is whoever flips the persisted flag from
//! `false` to `true`; an in-process mutex cannot arbitrate across devices,
//! so the flip is a conditional update at the backend.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Result;
use crate::handle::ClientHandle;

/// A flag that can be set at most once.
#[async_trait]
pub trait OnceFlag: Send + Sync {
    /// Set the flag if it is not set yet. `true` means this caller set it.
    async fn claim(&self) -> Result<bool>;
}

/// In-process flag.
#[derive(Debug, Default)]
pub struct MemoryOnceFlag {
    set: AtomicBool,
}

impl MemoryOnceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OnceFlag for MemoryOnceFlag {
    async fn claim(&self) -> Result<bool> {
        Ok(self
            .set
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }
}

/// Boolean column on a backend row, flipped with a conditional PATCH.
#[derive(Debug, Clone)]
pub struct RemoteOnceFlag {
    client: ClientHandle,
    table: String,
    id_column: String,
    id: String,
    flag_column: String,
}

impl RemoteOnceFlag {
    /// Flag `flag_column` on the row of `table` whose `id` column matches.
    pub fn new(
        client: ClientHandle,
        table: impl Into<String>,
        id: impl Into<String>,
        flag_column: impl Into<String>,
    ) -> Self {
        Self {
            client,
            table: table.into(),
            id_column: "id".to_string(),
            id: id.into(),
            flag_column: flag_column.into(),
        }
    }

    /// Match rows on a column other than `id`.
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    fn path(&self) -> String {
        format!("rest/v1/{}", self.table)
    }
}

#[async_trait]
impl OnceFlag for RemoteOnceFlag {
    async fn claim(&self) -> Result<bool> {
        let query = [
            (self.id_column.as_str(), format!("eq.{}", self.id)),
            (self.flag_column.as_str(), "eq.false".to_string()),
        ];
        let mut body = Map::new();
        body.insert(self.flag_column.clone(), Value::Bool(true));

        let rows: Vec<Value> = self
            .client
            .request_json(
                Method::PATCH,
                &self.path(),
                Some(&query),
                Some(&body),
                &[("Prefer", "return=representation")],
            )
            .await?;

        let won = !rows.is_empty();
        debug!(table = %self.table, id = %self.id, won, "Flag claim settled");
        Ok(won)
    }
}

/// Run `effect` only if this caller claims `flag`.
///
/// Returns `None` when another caller already claimed it.
pub async fn run_once<F, Fut, T>(flag: &dyn OnceFlag, effect: F) -> Result<Option<T>>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = T> + Send,
{
    if !flag.claim().await? {
        debug!("Flag already claimed, skipping effect");
        return Ok(None);
    }
    info!("Flag claimed, running one-time effect");
    Ok(Some(effect().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    use serde_json::json;
    use tether_session::{MemoryStore, TokenCache};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::client::{ClientBuilder, TokenSource};

    fn handle_for(server: &MockServer) -> ClientHandle {
        let cache = TokenCache::new(Arc::new(MemoryStore::new()), "sb-test-auth-token");
        ClientBuilder::new()
            .base_url(server.uri())
            .tokens(TokenSource::cache_only(cache))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_flag_single_winner() {
        let flag = Arc::new(MemoryOnceFlag::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let flag = flag.clone();
            tasks.push(tokio::spawn(async move { flag.claim().await.unwrap() }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(flag.is_set());
    }

    #[tokio::test]
    async fn test_remote_flag_sends_conditional_update() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/medications"))
            .and(query_param("id", "eq.med-7"))
            .and(query_param("refill_notified", "eq.false"))
            .and(header("prefer", "return=representation"))
            .and(body_json(json!({"refill_notified": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"id": "med-7", "refill_notified": true}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let flag = RemoteOnceFlag::new(handle_for(&server), "medications", "med-7", "refill_notified");
        assert!(flag.claim().await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_flag_loses_on_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let flag = RemoteOnceFlag::new(handle_for(&server), "medications", "med-7", "refill_notified");
        assert!(!flag.claim().await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_flag_custom_id_column() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(query_param("user_id", "eq.user-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"user_id": "user-1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let flag = RemoteOnceFlag::new(handle_for(&server), "profiles", "user-1", "welcomed")
            .with_id_column("user_id");
        assert!(flag.claim().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_once_runs_effect_for_winner_only() {
        let flag = MemoryOnceFlag::new();
        let counter = AtomicU32::new(0);
        let runs = &counter;

        let first = run_once(&flag, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            "sent"
        })
        .await
        .unwrap();
        let second = run_once(&flag, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            "sent"
        })
        .await
        .unwrap();

        assert_eq!(first, Some("sent"));
        assert_eq!(second, None);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
            .mount(&server)
            .await;

        let flag = RemoteOnceFlag::new(handle_for(&server), "medications", "med-7", "refill_notified");
        let err = run_once(&flag, || async {}).await.unwrap_err();
        assert!(err.is_server_error());
    }
}
