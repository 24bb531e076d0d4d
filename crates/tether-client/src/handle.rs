//! Stable handle over a swappable transport.

use std::sync::Arc;

use parking_lot::RwLock;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::client::{DataClient, TransportConfig};
use crate::error::Result;

/// Outcome of [`ClientHandle::recreate`].
#[derive(Debug, Clone)]
pub struct Recreated {
    /// The same handle, now backed by the new transport.
    pub handle: ClientHandle,
    /// How many in-flight requests were aborted.
    pub aborted: usize,
}

#[derive(Debug)]
struct HandleInner {
    config: Arc<TransportConfig>,
    current: RwLock<Arc<DataClient>>,
}

/// The only way application code reaches the backend.
///
/// Cloning is cheap; every clone observes the same transport. The transport
/// is only ever replaced by [`recreate`](Self::recreate).
#[derive(Debug, Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

impl ClientHandle {
    pub(crate) fn new(config: TransportConfig) -> Result<Self> {
        let http = config.build_http()?;
        let config = Arc::new(config);
        let client = DataClient::new(http, config.clone(), 0);
        Ok(Self {
            inner: Arc::new(HandleInner {
                config,
                current: RwLock::new(Arc::new(client)),
            }),
        })
    }

    pub(crate) fn current(&self) -> Arc<DataClient> {
        self.inner.current.read().clone()
    }

    /// Generation of the current transport. Starts at 0.
    pub fn generation(&self) -> u64 {
        self.current().registry().generation()
    }

    /// Requests in flight on the current transport.
    pub fn active_count(&self) -> usize {
        self.current().registry().active_count()
    }

    /// Abort everything in flight without replacing the transport.
    pub fn abort_all(&self) -> usize {
        self.current().registry().abort_all()
    }

    /// Abort everything on the current transport and swap in a new one.
    ///
    /// The old registry is retired before the new transport is built, so a
    /// request that raced the swap with the old transport is refused rather
    /// than resolved.
    pub fn recreate(&self) -> Recreated {
        let mut current = self.inner.current.write();
        let aborted = current.registry().retire();
        let generation = current.registry().generation() + 1;

        let http = match self.inner.config.build_http() {
            Ok(http) => http,
            Err(e) => {
                warn!(error = %e, "Failed to build fresh connection pool, reusing previous one");
                current.http().clone()
            }
        };
        *current = Arc::new(DataClient::new(http, self.inner.config.clone(), generation));
        drop(current);

        info!(generation, aborted, "Data client recreated");
        Recreated {
            handle: self.clone(),
            aborted,
        }
    }

    /// Whether a request issued now would carry a bearer token.
    pub async fn has_token(&self) -> bool {
        self.current().tokens().access_token().await.is_some()
    }

    /// Drop the mirror's in-memory token. The primary cache is untouched.
    pub fn clear_token_cache(&self) {
        self.current().tokens().clear();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Query surface
    // ─────────────────────────────────────────────────────────────────────

    /// GET a path.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.current()
            .send_json::<T, (), ()>(Method::GET, path, None, None, &[])
            .await
    }

    /// GET a path with query parameters.
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.current()
            .send_json::<T, Q, ()>(Method::GET, path, Some(query), None, &[])
            .await
    }

    /// POST a JSON body.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.current()
            .send_json::<T, (), B>(Method::POST, path, None, Some(body), &[])
            .await
    }

    /// PATCH rows matched by query filters.
    pub async fn patch_with_query<T, Q, B>(&self, path: &str, query: &Q, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::PATCH, path, Some(query), Some(body), &[])
            .await
    }

    /// DELETE rows matched by query filters.
    pub async fn delete_with_query<Q>(&self, path: &str, query: &Q) -> Result<()>
    where
        Q: Serialize + ?Sized,
    {
        self.current()
            .send_empty(Method::DELETE, path, Some(query))
            .await
    }

    /// Call a stored procedure.
    pub async fn rpc<T, B>(&self, function: &str, args: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let path = format!("rest/v1/rpc/{}", function);
        self.post(&path, args).await
    }

    /// Issue any request with extra headers and decode the JSON response.
    pub async fn request_json<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        self.current()
            .send_json(method, path, query, body, headers)
            .await
    }
}
