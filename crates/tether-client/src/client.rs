//! Data client transport.
//!
//! A [`DataClient`] is one generation of the transport: an HTTP connection
//! pool bound to its own [`AbortRegistry`]. It never asks the auth subsystem
//! for a session. The bearer token is read straight from the token cache
//! (and, when enabled, the durable mirror), so a stuck auth library cannot
//! block queries. Application code never holds a `DataClient`; it holds a
//! [`ClientHandle`](crate::ClientHandle).

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;
use url::Url;

use tether_session::{DEFAULT_QUERY_TIMEOUT, TokenCache, TokenMirror};

use crate::abort::AbortRegistry;
use crate::error::{Error, ErrorResponse, Result};
use crate::handle::ClientHandle;

/// Default header carrying the static API key.
const DEFAULT_API_KEY_HEADER: &str = "apikey";

/// Resolves the bearer token for each request.
#[derive(Debug, Clone)]
pub struct TokenSource {
    cache: TokenCache,
    mirror: Option<Arc<TokenMirror>>,
}

impl TokenSource {
    /// Primary cache only.
    pub fn cache_only(cache: TokenCache) -> Self {
        Self {
            cache,
            mirror: None,
        }
    }

    /// Primary cache, falling back to the mirror's cached token.
    ///
    /// Use where the primary store is known to be unreliable.
    pub fn with_mirror_fallback(cache: TokenCache, mirror: Arc<TokenMirror>) -> Self {
        Self {
            cache,
            mirror: Some(mirror),
        }
    }

    /// The access token for the next request, if any.
    pub async fn access_token(&self) -> Option<String> {
        if let Some(token) = self.cache.access_token() {
            return Some(token);
        }
        match &self.mirror {
            Some(mirror) => {
                debug!("No primary cache token, trying mirror");
                mirror.cached_access_token(self.cache.safety_buffer()).await
            }
            None => None,
        }
    }

    /// Drop the mirror's in-memory token so the next request re-reads
    /// storage. The persisted primary record is left alone; the auth
    /// library owns clearing it on sign-out.
    pub fn clear(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.invalidate_memory();
        }
    }
}

/// Settings shared by every transport generation.
#[derive(Debug)]
pub(crate) struct TransportConfig {
    pub(crate) base_url: Url,
    pub(crate) api_key_header: HeaderName,
    pub(crate) api_key: Option<HeaderValue>,
    pub(crate) query_timeout: Duration,
    pub(crate) user_agent: String,
    pub(crate) tag: String,
    pub(crate) tokens: TokenSource,
}

impl TransportConfig {
    /// Build a fresh connection pool.
    pub(crate) fn build_http(&self) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(self.user_agent.clone())
            .build()?)
    }
}

/// One generation of the data transport.
#[derive(Debug)]
pub(crate) struct DataClient {
    http: reqwest::Client,
    config: Arc<TransportConfig>,
    registry: AbortRegistry,
}

impl DataClient {
    pub(crate) fn new(http: reqwest::Client, config: Arc<TransportConfig>, generation: u64) -> Self {
        let registry = AbortRegistry::new(config.tag.clone(), generation);
        Self {
            http,
            config,
            registry,
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn registry(&self) -> &AbortRegistry {
        &self.registry
    }

    pub(crate) fn tokens(&self) -> &TokenSource {
        &self.config.tokens
    }

    /// Build a URL for a backend path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.config.base_url.join(path).map_err(Error::from)
    }

    /// Issue a request and return the raw response.
    pub(crate) async fn send<Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response>
    where
        Q: serde::Serialize + ?Sized,
        B: serde::Serialize + ?Sized,
    {
        let url = self.url(path)?;
        let mut builder = self.http.request(method, url);
        if let Some(query) = query {
            builder = builder.query(query);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        if let Some(api_key) = &self.config.api_key {
            builder = builder.header(self.config.api_key_header.clone(), api_key.clone());
        }
        match self.config.tokens.access_token().await {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| Error::Auth("cached access token is not a valid header".to_string()))?;
                builder = builder.header(AUTHORIZATION, value);
            }
            None => debug!(path, "No access token, sending unauthenticated"),
        }

        let request = builder.build()?;
        let response = self
            .registry
            .fetch(&self.http, request, self.config.query_timeout)
            .await?;
        Ok(response)
    }

    /// Issue a request and decode a JSON body.
    pub(crate) async fn send_json<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        Q: serde::Serialize + ?Sized,
        B: serde::Serialize + ?Sized,
    {
        let response = self.send(method, path, query, body, headers).await?;
        // The body read stays abortable and deadline-bound too.
        self.registry
            .run(path, self.config.query_timeout, handle_response(response))
            .await?
    }

    /// Issue a request whose body is ignored on success.
    pub(crate) async fn send_empty<Q>(&self, method: Method, path: &str, query: Option<&Q>) -> Result<()>
    where
        Q: serde::Serialize + ?Sized,
    {
        let response = self
            .send::<Q, ()>(method, path, query, None, &[])
            .await?;
        if !response.status().is_success() {
            let error = self
                .registry
                .run(path, self.config.query_timeout, extract_error(response))
                .await?;
            return Err(error);
        }
        Ok(())
    }
}

/// Handle a response, extracting the body or error.
async fn handle_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(extract_error(response).await)
    }
}

/// Extract an error from a failed response.
async fn extract_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();

    match response.json::<ErrorResponse>().await {
        Ok(err) => {
            let message = err.message.unwrap_or_else(|| format!("HTTP {}", status));
            match status {
                404 => Error::NotFound(message),
                401 => Error::Auth(message),
                _ => Error::Api {
                    status,
                    code: err.code.unwrap_or_else(|| "unknown".to_string()),
                    message,
                },
            }
        }
        Err(_) => Error::Api {
            status,
            code: "unknown".to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for a [`ClientHandle`].
#[derive(Debug)]
pub struct ClientBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    api_key_header: String,
    query_timeout: Duration,
    user_agent: Option<String>,
    tag: String,
    tokens: Option<TokenSource>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            user_agent: None,
            tag: "DataClient".to_string(),
            tokens: None,
        }
    }

    /// Set the backend base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the static API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the header carrying the API key.
    pub fn api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    /// Set the per-query deadline.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the tag used in abort log lines.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set where bearer tokens come from.
    pub fn tokens(mut self, tokens: TokenSource) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build the handle and its first transport generation.
    pub fn build(self) -> Result<ClientHandle> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;
        let tokens = self
            .tokens
            .ok_or_else(|| Error::Config("token source is required".to_string()))?;

        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let api_key_header = HeaderName::from_bytes(self.api_key_header.as_bytes())
            .map_err(|_| Error::Config("Invalid API key header name".to_string()))?;
        let api_key = self
            .api_key
            .map(|key| {
                HeaderValue::from_str(&key)
                    .map_err(|_| Error::Config("Invalid API key".to_string()))
            })
            .transpose()?;

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("tether-client/{}", env!("CARGO_PKG_VERSION")));

        let config = TransportConfig {
            base_url,
            api_key_header,
            api_key,
            query_timeout: self.query_timeout,
            user_agent,
            tag: self.tag,
            tokens,
        };
        ClientHandle::new(config)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
