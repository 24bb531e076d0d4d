//! Abortable, swappable data client.
//!
//! Application code talks to the backend only through a [`ClientHandle`].
//! Behind it sits one generation of transport, whose requests are all
//! tracked by an [`AbortRegistry`] and bounded by a per-query deadline.
//! Bearer tokens come from the synchronous token cache, so queries never
//! wait on the auth library.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_client::{ClientBuilder, TokenSource};
//! use tether_session::{MemoryStore, TokenCache};
//!
//! let cache = TokenCache::new(Arc::new(MemoryStore::new()), "sb-abc-auth-token");
//! let client = ClientBuilder::new()
//!     .base_url("http://127.0.0.1:54321")
//!     .api_key("anon-key")
//!     .tokens(TokenSource::cache_only(cache))
//!     .build()?;
//!
//! let doses: Vec<serde_json::Value> = client
//!     .get_with_query("rest/v1/doses", &[("user_id", "eq.42")])
//!     .await?;
//!
//! // App came back from the background: drop everything in flight.
//! let recreated = client.recreate();
//! println!("aborted {} requests", recreated.aborted);
//! ```

pub mod abort;
mod client;
pub mod error;
mod handle;
pub mod once;

pub use abort::{AbortRegistry, FetchError, InFlightRequest};
pub use client::{ClientBuilder, TokenSource};
pub use error::{Error, Result};
pub use handle::{ClientHandle, Recreated};
pub use once::{MemoryOnceFlag, OnceFlag, RemoteOnceFlag, run_once};

// For `ClientHandle::request_json`.
pub use reqwest::Method;
