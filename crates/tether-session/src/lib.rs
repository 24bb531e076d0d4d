//! Session model and token persistence for Tether.
//!
//! This crate holds the leaves of the hydration chain:
//! - [`Session`] and its persisted record shapes
//! - [`TokenCache`]: synchronous, expiry-buffered reads of the primary store
//! - [`TokenMirror`]: bounded async reads of a durable second copy
//! - [`with_timeout`]: the deadline wrapper every other component uses
//! - [`AuthSubsystem`]: the operations consumed from the auth library
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_session::{MemoryStore, TokenCache};
//!
//! let cache = TokenCache::new(Arc::new(MemoryStore::new()), "sb-abc-auth-token");
//! if let Some(session) = cache.read() {
//!     println!("signed in as {}", session.user_id);
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod deadline;
pub mod error;
pub mod mirror;
pub mod session;
pub mod store;

pub use auth::{
    AuthError, AuthEvent, AuthEventKind, AuthSubsystem, InMemoryAuth, SetSessionBehavior,
    SharedAuth,
};
pub use cache::{DEFAULT_SAFETY_BUFFER, TokenCache};
pub use deadline::{DEFAULT_QUERY_TIMEOUT, TimeoutError, with_query_timeout, with_timeout};
pub use error::{Result, SessionError};
pub use mirror::{MirrorConfig, TokenMirror};
pub use session::{CachedSessionRecord, CachedUser, MirroredSessionRecord, Session};
pub use store::{
    DurableStore, FileDurableStore, FileStore, KeyValueStore, MemoryDurableStore, MemoryStore,
    SharedDurableStore, SharedStore,
};
