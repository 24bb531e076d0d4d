//! Session resilience for Tether.
//!
//! Ties the token stores and the data client together:
//! - [`SessionHydrator`]: staged, time-boxed session recovery
//! - [`SessionSync`]: writes auth lifecycle events through to both caches
//! - [`ResumeCoordinator`]: abort-and-recreate on app resume, cold-start write-back
//! - [`SessionContext`]: builds all of the above from a [`TetherConfig`](tether_config::TetherConfig)

pub mod context;
pub mod hydrator;
pub mod resume;
pub mod sync;

pub use context::{SessionContext, data_client, token_cache, token_mirror};
pub use hydrator::{Hydration, HydrationStage, SessionHydrator, StageDeadlines};
pub use resume::{AppLifecycleEvent, ResumeCoordinator, ResumeSettings};
pub use sync::SessionSync;
