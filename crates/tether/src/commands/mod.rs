//! CLI command handlers.

pub mod mirror;
pub mod query;
pub mod sign_out;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use tether_client::ClientHandle;
use tether_config::TetherConfig;
use tether_session::{FileDurableStore, FileStore, TokenCache, TokenMirror};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: TetherConfig,
    /// File the configuration came from, if any.
    pub config_source: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Directory holding both stores.
    pub fn data_dir(&self) -> PathBuf {
        self.config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(tether_config::default_data_dir)
    }

    pub fn cache(&self) -> TokenCache {
        let store = Arc::new(FileStore::new(self.data_dir().join("primary")));
        tether_auth::token_cache(&self.config, store)
    }

    pub fn mirror(&self) -> Arc<TokenMirror> {
        let store = Arc::new(FileDurableStore::new(self.data_dir().join("mirror")));
        Arc::new(tether_auth::token_mirror(&self.config, store))
    }

    pub fn client(&self, cache: TokenCache, mirror: Arc<TokenMirror>) -> anyhow::Result<ClientHandle> {
        Ok(tether_auth::data_client(&self.config, cache, mirror)?)
    }
}

/// Print a JSON value or a plain message depending on the output mode.
pub fn print_outcome(ctx: &Context, value: serde_json::Value, message: &str) -> anyhow::Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", message);
    }
    Ok(())
}
