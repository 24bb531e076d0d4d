//! Sign-out command - forget every persisted copy of the session.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{Context, print_outcome};

/// Arguments for the sign-out command.
#[derive(Args, Debug)]
pub struct SignOutArgs {
    /// Keep the mirrored copy
    #[arg(long)]
    pub keep_mirror: bool,
}

/// Run the sign-out command.
pub async fn run(args: SignOutArgs, ctx: &Context) -> Result<()> {
    let cache = ctx.cache();
    let mirror = ctx.mirror();
    let client = ctx.client(cache.clone(), mirror.clone())?;

    // No auth library runs here, so the primary record is removed directly.
    cache.clear();
    client.clear_token_cache();
    if !args.keep_mirror {
        mirror.clear().await;
    }
    tracing::info!(keep_mirror = args.keep_mirror, "Signed out");

    print_outcome(
        ctx,
        json!({"signed_out": true, "mirror_cleared": !args.keep_mirror}),
        "Signed out",
    )
}
