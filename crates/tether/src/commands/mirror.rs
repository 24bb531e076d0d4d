//! Mirror command - manage the durable session mirror.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use serde_json::json;

use super::{Context, print_outcome};

/// Arguments for the mirror command.
#[derive(Args, Debug)]
pub struct MirrorArgs {
    #[command(subcommand)]
    pub command: MirrorCommand,
}

#[derive(Subcommand, Debug)]
pub enum MirrorCommand {
    /// Copy the valid cached session into the mirror
    Sync,

    /// Restore the primary cache from the mirror if it lost its session
    WriteBack,

    /// Delete the mirrored session
    Clear,
}

/// Run the mirror command.
pub async fn run(args: MirrorArgs, ctx: &Context) -> Result<()> {
    let cache = ctx.cache();
    let mirror = ctx.mirror();

    match args.command {
        MirrorCommand::Sync => {
            let Some(session) = cache.read() else {
                bail!("No valid cached session to mirror");
            };
            mirror.save(&session).await;
            mirror.invalidate_memory();
            let persisted = mirror.load().await.map(|record| record.access_token);
            if persisted.as_deref() != Some(session.access_token.as_str()) {
                bail!("Mirror write did not persist");
            }
            print_outcome(
                ctx,
                json!({"synced": true, "user_id": session.user_id}),
                "Session copied to mirror",
            )
        }
        MirrorCommand::WriteBack => {
            let restored = mirror.write_back(&cache).await;
            let message = if restored {
                "Primary cache restored from mirror"
            } else if cache.has_refresh_token() {
                "Primary cache already has a session"
            } else {
                "Nothing to restore: mirror is empty"
            };
            print_outcome(ctx, json!({"restored": restored}), message)
        }
        MirrorCommand::Clear => {
            mirror.clear().await;
            print_outcome(ctx, json!({"cleared": true}), "Mirror cleared")
        }
    }
}
