//! Status command - shows cached session and mirror state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also show token previews
    #[arg(short, long)]
    pub detailed: bool,
}

/// Status response for JSON output.
#[derive(Debug, Serialize)]
struct StatusOutput {
    backend_url: String,
    config_source: Option<String>,
    data_dir: String,
    primary_key: String,
    cache: CacheStatus,
    mirror: MirrorStatus,
}

#[derive(Debug, Serialize)]
struct CacheStatus {
    valid: bool,
    has_refresh_token: bool,
    user_id: Option<String>,
    expires_in_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct MirrorStatus {
    present: bool,
    user_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    saved_at: Option<DateTime<Utc>>,
}

/// Run the status command.
pub async fn run(args: StatusArgs, ctx: &Context) -> Result<()> {
    let cache = ctx.cache();
    let mirror = ctx.mirror();

    let now = Utc::now();
    let session = cache.read_at(now);
    let cache_status = CacheStatus {
        valid: session.is_some(),
        has_refresh_token: cache.has_refresh_token(),
        user_id: session.as_ref().map(|s| s.user_id.clone()),
        expires_in_secs: session.as_ref().map(|s| s.expires_in_secs(now)),
    };

    let mirrored = mirror.load().await;
    let mirror_status = MirrorStatus {
        present: mirrored.is_some(),
        user_id: mirrored
            .as_ref()
            .map(|r| r.user_id.clone())
            .filter(|id| !id.is_empty()),
        expires_at: mirrored.as_ref().and_then(|r| r.expires_at()),
        saved_at: mirrored
            .as_ref()
            .filter(|r| r.saved_at > 0)
            .and_then(|r| DateTime::from_timestamp_millis(r.saved_at)),
    };

    let output = StatusOutput {
        backend_url: ctx.config.backend.url.clone(),
        config_source: ctx.config_source.as_ref().map(|p| p.display().to_string()),
        data_dir: ctx.data_dir().display().to_string(),
        primary_key: cache.key().to_string(),
        cache: cache_status,
        mirror: mirror_status,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let red = Style::new().red();
    let dim = Style::new().dim();

    println!();
    println!("{}", style("Tether Session Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("Backend:"), output.backend_url);
    println!(
        "  {} {}",
        dim.apply_to("Config:"),
        output.config_source.as_deref().unwrap_or("(defaults)")
    );
    println!("  {} {}", dim.apply_to("Data:"), output.data_dir);
    println!();

    let cache_line = if output.cache.valid {
        green.apply_to("● valid".to_string())
    } else if output.cache.has_refresh_token {
        yellow.apply_to("● expired (refresh token present)".to_string())
    } else {
        red.apply_to("● empty".to_string())
    };
    println!("  {} {}", dim.apply_to("Cache:"), cache_line);
    if let Some(user_id) = &output.cache.user_id {
        println!("  {} {}", dim.apply_to("User:"), user_id);
    }
    if let Some(secs) = output.cache.expires_in_secs {
        println!("  {} {}s", dim.apply_to("Expires in:"), secs);
    }

    let mirror_line = if output.mirror.present {
        green.apply_to("● present".to_string())
    } else {
        red.apply_to("● empty".to_string())
    };
    println!("  {} {}", dim.apply_to("Mirror:"), mirror_line);
    if let Some(saved_at) = output.mirror.saved_at {
        println!("  {} {}", dim.apply_to("Saved:"), saved_at.to_rfc3339());
    }

    if args.detailed {
        println!();
        println!("  {} {}", dim.apply_to("Primary key:"), output.primary_key);
        if let Some(session) = &session {
            println!(
                "  {} {}",
                dim.apply_to("Access token:"),
                preview(&session.access_token)
            );
        }
    }

    if !output.cache.valid && output.mirror.present {
        println!();
        println!(
            "  {}",
            dim.apply_to("Restore the cache with: tether mirror write-back")
        );
    }
    println!();

    Ok(())
}

fn preview(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{}…", head)
}
