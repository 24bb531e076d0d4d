//! Query command - runs a GET against the backend with the cached session.

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use serde_json::Value;

use super::Context;

/// Arguments for the query command.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Backend path, e.g. `rest/v1/doses`
    pub path: String,

    /// Query parameter as `key=value` (repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Refuse to run without a bearer token
    #[arg(long)]
    pub require_auth: bool,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Run the query command.
pub async fn run(args: QueryArgs, ctx: &Context) -> Result<()> {
    let cache = ctx.cache();
    let mirror = ctx.mirror();
    let client = ctx.client(cache, mirror)?;

    if !client.has_token().await {
        if args.require_auth {
            bail!("No valid cached session; sign in or run `tether mirror write-back`");
        }
        if !ctx.json_output {
            let yellow = Style::new().yellow();
            eprintln!("{}", yellow.apply_to("No cached session, querying anonymously"));
        }
    }

    let value: Value = client.get_with_query(&args.path, &args.params).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
