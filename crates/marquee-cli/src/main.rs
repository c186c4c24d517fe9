//! 🚀 marquee-cli — the box office. Sells you a ticket to the ETL or the API,
//! then gets out of the way.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! This binary loads config, sets up logging, picks a subcommand, and lets
//! the library do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "marquee", version, about = "🎬 movie catalog ETL and read API")]
struct Cli {
    /// 📋 TOML config file. Env vars prefixed `MARQUEE_` apply either way.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🔄 Sync Postgres into Elasticsearch.
    Etl {
        /// one pass and exit, instead of looping until Ctrl-C
        #[arg(long)]
        once: bool,
    },
    /// 🌐 Serve the read API.
    Serve,
    /// 📁 Print the ETL state file.
    State,
}

/// 🕵️ Sniff the error chain for the smell of a service that isn't there.
fn looks_like_connectivity(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let cause = cause.to_string();
        cause.contains("error sending request")
            || cause.contains("connection refused")
            || cause.contains("Connection refused")
            || cause.contains("tcp connect error")
            || cause.contains("dns error")
            || cause.contains("pool timed out")
    })
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 a config path that doesn't exist is a typo, not a request for defaults
    if let Some(path) = &cli.config {
        let exists = path.try_exists().with_context(|| {
            format!(
                "💀 Could not check whether the config file exists. Was checking here: '{}'",
                path.display()
            )
        })?;
        if !exists {
            anyhow::bail!(
                "💀 Configuration file '{}' does not exist. Relative paths are relative to the cwd; an absolute path removes all doubt.",
                path.display()
            );
        }
    }

    let app_config = marquee::app_config::load_config(cli.config.as_deref())
        .context("💀 Couldn't load the config. Take a look at the file and the MARQUEE_* env vars.")?;

    match cli.command {
        Command::Etl { once } => marquee::run_etl(app_config, once).await,
        Command::Serve => marquee::serve(app_config).await,
        Command::State => {
            println!("{}", marquee::show_state(&app_config).await?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    // 📡 RUST_LOG if set, info otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // 🧅 peel the onion, one layer at a time
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
        }
        if looks_like_connectivity(&err) {
            error!(
                "🔧 hint: looks like a service isn't reachable. \
                Check that Postgres, Elasticsearch and Redis are actually running. \
                If you're using Docker, `docker compose ps` shows who showed up. ☕"
            );
        }
        std::process::exit(1);
    }
}
