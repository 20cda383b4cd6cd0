// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relaygate::config::GatewayConfig;
use relaygate::fetch::ResilientFetcher;
use relaygate::server::Server;
use relaygate::store::SessionStore;
use relaygate::upstream::{LivenessValidator, UpstreamClient};
use relaygate::utils::mask_credential;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// Data error - the upstream rejected the credential
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - upstream unreachable or misconfigured
    pub const SERVICE_UNAVAILABLE: i32 = 69;
}

#[derive(Parser)]
#[command(name = "relaygate")]
#[command(author, version, about = "Credential-pool gateway for an upstream session API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode: warnings and errors only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: detailed output for debugging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Comma-separated upstream session ids to import
    #[arg(long, env = "SESSION_ID", global = true, hide_env_values = true)]
    session_ids: Option<String>,

    /// Base URL of the upstream service
    #[arg(long, env = "UPSTREAM_URL", global = true)]
    upstream_url: Option<String>,

    /// Directory holding sessions.json
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Per-attempt timeout for upstream calls (milliseconds)
    #[arg(long, global = true)]
    fetch_timeout_ms: Option<u64>,

    /// Retries after the first upstream attempt
    #[arg(long, global = true)]
    fetch_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default)
    ///
    /// Examples:
    ///   relaygate serve
    ///   relaygate serve --port 9000 --upstream-url http://127.0.0.1:3000
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        /// Address to bind to
        #[arg(long, env = "RELAYGATE_BIND")]
        bind: Option<String>,
    },

    /// List stored sessions
    Sessions,

    /// Ask the upstream whether a session id is live
    Check {
        /// The session id to check
        session_id: String,
    },
}

impl Cli {
    /// Defaults, then the config file, then flags and environment.
    fn resolve_config(&self) -> Result<GatewayConfig> {
        let mut config = GatewayConfig::load_or_default(self.config.as_deref())?;

        if let Some(ids) = &self.session_ids {
            config.session_ids = Some(ids.clone());
        }
        if let Some(url) = &self.upstream_url {
            config.upstream_url = Some(url.clone());
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(timeout_ms) = self.fetch_timeout_ms {
            config.fetch.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.fetch_retries {
            config.fetch.retries = retries;
        }
        if let Some(Commands::Serve { port, bind }) = &self.command {
            if let Some(port) = port {
                config.port = *port;
            }
            if let Some(bind) = bind {
                config.bind_address = bind.clone();
            }
        }

        Ok(config)
    }

    fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

fn init_tracing(default_level: &str) {
    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relaygate={0},tower_http={0}", default_level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.default_log_level());

    let config = cli.resolve_config()?;

    match cli.command {
        None | Some(Commands::Serve { .. }) => {
            let runtime =
                tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            runtime.block_on(serve(config))
        }
        Some(Commands::Sessions) => list_sessions(&config),
        Some(Commands::Check { session_id }) => {
            let runtime =
                tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let code = runtime.block_on(check_session(&config, &session_id))?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
    }
}

async fn serve(config: GatewayConfig) -> Result<()> {
    println!(
        "{} v{} listening on {}",
        "relaygate".bright_cyan().bold(),
        VERSION,
        format!("http://{}", config.listen_address()).bold()
    );
    if let Some(url) = &config.upstream_url {
        println!("  Upstream: {}", url);
    }
    println!("  Sessions: {}", config.session_store().path().display());
    println!();

    Server::new(config).start().await
}

fn format_millis(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn list_sessions(config: &GatewayConfig) -> Result<()> {
    let store = config.session_store();
    let sessions = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    if sessions.is_empty() {
        println!("No stored sessions in {}", store.path().display());
        if config.env_credentials().is_empty() {
            println!("Set SESSION_ID or add one with POST /admin/sessions.");
        } else {
            println!("SESSION_ID is set; its ids are imported when the server starts.");
        }
        return Ok(());
    }

    println!(
        "{:<14} {:<9} {:<28} {}",
        "SESSION".bold(),
        "STATUS".bold(),
        "NAME".bold(),
        "UPDATED".bold()
    );
    for session in &sessions {
        let status = if session.active {
            "active".green()
        } else {
            "inactive".dimmed()
        };
        println!(
            "{:<14} {:<9} {:<28} {}",
            mask_credential(&session.id),
            status,
            session.name,
            format_millis(session.updated_at)
        );
    }

    let active = sessions.iter().filter(|session| session.active).count();
    println!();
    println!("{} sessions ({} active)", sessions.len(), active);

    Ok(())
}

async fn check_session(config: &GatewayConfig, session_id: &str) -> Result<i32> {
    let client = UpstreamClient::new(
        config.upstream_url.clone(),
        ResilientFetcher::new(config.fetch),
    )
    .with_liveness_path(config.liveness_path.clone());

    let masked = mask_credential(session_id);
    match client.is_live(session_id).await {
        Ok(true) => {
            println!("{} {} is live", "[OK]".green(), masked);
            Ok(0)
        }
        Ok(false) => {
            println!("{} {} was rejected by the upstream", "[X]".red(), masked);
            Ok(exit_codes::DATA_ERR)
        }
        Err(e) => {
            eprintln!("{} Could not check {}: {}", "[!]".yellow(), masked, e);
            Ok(exit_codes::SERVICE_UNAVAILABLE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "relaygate",
            "--upstream-url",
            "http://up",
            "--fetch-retries",
            "0",
            "serve",
            "--port",
            "9100",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.upstream_url.as_deref(), Some("http://up"));
        assert_eq!(config.fetch.retries, 0);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_log_level_flags() {
        assert_eq!(Cli::parse_from(["relaygate", "-v"]).default_log_level(), "debug");
        assert_eq!(Cli::parse_from(["relaygate", "-q"]).default_log_level(), "warn");
    }
}
