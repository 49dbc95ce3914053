//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sy_domain::config::{Config, ConfigSeverity};

/// Switchyard reference server and client.
#[derive(Debug, Parser)]
#[command(name = "sy-hello", version, about)]
pub struct Cli {
    /// TOML config file.  A missing file means defaults.
    #[arg(long, global = true, env = "SY_CONFIG", default_value = "switchyard.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the demo router over HTTP and WebSocket (default).
    Serve,
    /// Call a query and print its result.
    Call {
        /// Procedure path, e.g. `helloWorld` or `users/id:7`.
        path: String,
        /// JSON input.
        #[arg(long)]
        input: Option<String>,
        /// Use the single-shot HTTP transport instead of the duplex socket.
        #[arg(long)]
        http: bool,
    },
    /// Subscribe and print every message until interrupted.
    Watch {
        path: String,
        #[arg(long)]
        input: Option<String>,
    },
    /// Check the config file and print any issues.
    Validate,
}

/// Load the config and report whether it is usable.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

/// Parse an optional `--input` argument.
pub fn parse_input(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let value = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("--input is not valid JSON: {e}"))?;
            Ok(Some(value))
        }
    }
}
