//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Authentication gateway - credential exchange and session verification
#[derive(Parser, Debug)]
#[command(name = "auth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTH_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Hash a secret read from stdin and print a credentials entry
    HashSecret {
        /// Principal identifier for the entry
        #[arg(required = true)]
        principal: String,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,

    /// Generate hex key material for `keys.initial_secret`
    GenerateKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no_subcommand() {
        let cli = Cli::parse_from(["auth-gateway"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn hash_secret_takes_principal() {
        let cli = Cli::parse_from(["auth-gateway", "hash-secret", "alice"]);
        assert!(matches!(cli.command, Some(Command::HashSecret { principal }) if principal == "alice"));
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::parse_from(["auth-gateway", "check-config", "--config", "gw.yaml"]);
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("gw.yaml")));
    }
}
