//! Auth Gateway - credential exchange, signed session tokens, revocation

use std::io::BufRead;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use auth_gateway::{
    cli::{Cli, Command},
    config::Config,
    credential::{Principal, credentials_yaml},
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::HashSecret { ref principal }) => run_hash_secret(principal),
        Some(Command::CheckConfig) => run_check_config(&cli),
        Some(Command::GenerateKey) => run_generate_key(),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Read one line from stdin and print a credentials file entry for it
fn run_hash_secret(principal: &str) -> ExitCode {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        eprintln!("Failed to read secret from stdin: {e}");
        return ExitCode::FAILURE;
    }
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        eprintln!("Secret must not be empty");
        return ExitCode::FAILURE;
    }

    match credentials_yaml(&[Principal::new(principal, secret)]) {
        Ok(yaml) => {
            print!("{yaml}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render entry: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_check_config(cli: &Cli) -> ExitCode {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            if let Err(e) = config.keys.initial_signing_key() {
                eprintln!("Invalid signing key configuration: {e}");
                return ExitCode::FAILURE;
            }
            if let Err(e) = config.admin.resolve_bearer_token() {
                eprintln!("Invalid admin configuration: {e}");
                return ExitCode::FAILURE;
            }
            println!(
                "Configuration OK (listen {}:{}, ttl {}s, {} inline principal(s){})",
                config.server.host,
                config.server.port,
                config.tokens.ttl.as_secs(),
                config.credentials.principals.len(),
                config
                    .credentials
                    .file
                    .as_ref()
                    .map(|p| format!(", credentials file {}", p.display()))
                    .unwrap_or_default()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_generate_key() -> ExitCode {
    let material: [u8; 32] = rand::random();
    println!("{}", hex::encode(material));
    ExitCode::SUCCESS
}

async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        principals = config.credentials.principals.len(),
        lockout = config.lockout.enabled,
        "Starting Auth Gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
