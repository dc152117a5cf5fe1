//! Grid Ensemble command line
//!
//! Subcommands:
//! - `agents`: list registered agents and their methods
//! - `call`: send one request and print the response envelope
//! - `broadcast`: invoke a method on every agent that implements it
//! - `stdio`: serve line-delimited JSON requests until stdin closes
//!
//! Logs always go to stderr so stdout carries only results.

use clap::{Parser, Subcommand};
use grid_ensemble_core::envelope::McpMessage;
use grid_ensemble_server::config::{Config, LoggingConfig};
use grid_ensemble_server::{Error, Result, Runtime};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "grid-ensemble")]
#[command(about = "Registry and dispatcher for energy monitoring agents")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered agents
    Agents,
    /// Call one method on one agent
    Call {
        agent: String,
        method: String,
        /// Request parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Deadline in milliseconds; 0 disables it
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Call a method on every agent that implements it
    Broadcast {
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Serve requests over stdin and stdout
    Stdio,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    init_tracing(&config.logging);

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from_file(path),
        None => Config::load(),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_ascii_lowercase()));
    let json = logging.is_json();

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(command: Command, config: Config) -> Result<ExitCode> {
    let runtime = Runtime::bootstrap(config).await?;
    info!("Grid Ensemble started");

    match command {
        Command::Agents => {
            print_json(&runtime.describe_agents().await?)?;
        }
        Command::Call {
            agent,
            method,
            params,
            timeout_ms,
        } => {
            let params = parse_params(&params)?;
            let timeout = timeout_ms.map(Duration::from_millis);
            let response = runtime.call(&agent, &method, params, timeout).await;
            print_json(&serde_json::to_value(&response)?)?;
            if !response.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Broadcast { method, params } => {
            let params = parse_params(&params)?;
            let report = runtime.broadcast(&method, params).await;
            let message = McpMessage::notification(method, report.to_json()?);
            print_json(&serde_json::to_value(&message)?)?;
        }
        Command::Stdio => {
            runtime.serve_stdio().await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn parse_params(raw: &str) -> Result<Value> {
    let params: Value = serde_json::from_str(raw)?;
    if !(params.is_object() || params.is_null()) {
        return Err(Error::Input("--params must be a JSON object".to_string()));
    }
    Ok(params)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
