//! Gateway Daemon - Owning Process for the LLM Gateway
//!
//! Loads configuration, wires one instance of each gateway component and
//! drives the dispatcher.
//!
//! # Usage
//!
//! ```bash
//! # Run until SIGINT/SIGTERM
//! gateway-daemon serve
//!
//! # One-shot request
//! gateway-daemon ask "Summarize RFC 9110" --priority high --tier premium
//!
//! # Models served by the backend
//! gateway-daemon models
//!
//! # Print the effective configuration
//! gateway-daemon --config ./gateway.toml check-config
//!
//! # Verbose logging
//! RUST_LOG=debug gateway-daemon serve
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (drains in-flight requests)

mod server;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use gateway_core::{
    default_config_path, load_config_from_path, CallerTier, GatewayConfig, InferenceBackend,
    PriorityLabel, Request,
};

/// Gateway Daemon - priority dispatcher in front of a shared LLM backend
#[derive(Parser, Debug)]
#[command(name = "gateway-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "GATEWAY_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "GATEWAY_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher until interrupted (default)
    Serve {
        /// Seconds between health log lines
        #[arg(long, default_value_t = 60)]
        health_interval_secs: u64,
    },

    /// Submit one request and print the response
    Ask {
        /// Prompt text
        prompt: String,

        /// Priority label
        #[arg(short, long, default_value = "normal")]
        priority: PriorityLabel,

        /// Caller identity
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Caller tier
        #[arg(long, default_value = "basic")]
        tier: CallerTier,

        /// Preferred model
        #[arg(short, long)]
        model: Option<String>,

        /// Enrich the prompt with retrieved context
        #[arg(long)]
        enrich: bool,

        /// Maximum output tokens
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Seconds to wait (defaults to the priority's timeout)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the response
        #[arg(long)]
        metrics: bool,
    },

    /// List models served by the backend
    Models,

    /// Load, validate and print the effective configuration
    CheckConfig,
}

/// Initialize logging with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(format!(
            "gateway_daemon={level},gateway_core={level}"
        ))
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

fn load(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let path = path.or_else(default_config_path);
    let config = load_config_from_path(path.clone())
        .with_context(|| format!("Failed to load configuration from {path:?}"))?;
    config.validate().context("Configuration is invalid")?;
    info!(source = %config.source(), "Configuration loaded");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = load(args.config)?;

    match args.command.unwrap_or(Command::Serve {
        health_interval_secs: 60,
    }) {
        Command::Serve {
            health_interval_secs,
        } => {
            info!("Gateway daemon starting");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));
            info!("PID: {}", std::process::id());
            server::serve(&config, Duration::from_secs(health_interval_secs.max(1))).await
        }
        Command::Ask {
            prompt,
            priority,
            caller,
            tier,
            model,
            enrich,
            max_tokens,
            timeout_secs,
            json,
            metrics,
        } => {
            let mut request = Request::new(prompt)
                .with_priority(priority)
                .with_caller(caller, tier)
                .with_enrichment(enrich);
            if let Some(model) = model {
                request = request.with_model_hint(model);
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }

            let dispatcher = server::build(&config).await;
            dispatcher.start();
            let result = dispatcher
                .ask(request, timeout_secs.map(Duration::from_secs))
                .await;
            dispatcher.shutdown().await;
            let response = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let Some(error) = &response.error {
                anyhow::bail!("request failed on {}: {error}", response.model);
            } else {
                println!("{}", response.text);
                eprintln!(
                    "[{} | {} tokens | {} ms{}]",
                    response.model,
                    response.tokens_used,
                    response.duration_ms,
                    if response.cache_hit { " | cached" } else { "" }
                );
            }
            if metrics {
                print!("{}", dispatcher.monitor().to_prometheus());
            }
            Ok(())
        }
        Command::Models => {
            let backend = server::backend(&config);
            let models = backend
                .list_models()
                .await
                .with_context(|| {
                    format!(
                        "Failed to reach backend at {}:{}",
                        config.backend.host, config.backend.port
                    )
                })?;
            for descriptor in &config.models {
                let marker = if models.contains(&descriptor.name) { "*" } else { " " };
                println!(
                    "{marker} {:<24} {:<14} {:>6} MB",
                    descriptor.name,
                    descriptor.capability.to_string(),
                    descriptor.memory_mb
                );
            }
            for name in models.iter().filter(|m| !config.models.iter().any(|d| &d.name == *m)) {
                println!("  {name:<24} (not in catalog)");
            }
            Ok(())
        }
        Command::CheckConfig => {
            println!("# source: {}", config.source());
            if let Some(path) = &config.config_file_path {
                println!("# file: {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_command_is_serve() {
        let args = Args::parse_from(["gateway-daemon"]);
        assert!(args.command.is_none());
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_ask_arguments() {
        let args = Args::parse_from([
            "gateway-daemon",
            "ask",
            "hello",
            "--priority",
            "critical",
            "--tier",
            "premium",
            "--enrich",
        ]);
        match args.command {
            Some(Command::Ask {
                prompt,
                priority,
                tier,
                enrich,
                ..
            }) => {
                assert_eq!(prompt, "hello");
                assert_eq!(priority, PriorityLabel::Critical);
                assert_eq!(tier, CallerTier::Premium);
                assert!(enrich);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_priority() {
        assert!(Args::try_parse_from(["gateway-daemon", "ask", "hi", "--priority", "urgent"]).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\ngate_capacity = 0").unwrap();
        assert!(load(Some(file.path().to_path_buf())).is_err());
    }
}
