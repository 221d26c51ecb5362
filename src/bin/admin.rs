//! Model Gateway Admin CLI
//!
//! Talks to a running gateway's admin HTTP surface: inspect the model
//! registry, invalidate cache entries, override a budget, and tail
//! per-provider circuit state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

#[derive(Parser)]
#[command(name = "model-gateway-admin")]
#[command(about = "Model Gateway Admin CLI - inspect and operate a running gateway")]
#[command(version = "1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the running gateway
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:8080")]
    gateway_url: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered models
    ListModels,

    /// Show a single model's definition
    GetModel {
        model_id: String,
    },

    /// Set a model's status (active, deprecated, disabled)
    SetModelStatus {
        model_id: String,
        status: String,
    },

    /// Show per-provider circuit breaker state
    Providers,

    /// Show the JSON metrics snapshot
    Metrics,

    /// Invalidate a single cache entry
    InvalidateCache {
        #[arg(long)]
        cache_key: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Grant additional budget at a given level
    OverrideBudget {
        /// org, project, or agent
        level: String,
        key: String,
        amount_cents: f64,
    },

    /// Liveness/readiness check
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let client = reqwest::Client::new();
    let base = cli.gateway_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::ListModels => {
            let body: serde_json::Value = client
                .get(format!("{base}/v1/models"))
                .send()
                .await
                .context("requesting model list")?
                .json()
                .await?;
            print_json("models", &body);
        }

        Commands::GetModel { model_id } => {
            let response = client.get(format!("{base}/v1/models/{model_id}")).send().await?;
            if response.status().is_success() {
                let body: serde_json::Value = response.json().await?;
                print_json(&model_id, &body);
            } else {
                eprintln!("{}", format!("model {model_id} not found").red());
            }
        }

        Commands::SetModelStatus { model_id, status } => {
            let response = client
                .post(format!("{base}/v1/models/{model_id}/status"))
                .json(&serde_json::json!({ "status": status }))
                .send()
                .await?;
            if response.status().is_success() {
                info!("{}", format!("updated {model_id} status to {status}").green());
            } else {
                eprintln!("{}", format!("failed to update {model_id}: {}", response.status()).red());
            }
        }

        Commands::Providers => {
            let body: serde_json::Value = client
                .get(format!("{base}/healthz/providers"))
                .send()
                .await
                .context("requesting provider health")?
                .json()
                .await?;
            print_json("providers", &body);
        }

        Commands::Metrics => {
            let body: serde_json::Value = client.get(format!("{base}/metrics")).send().await?.json().await?;
            print_json("metrics", &body);
        }

        Commands::InvalidateCache { cache_key, prefix } => {
            if cache_key.is_none() && prefix.is_none() {
                eprintln!("{}", "specify --cache-key or --prefix".red());
                return Ok(());
            }
            let response = client
                .post(format!("{base}/v1/cache/invalidate"))
                .json(&serde_json::json!({ "cache_key": cache_key, "prefix": prefix }))
                .send()
                .await?;
            if response.status().is_success() {
                info!("{}", "cache invalidation accepted".green());
            } else {
                eprintln!("{}", format!("invalidation failed: {}", response.status()).red());
            }
        }

        Commands::OverrideBudget { level, key, amount_cents } => {
            let response = client
                .post(format!("{base}/v1/budget/override"))
                .json(&serde_json::json!({ "level": level, "key": key, "amount_cents": amount_cents }))
                .send()
                .await?;
            if response.status().is_success() {
                let body: serde_json::Value = response.json().await?;
                print_json("budget", &body);
            } else {
                eprintln!("{}", format!("override failed: {}", response.status()).red());
            }
        }

        Commands::Health => {
            let live = client.get(format!("{base}/healthz/live")).send().await?.status();
            let ready = client.get(format!("{base}/healthz/ready")).send().await?.status();
            println!("live:  {}", if live.is_success() { "ok".green() } else { "down".red() });
            println!("ready: {}", if ready.is_success() { "ok".green() } else { "down".red() });
        }
    }

    Ok(())
}

fn print_json(label: &str, value: &serde_json::Value) {
    println!("{}", label.bold());
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
