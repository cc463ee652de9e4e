use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::audit::QueryArgs;

#[derive(Parser)]
#[command(name = "tg")]
#[command(about = "TradeGuard operator CLI", long_about = None)]
struct Cli {
    /// Config layers in merge order (base -> env -> overrides). Defaults to TG_CONFIG.
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print risk state, breaker, emergency stop and heartbeat
    Status,

    /// Reset a triggered circuit breaker (TRIGGERED -> NORMAL)
    ResetCircuitBreaker {
        /// Who is resetting; recorded as the audit actor
        #[arg(long)]
        operator: String,

        /// Keep the old drawdown baseline instead of the last reported account value
        #[arg(long, default_value_t = false)]
        no_rebase: bool,
    },

    /// Halt all new orders until cleared
    EmergencyStop {
        #[arg(long)]
        operator: String,

        #[arg(long)]
        reason: String,
    },

    /// Clear the emergency stop
    ClearEmergencyStop {
        #[arg(long)]
        operator: String,
    },

    /// Audit log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Validate an order JSON file against live state without submitting it
    Preview {
        /// Path to an Order JSON document
        #[arg(long)]
        order: PathBuf,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Print matching events as JSON lines
    Query {
        #[arg(long)]
        trade_id: Option<String>,

        /// Event type, e.g. ORDER_REJECTED
        #[arg(long)]
        event_type: Option<String>,

        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        since: Option<String>,

        /// Exclusive upper bound (RFC 3339)
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Verify the hash chain (store, or an exported JSONL file)
    Verify {
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Export the whole log as hash-chained JSONL
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => config_hash(&paths)?,

        Commands::Audit {
            cmd: AuditCmd::Verify { file: Some(path) },
        } => {
            commands::audit::verify(None, Some(&path)).await?;
        }

        cmd => {
            let cfg = commands::load_config(&cli.config_paths)?;
            let pool = commands::open_store(&cfg).await?;
            match cmd {
                Commands::Status => commands::ops::status(&pool).await?,

                Commands::ResetCircuitBreaker {
                    operator,
                    no_rebase,
                } => commands::ops::reset_circuit_breaker(&pool, &operator, !no_rebase).await?,

                Commands::EmergencyStop { operator, reason } => {
                    commands::ops::emergency_stop(&pool, &operator, &reason).await?
                }

                Commands::ClearEmergencyStop { operator } => {
                    commands::ops::clear_emergency_stop(&pool, &operator).await?
                }

                Commands::Audit { cmd } => match cmd {
                    AuditCmd::Query {
                        trade_id,
                        event_type,
                        since,
                        until,
                        limit,
                    } => {
                        let args = QueryArgs {
                            trade_id,
                            event_type,
                            since,
                            until,
                            limit,
                        };
                        commands::audit::query(&pool, &args).await?
                    }
                    AuditCmd::Verify { file } => {
                        commands::audit::verify(Some(&pool), file.as_deref()).await?
                    }
                    AuditCmd::Export { out } => commands::audit::export(&pool, &out).await?,
                },

                Commands::Preview { order } => {
                    commands::preview::preview(&cfg, pool, &order).await?
                }

                Commands::ConfigHash { paths } => config_hash(&paths)?,
            }
        }
    }

    Ok(())
}

fn config_hash(paths: &[String]) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = tg_config::load_layered_yaml(&refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}
