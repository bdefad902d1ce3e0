//! # LeadCRM scheduler host
//!
//! Usage:
//!   leadcrm run                        # Start the background scheduler until Ctrl-C
//!   leadcrm tick                       # Run one message tick and one contact tick, then exit
//!   leadcrm dashboard --user 1         # Print a user's dashboard summary as JSON
//!   leadcrm check-delivery             # Verify the configured delivery transport

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leadcrm_core::config::CrmConfig;
use leadcrm_core::traits::{DeliveryGateway, SystemClock};
use leadcrm_core::types::ItemClass;
use leadcrm_db::CrmDb;
use leadcrm_scheduler::{CrmScheduler, TickOutcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leadcrm", version, about = "📇 LeadCRM: scheduled follow-ups and messages")]
struct Cli {
    /// Config file (default: ~/.leadcrm/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Process everything due right now, once per class
    Tick,
    /// Show the dashboard summary for a user
    Dashboard {
        #[arg(short, long)]
        user: i64,
    },
    /// Check credentials and connectivity of the delivery transport
    CheckDelivery,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

fn init_logging(verbose: bool, format: LogFormat) {
    let fallback = if verbose {
        "leadcrm=debug,leadcrm_scheduler=debug,leadcrm_db=debug,leadcrm_channels=debug"
    } else {
        "leadcrm=info,leadcrm_scheduler=info,leadcrm_db=info,leadcrm_channels=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CrmConfig> {
    let config = match path {
        Some(path) => {
            let mut config = CrmConfig::load_from(path)?;
            config.apply_env_overrides();
            config.validate()?;
            config
        }
        None => CrmConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &CrmConfig) -> Result<Arc<CrmDb>> {
    let path = config.database_path();
    let db = CrmDb::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run => {
            let db = open_db(&config)?;
            let gateway = leadcrm_channels::gateway_from_config(&config.delivery)?;
            let scheduler = CrmScheduler::new(db, gateway, Arc::new(SystemClock), &config.scheduler);

            scheduler.start();
            tracing::info!("🚀 LeadCRM scheduler running (Ctrl-C to stop)");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

            tracing::info!("Shutting down...");
            scheduler.stop().await;
            let stats = scheduler.stats();
            tracing::info!(
                "📊 Delivered {} message(s), notified {} contact(s), {} failure(s)",
                stats.messages.transitioned,
                stats.contacts.transitioned,
                stats.messages.failed + stats.contacts.failed
            );
        }
        Command::Tick => {
            let db = open_db(&config)?;
            let gateway = leadcrm_channels::gateway_from_config(&config.delivery)?;
            let scheduler = CrmScheduler::new(db, gateway, Arc::new(SystemClock), &config.scheduler);

            for class in [ItemClass::Messages, ItemClass::Contacts] {
                match scheduler.run_tick(class).await? {
                    TickOutcome::Completed(report) => {
                        println!("{}", serde_json::to_string(&report)?);
                    }
                    TickOutcome::Skipped => println!("{class}: skipped"),
                }
            }
        }
        Command::Dashboard { user } => {
            let db = open_db(&config)?;
            let summary = db.dashboard(user, chrono::Utc::now(), config.utc_offset_minutes)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::CheckDelivery => {
            let gateway = leadcrm_channels::gateway_from_config(&config.delivery)?;
            match gateway.health_check().await {
                Ok(()) => println!("✅ {}: OK", gateway.name()),
                Err(e) => {
                    println!("❌ {}: {e}", gateway.name());
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
