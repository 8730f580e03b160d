//! clickwork CLI: run the engine host and poke at the ledgers.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use clickwork_engine::config::{Config, EngineConfig};
use clickwork_engine::db::Db;
use clickwork_engine::engine::Engine;
use clickwork_engine::evidence::MemoryBlobStore;
use clickwork_engine::ledger::memory::MemoryLedger;
use clickwork_engine::ledger::{LedgerStore, Ledgers};
use clickwork_engine::model::UserId;
use clickwork_engine::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use tracing::info;

#[derive(Parser)]
#[command(name = "clickwork", about = "Task and workflow progression engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP host
    Serve,
    /// Mark everyone without an attendance record as absent
    Sweep {
        /// Day to sweep (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Users to sweep, comma separated (defaults to the whole directory)
        #[arg(long, value_delimiter = ',')]
        users: Vec<u64>,
    },
    /// Print a manager's gate for a day
    Gate {
        /// Manager user id
        #[arg(long)]
        manager: u64,
        /// Day to check (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "clickwork".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let engine_config = config.engine()?;
    let engine = build_engine(&config, engine_config).await?;

    match cli.command {
        Command::Serve => cmd_serve(&config, engine).await,
        Command::Sweep { date, users } => cmd_sweep(&engine, date, users).await,
        Command::Gate { manager, date } => cmd_gate(&engine, manager, date).await,
    }
}

async fn build_engine(config: &Config, engine_config: EngineConfig) -> anyhow::Result<Engine> {
    let store: Arc<dyn LedgerStore> = match (&config.database_url, &config.state_file) {
        (Some(url), _) => {
            let db = Db::connect(url.expose_secret()).await?;
            db.migrate().await?;
            db.health_check().await?;
            info!("ledgers in postgres");
            Arc::new(db)
        }
        (None, Some(path)) => {
            info!(path = %path.display(), "ledgers in local snapshot");
            Arc::new(MemoryLedger::open(path).await?)
        }
        (None, None) => {
            info!("ledgers in memory only");
            Arc::new(MemoryLedger::new())
        }
    };
    Ok(Engine::new(
        engine_config,
        Ledgers::new(store),
        Arc::new(MemoryBlobStore::new()),
    ))
}

async fn cmd_serve(config: &Config, engine: Engine) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tokio::select! {
        served = clickwork_engine::http::serve(listener, engine) => served?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

async fn cmd_sweep(engine: &Engine, date: Option<NaiveDate>, users: Vec<u64>) -> anyhow::Result<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let ids: Vec<UserId> = users.into_iter().map(UserId).collect();
    let marked = engine.sweep_absent(date, &ids).await?;

    if marked.is_empty() {
        println!("{date}: nobody marked absent.");
        return Ok(());
    }
    for id in &marked {
        println!("{date}  {id}  absent");
    }
    println!("\n{} user(s) marked absent", marked.len());
    Ok(())
}

async fn cmd_gate(engine: &Engine, manager: u64, date: Option<NaiveDate>) -> anyhow::Result<()> {
    let date = date.unwrap_or_else(|| Utc::now().date_naive());
    let manager = engine.user(UserId(manager))?;
    let report = engine.gate_state(&manager, date).await?;

    let mark = |done: bool| if done { "done" } else { "pending" };
    println!("Gate for manager {} on {date}", manager.id);
    println!("  {:<20} {}", "self attendance", mark(report.state.self_attended));
    println!("  {:<20} {}", "team verification", mark(report.state.team_verified));
    println!("  {:<20} {}", "performance", mark(report.state.performance_complete));
    println!("\n{}", serde_json::to_string(&report.status)?);
    Ok(())
}
