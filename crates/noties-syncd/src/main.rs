use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use noties_core::{sorted_notes, Config, DayPlan, Note, StorePath};
use std::sync::Arc;
use tokio::time::Duration;

use noties_syncd::config::load_syncd_config;
use noties_syncd::connectivity::spawn_probe;
use noties_syncd::{
    connectivity, CacheNamespace, EngineEvent, LocalDb, MemoryRemote, Reconciler, RemoteStore,
    SyncContext, SyncEngine, WsRemote,
};

#[derive(Parser)]
#[command(name = "noties-syncd", about = "Offline-first sync daemon for noties")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync daemon until Ctrl-C
    Run {
        /// Keep everything in-process; no remote server is contacted
        #[arg(long)]
        local_only: bool,

        /// Scope token, overriding the config file
        #[arg(long)]
        scope: Option<String>,

        /// Also keep the day plan for this date (YYYY-MM-DD) in sync
        #[arg(long)]
        day: Option<String>,
    },
    /// Show pending changes and cached record counts
    Status {
        #[arg(long)]
        scope: Option<String>,
    },
    /// Replay the pending-change queue against the server once
    Drain,
    /// Print cached notes, newest first
    Notes {
        #[arg(long)]
        scope: Option<String>,
    },
    /// Print the JSON schema of the configuration file
    ConfigSchema,
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn resolve_scope(config: &Config, flag: Option<String>) -> Result<String> {
    match flag.or_else(|| config.scope().map(str::to_string)) {
        Some(scope) if StorePath::is_segment(scope.trim()) => Ok(scope.trim().to_string()),
        Some(scope) if !scope.trim().is_empty() => bail!("Invalid scope token: {scope}"),
        _ => bail!("No scope configured; pass --scope or set sync.scope"),
    }
}

fn remote_for(config: &Config) -> Result<WsRemote> {
    let url = config
        .sync
        .server_url
        .as_deref()
        .context("No server_url configured in [sync]")?;
    Ok(WsRemote::new(url, config.sync.auth_token.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::ConfigSchema = args.command {
        println!("{}", Config::generate_schema()?);
        return Ok(());
    }

    let loaded = load_syncd_config(args.config.as_deref())?;
    init_logging(&loaded.config, args.verbose);
    if loaded.created {
        tracing::info!(path = %loaded.path.display(), "wrote default config");
    }
    let config = loaded.config;
    let db_path = config.database_path()?;

    match args.command {
        Command::Run {
            local_only,
            scope,
            day,
        } => {
            let scope = resolve_scope(&config, scope)?;
            let day = day
                .map(|raw| {
                    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                        .with_context(|| format!("Invalid --day value: {raw}"))
                })
                .transpose()?;
            run(&config, local_only, scope, day).await
        }
        Command::Status { scope } => {
            let scope = resolve_scope(&config, scope)?;
            let db = LocalDb::open(&db_path)?;
            let ctx = SyncContext::new(Arc::new(MemoryRemote::new()), db);
            println!("Database: {}", db_path.display());
            println!("Scope: {scope}");
            println!("Pending changes: {}", ctx.queue.len()?);
            println!(
                "Cached notes: {}",
                ctx.cache.count(CacheNamespace::Notes, &scope)?
            );
            println!(
                "Cached day plans: {}",
                ctx.cache.count(CacheNamespace::DayPlans, &scope)?
            );
            Ok(())
        }
        Command::Drain => {
            let remote = remote_for(&config)?;
            let ctx = SyncContext::open(Arc::new(remote), &db_path)?;
            let report = Reconciler::new(ctx).drain().await;
            println!(
                "Replayed {}, failed {}, remaining {}",
                report.replayed, report.failed, report.remaining
            );
            Ok(())
        }
        Command::Notes { scope } => {
            let scope = resolve_scope(&config, scope)?;
            let ctx = SyncContext::open(Arc::new(MemoryRemote::new()), &db_path)?;
            let notes: Vec<Note> = ctx.cache.get_all(CacheNamespace::Notes, &scope)?;
            for note in sorted_notes(&notes) {
                let updated = note
                    .updated_at
                    .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{updated}  {}  {}", note.id, note.title);
            }
            Ok(())
        }
        Command::ConfigSchema => Ok(()),
    }
}

async fn run(
    config: &Config,
    local_only: bool,
    scope: String,
    day: Option<NaiveDate>,
) -> Result<()> {
    let db_path = config.database_path()?;
    let local_only = local_only || config.sync.server_url.is_none();

    let (handle, mut monitor) = connectivity(local_only);
    let remote: Arc<dyn RemoteStore> = if local_only {
        tracing::info!("running in local-only mode");
        Arc::new(MemoryRemote::new())
    } else {
        let remote = remote_for(config)?;
        tracing::info!(url = %remote.url(), "syncing with remote store");
        let probe_url = config.sync.server_url.clone().unwrap_or_default();
        let interval = Duration::from_secs(config.sync.probe_interval_seconds.max(1));
        spawn_probe(probe_url, interval, handle.clone());
        Arc::new(remote)
    };

    let ctx = SyncContext::open(remote, &db_path)?;
    let mut engine = SyncEngine::new(ctx, monitor.clone());
    engine.handle(EngineEvent::ScopeChanged(Some(scope))).await;
    if let Some(day) = day {
        engine
            .planner_mut()
            .load_day_plan(&DayPlan::date_key(day))
            .await;
    }
    if monitor.is_online() {
        engine.handle(EngineEvent::Online).await;
    }

    let mut notes_status = engine.notes().watch_status();
    let mut planner_status = engine.planner().watch_status();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("received shutdown signal, stopping noties-syncd");
                break;
            }
            changed = monitor.changed() => match changed {
                Some(true) => {
                    engine.handle(EngineEvent::Online).await;
                }
                Some(false) => {
                    engine.handle(EngineEvent::Offline).await;
                }
                None => break,
            },
            _ = engine.pump() => {}
            Ok(()) = notes_status.changed() => {
                tracing::info!("notes: {}", *notes_status.borrow_and_update());
            }
            Ok(()) = planner_status.changed() => {
                tracing::info!("planner: {}", *planner_status.borrow_and_update());
            }
        }
    }

    engine.shutdown();
    drop(handle);
    Ok(())
}
