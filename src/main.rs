use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use rollcall_core::{ActorId, Clock, EventId, SystemClock};
use rollcall_engine::{Notifier, ReminderConfig, ReminderScheduler, SessionConfig, SessionTracker};
use rollcall_server::{
    run_console, AccessPolicy, ConsoleMessenger, Orchestrator, ServerConfig, WorkerPool,
};
use rollcall_settings::Settings;
use rollcall_store::{Database, EventRepo, RegistrationLedger};
use rollcall_telemetry::{init_telemetry, LogFilter, TelemetryConfig, WarningLog};

#[derive(Parser)]
#[command(name = "rollcall", about = "Capacity-limited event registration with reminders")]
struct Cli {
    /// Settings file (defaults to ~/.rollcall/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve actions from stdin and deliver reminders (default).
    Serve,
    /// List events that started a while ago.
    Past {
        /// Minimum age of the start, in hours.
        #[arg(long)]
        hours: Option<u64>,
        /// List every stored event instead.
        #[arg(long)]
        all: bool,
    },
    /// Delete an event together with its registrations.
    Delete { id: i64 },
    /// Show persisted warnings and errors.
    Logs {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        event: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => rollcall_settings::load_settings_from_path(path),
        None => rollcall_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(telemetry_config(&settings));

    let db_path = settings.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&settings, db, clock).await,
        Command::Past { hours, all } => past(&settings, db, clock, hours, all),
        Command::Delete { id } => delete(db, clock, EventId::new(id)),
        Command::Logs { level, event, limit } => logs(&settings, level, event, limit),
    }
}

fn telemetry_config(settings: &Settings) -> TelemetryConfig {
    let log_level = settings.logging.level.parse::<Level>().unwrap_or_else(|_| {
        eprintln!("rollcall: unknown log level {:?}, using info", settings.logging.level);
        Level::INFO
    });
    TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.logging.log_db_path(),
    }
}

async fn serve(settings: &Settings, db: Database, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    let events = EventRepo::new(db.clone(), clock.clone());
    let ledger = RegistrationLedger::new(db, clock.clone());
    let notifier = Notifier::new(
        Arc::new(ConsoleMessenger::stdout()),
        settings.reminders.delivery_timeout(),
    );
    let active_grace = hours_span(settings.events.active_grace_hours)
        .context("activeGraceHours out of range")?;

    let scheduler = ReminderScheduler::new(
        events.clone(),
        ledger.clone(),
        notifier.clone(),
        clock.clone(),
        ReminderConfig {
            remind_before: chrono::Duration::from_std(settings.reminders.remind_before())
                .context("remind_before out of range")?,
            active_grace,
            template: settings.reminders.template.clone(),
        },
    );
    let rebuilt = scheduler.rebuild_from_store().context("failed to rebuild reminders")?;
    info!(scheduled = rebuilt.scheduled, skipped = rebuilt.skipped, "reminders restored");

    let admins: Vec<ActorId> = settings.admin_ids.iter().copied().map(ActorId::new).collect();
    if admins.is_empty() {
        warn!("no admin ids configured, organizer actions are disabled");
    }

    let sessions = Arc::new(SessionTracker::new(
        events.clone(),
        ledger.clone(),
        scheduler.clone(),
        notifier.clone(),
        clock,
        SessionConfig {
            idle_timeout: settings.sessions.idle_timeout(),
            link_template: settings.broadcast.link_template.clone(),
            privileged: admins.clone(),
        },
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        events,
        ledger,
        sessions.clone(),
        notifier,
        AccessPolicy::new(admins),
        active_grace,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = sessions.spawn_sweeper(settings.sessions.sweep_interval(), shutdown.clone());
    let pool = WorkerPool::start(
        orchestrator,
        &ServerConfig {
            workers: settings.server.workers,
            queue_capacity: settings.server.queue_capacity,
        },
        shutdown.clone(),
    );

    info!(workers = pool.size(), "rollcall ready");

    tokio::select! {
        result = run_console(BufReader::new(tokio::io::stdin()), &pool, shutdown.clone()) => {
            let queued = result.context("console input failed")?;
            info!(queued, "console closed, delivering reminders until interrupted");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl+c")?;
        }
    }

    info!("shutting down");
    pool.drain().await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "session sweeper failed");
    }
    let cancelled = scheduler.cancel_all();
    info!(cancelled, "pending reminders dropped");
    Ok(())
}

fn past(
    settings: &Settings,
    db: Database,
    clock: Arc<dyn Clock>,
    hours: Option<u64>,
    all: bool,
) -> anyhow::Result<()> {
    let now = clock.now();
    let repo = EventRepo::new(db, clock);
    let events = if all {
        repo.list_all()?
    } else {
        let age = hours.unwrap_or(settings.events.past_after_hours);
        let span = hours_span(age).with_context(|| format!("--hours {age} is out of range"))?;
        repo.list_past(span)?
    };

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    for event in events {
        let status = if event.starts_at() <= now { "finished" } else { "active" };
        println!(
            "#{} {} {} | {}/{} registered | {} | {}",
            event.id,
            event.end_date,
            event.event_time.format("%H:%M"),
            event.registered,
            event.max_participants,
            status,
            event.info
        );
    }
    Ok(())
}

fn hours_span(n: u64) -> Option<chrono::Duration> {
    i64::try_from(n).ok().and_then(chrono::Duration::try_hours)
}

fn delete(db: Database, clock: Arc<dyn Clock>, id: EventId) -> anyhow::Result<()> {
    let repo = EventRepo::new(db, clock);
    if repo.delete(id)? {
        println!("Event #{id} deleted.");
    } else {
        println!("Event #{id} does not exist.");
    }
    Ok(())
}

fn logs(
    settings: &Settings,
    level: Option<String>,
    event: Option<i64>,
    limit: u32,
) -> anyhow::Result<()> {
    let log = WarningLog::open(&settings.logging.log_db_path())
        .context("failed to open log database")?;
    let entries = log.recent(&LogFilter {
        level,
        event_id: event,
        limit,
    })?;
    for e in entries {
        let event = e.event_id.map(|id| format!(" event=#{id}")).unwrap_or_default();
        println!("{} {:<5} {}{} {}", e.timestamp, e.level, e.target, event, e.message);
    }
    Ok(())
}
