use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::watch;
use zoomrec_schedule::{accept_draft, select_next, LeadOffsets, OccurrenceSchedule, Window};
use zoomrec_types::{Event, EventDraft, EventField, EventStatus, EventType, Filter};
use zoomrec_worker::{EventWorker, ShellActionExecutor, WorkerConfig};

use crate::bootstrap::open_store;
use crate::cli_args::{Cli, Command, WindowArgs, WorkerArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let now = Utc::now();
    let offsets = lead_offsets(&cli.window);
    match cli.command {
        Command::Worker(ref args) => run_worker(&cli, args).await,
        Command::Validate { ref file } => {
            let draft = load_draft(file)?;
            println!("{}", render_validated(draft, now)?);
            Ok(())
        }
        Command::Occurrences { ref file, limit } => {
            let draft = load_draft(file)?;
            print!("{}", render_occurrences(draft, offsets, now, limit)?);
            Ok(())
        }
        Command::Add { ref file } => {
            let draft = load_draft(file)?;
            let store = open_store(&cli.store)?;
            let event = store.create(draft).await.context("store rejected event")?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }
        Command::Next => {
            let store = open_store(&cli.store)?;
            let events = store
                .get(None, &live_events_of(cli.window.event_type))
                .await
                .context("failed to load events")?;
            println!("{}", render_next(&events, offsets, now));
            Ok(())
        }
    }
}

fn lead_offsets(window: &WindowArgs) -> LeadOffsets {
    LeadOffsets::new(
        i64::try_from(window.lead_time_sec).unwrap_or(i64::MAX),
        i64::try_from(window.trail_time_sec).unwrap_or(i64::MAX),
    )
}

fn live_events_of(event_type: EventType) -> Vec<Filter> {
    vec![
        Filter::equal(EventField::Type, event_type),
        Filter::not_equal(EventField::Status, EventStatus::Deleted),
    ]
}

pub(crate) fn load_draft(path: &Path) -> Result<EventDraft> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Validates `draft` and renders the normalized record as JSON.
pub(crate) fn render_validated(draft: EventDraft, now: DateTime<Utc>) -> Result<String> {
    let event = accept_draft(draft, "draft", now).context("invalid event")?;
    Ok(serde_json::to_string_pretty(&event)?)
}

fn format_window(window: &Window) -> String {
    format!(
        "{}  window {} .. {}",
        window.occurrence.to_rfc3339_opts(SecondsFormat::Secs, false),
        window.start.format("%H:%M:%S"),
        window.end.format("%H:%M:%S"),
    )
}

/// Lists up to `limit` occurrences whose window has not yet closed at `now`.
pub(crate) fn render_occurrences(
    draft: EventDraft,
    offsets: LeadOffsets,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<String> {
    let event = accept_draft(draft, "draft", now).context("invalid event")?;
    let schedule = OccurrenceSchedule::resolve(&event)?;
    let mut output = String::new();
    let upcoming = schedule
        .windows(event.duration, offsets)
        .filter(|window| !window.is_expired(now))
        .take(limit);
    for window in upcoming {
        let _ = writeln!(output, "{} [{:?}]", format_window(&window), window.classify(now));
    }
    if output.is_empty() {
        output.push_str("no upcoming occurrences\n");
    }
    Ok(output)
}

pub(crate) fn render_next(events: &[Event], offsets: LeadOffsets, now: DateTime<Utc>) -> String {
    match select_next(events, offsets, now) {
        Some(selection) => format!(
            "{} {:?} {}",
            selection.event.key,
            selection.event.title,
            format_window(&selection.window)
        ),
        None => "no upcoming events".to_string(),
    }
}

async fn run_worker(cli: &Cli, args: &WorkerArgs) -> Result<()> {
    let config = WorkerConfig {
        worker_id: args.client_id.trim().to_string(),
        event_type: cli.window.event_type,
        lead_in: Duration::from_secs(cli.window.lead_time_sec),
        lead_out: Duration::from_secs(cli.window.trail_time_sec),
        poll_interval: Duration::from_secs(args.poll_interval_sec),
        ..WorkerConfig::default()
    };
    let store = open_store(&cli.store)?;
    let executor = Arc::new(ShellActionExecutor::new(
        args.join_command.clone(),
        args.postprocess_command.clone(),
    ));
    let mut worker = EventWorker::new(store, executor, config).context("invalid worker config")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping worker");
            let _ = shutdown_tx.send(true);
        }
    });
    worker.run(shutdown_rx).await
}
