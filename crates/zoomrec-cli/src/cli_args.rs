use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use zoomrec_schedule::LeadOffsets;
use zoomrec_types::EventType;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_window_margin(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    let max = LeadOffsets::MAX_SECS.unsigned_abs();
    if parsed > max {
        return Err(format!("value must be at most {max} seconds"));
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_event_type(value: &str) -> Result<EventType, String> {
    value.parse::<EventType>().map_err(|error| error.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "zoomrec",
    about = "Schedule, claim and record meeting events across a pool of workers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(
        long = "log-level",
        env = "LOG_LEVEL",
        default_value = "info",
        global = true,
        help = "Default log level when RUST_LOG is not set"
    )]
    pub log_level: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub window: WindowArgs,
}

/// Where events live: the remote event service or a local SQLite file.
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    #[arg(
        long = "server-url",
        env = "SERVER_URL",
        global = true,
        help = "Event service root; selects the HTTP store instead of SQLite"
    )]
    pub server_url: Option<String>,

    #[arg(
        long = "server-username",
        env = "SERVER_USERNAME",
        global = true,
        help = "Basic auth user for the event service"
    )]
    pub server_username: Option<String>,

    #[arg(
        long = "server-password",
        env = "SERVER_PASSWORD",
        global = true,
        hide_env_values = true,
        help = "Basic auth password for the event service"
    )]
    pub server_password: Option<String>,

    #[arg(
        long = "db-path",
        env = "ZOOMREC_DB_PATH",
        default_value = ".zoomrec/events.sqlite3",
        global = true,
        help = "SQLite database used when no server URL is configured"
    )]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct WindowArgs {
    #[arg(
        long = "lead-time-sec",
        env = "LEAD_TIME_SEC",
        default_value_t = 60,
        value_parser = parse_window_margin,
        global = true,
        help = "Seconds before an occurrence starts that its window opens"
    )]
    pub lead_time_sec: u64,

    #[arg(
        long = "trail-time-sec",
        env = "TRAIL_TIME_SEC",
        default_value_t = 300,
        value_parser = parse_window_margin,
        global = true,
        help = "Seconds after an occurrence ends that its window closes"
    )]
    pub trail_time_sec: u64,

    #[arg(
        long = "event-type",
        env = "ZOOMREC_EVENT_TYPE",
        default_value = "zoom",
        value_parser = parse_event_type,
        global = true,
        help = "Event type this process works on"
    )]
    pub event_type: EventType,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the polling worker until interrupted.
    Worker(WorkerArgs),
    /// Validate an event draft (JSON) and print the normalized record.
    Validate {
        #[arg(help = "Path to the event draft JSON file")]
        file: PathBuf,
    },
    /// Print the upcoming occurrences of an event draft and their windows.
    Occurrences {
        #[arg(help = "Path to the event draft JSON file")]
        file: PathBuf,
        #[arg(long, default_value_t = 5, value_parser = parse_positive_usize)]
        limit: usize,
    },
    /// Submit an event draft (JSON) to the configured store.
    Add {
        #[arg(help = "Path to the event draft JSON file")]
        file: PathBuf,
    },
    /// Show the event a worker would pick from the store right now.
    Next,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(
        long = "client-id",
        env = "CLIENT_ID",
        help = "Worker identity written into claimed events"
    )]
    pub client_id: String,

    #[arg(
        long = "poll-interval-sec",
        env = "POLL_INTERVAL_SEC",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Seconds between store polls"
    )]
    pub poll_interval_sec: u64,

    #[arg(
        long = "join-command",
        env = "ZOOMREC_JOIN_COMMAND",
        help = "Command that joins and records a meeting; supports {key} {title} {id} {url} {password} {duration}"
    )]
    pub join_command: Option<String>,

    #[arg(
        long = "postprocess-command",
        env = "ZOOMREC_POSTPROCESS_COMMAND",
        help = "Command run for the postprocess instruction; additionally supports {action}"
    )]
    pub postprocess_command: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use std::path::PathBuf;
    use zoomrec_types::EventType;

    #[test]
    fn unit_worker_flags_parse_with_defaults() {
        let cli = Cli::try_parse_from(["zoomrec", "worker", "--client-id", "rec-7"])
            .expect("parse worker");
        let Command::Worker(args) = cli.command else {
            panic!("expected worker command");
        };
        assert_eq!(args.client_id, "rec-7");
        assert_eq!(args.poll_interval_sec, 60);
        assert_eq!(cli.window.lead_time_sec, 60);
        assert_eq!(cli.window.trail_time_sec, 300);
        assert_eq!(cli.window.event_type, EventType::Zoom);
        assert_eq!(cli.store.db_path, PathBuf::from(".zoomrec/events.sqlite3"));
    }

    #[test]
    fn unit_global_flags_are_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "zoomrec",
            "occurrences",
            "event.json",
            "--limit",
            "3",
            "--lead-time-sec",
            "120",
            "--event-type",
            "system",
        ])
        .expect("parse occurrences");
        assert!(matches!(cli.command, Command::Occurrences { limit: 3, .. }));
        assert_eq!(cli.window.lead_time_sec, 120);
        assert_eq!(cli.window.event_type, EventType::System);
    }

    #[test]
    fn regression_zero_poll_interval_and_limit_are_rejected() {
        assert!(Cli::try_parse_from([
            "zoomrec",
            "worker",
            "--client-id",
            "rec-7",
            "--poll-interval-sec",
            "0"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["zoomrec", "occurrences", "e.json", "--limit", "0"]).is_err());
    }

    #[test]
    fn regression_window_margins_beyond_a_week_are_rejected() {
        assert!(Cli::try_parse_from([
            "zoomrec",
            "next",
            "--trail-time-sec",
            "18446744073709551615"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["zoomrec", "next", "--lead-time-sec", "604800"]).is_ok());
    }
}
