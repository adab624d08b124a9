//! The action executor boundary: joining and recording a meeting, then
//! optional post-processing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use zoomrec_types::Event;

/// What the executor reports back once its primary action returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Post-processing step to run next, e.g. `transcribe`.
    pub postprocess: Option<String>,
    /// The action was still running at the window end and was stopped.
    pub stopped_at_deadline: bool,
}

impl ActionOutcome {
    pub fn for_event(event: &Event) -> Self {
        Self {
            postprocess: event.instruction.postprocess().map(str::to_string),
            stopped_at_deadline: false,
        }
    }
}

/// Performs the work a claimed event asks for.
///
/// `perform` may block for the whole meeting but must return by `deadline`.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(&self, event: &Event, deadline: DateTime<Utc>) -> Result<ActionOutcome>;

    async fn postprocess(&self, event: &Event, action: &str) -> Result<()>;
}

/// Runs configured commands for each action.
///
/// Commands are split with shell quoting rules and executed without a shell.
/// Each argument may use the placeholders `{key}`, `{title}`, `{id}`, `{url}`,
/// `{password}` and `{duration}`; the postprocess command additionally gets
/// `{action}`. The same values are exported as `ZOOMREC_*` variables.
#[derive(Debug, Clone, Default)]
pub struct ShellActionExecutor {
    pub join_command: Option<String>,
    pub postprocess_command: Option<String>,
}

impl ShellActionExecutor {
    pub fn new(join_command: Option<String>, postprocess_command: Option<String>) -> Self {
        Self {
            join_command: join_command.filter(|value| !value.trim().is_empty()),
            postprocess_command: postprocess_command.filter(|value| !value.trim().is_empty()),
        }
    }
}

fn placeholders(event: &Event, action: Option<&str>) -> Vec<(&'static str, String)> {
    let mut values = vec![
        ("key", event.key.clone()),
        ("title", event.title.clone()),
        ("id", event.id.clone()),
        ("url", event.url.clone()),
        ("password", event.password.clone()),
        ("duration", event.duration.to_string()),
    ];
    if let Some(action) = action {
        values.push(("action", action.to_string()));
    }
    values
}

pub(crate) fn render_args(
    template: &str,
    values: &[(&'static str, String)],
) -> Result<Vec<String>> {
    let tokens = shell_words::split(template)
        .with_context(|| format!("invalid action command '{template}'"))?;
    Ok(tokens
        .iter()
        .map(|token| render_token(token, values))
        .collect())
}

/// Expands `{name}` placeholders in one left-to-right pass; substituted values
/// are never scanned again. Unknown names are kept verbatim.
fn render_token(token: &str, values: &[(&'static str, String)]) -> String {
    let mut rendered = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substitution = after.find('}').and_then(|close| {
            values
                .iter()
                .find(|(name, _)| *name == &after[..close])
                .map(|(_, value)| (value, close))
        });
        match substitution {
            Some((value, close)) => {
                rendered.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

fn build_command(template: &str, values: &[(&'static str, String)]) -> Result<Command> {
    let args = render_args(template, values)?;
    let Some((program, rest)) = args.split_first() else {
        anyhow::bail!("action command is empty");
    };
    let mut command = Command::new(program);
    command.kill_on_drop(true);
    command.args(rest);
    for (name, value) in values {
        command.env(format!("ZOOMREC_{}", name.to_ascii_uppercase()), value);
    }
    command.stdin(Stdio::null());
    Ok(command)
}

fn ensure_success(status: ExitStatus, what: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let code = status
        .code()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "signal".to_string());
    anyhow::bail!("{what} command failed with status {code}")
}

#[async_trait]
impl ActionExecutor for ShellActionExecutor {
    async fn perform(&self, event: &Event, deadline: DateTime<Utc>) -> Result<ActionOutcome> {
        let mut outcome = ActionOutcome::for_event(event);
        let Some(template) = self.join_command.as_deref() else {
            tracing::info!(event_key = %event.key, "no join command configured; skipping action");
            return Ok(outcome);
        };
        let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
        if remaining.is_zero() {
            tracing::warn!(event_key = %event.key, "window closed before the action started");
            outcome.stopped_at_deadline = true;
            return Ok(outcome);
        }

        let mut command = build_command(template, &placeholders(event, None))?;
        command.env(
            "ZOOMREC_DEADLINE",
            deadline.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn join command for event {}", event.key))?;
        tracing::info!(event_key = %event.key, pid = ?child.id(), "join command started");

        match tokio::time::timeout(remaining, child.wait()).await {
            Ok(status) => {
                let status = status.context("join command wait failed")?;
                ensure_success(status, "join")?;
            }
            Err(_) => {
                tracing::info!(event_key = %event.key, "window closed; stopping join command");
                child
                    .kill()
                    .await
                    .context("failed to stop join command at window end")?;
                outcome.stopped_at_deadline = true;
            }
        }
        Ok(outcome)
    }

    async fn postprocess(&self, event: &Event, action: &str) -> Result<()> {
        let Some(template) = self.postprocess_command.as_deref() else {
            tracing::info!(
                event_key = %event.key,
                action,
                "no postprocess command configured; skipping"
            );
            return Ok(());
        };
        let mut command = build_command(template, &placeholders(event, Some(action)))?;
        let status = command
            .status()
            .await
            .with_context(|| format!("failed to run postprocess command for event {}", event.key))?;
        ensure_success(status, "postprocess")
    }
}
