use anyhow::Result;
use std::time::Duration;
use zoomrec_schedule::LeadOffsets;
use zoomrec_types::EventType;

/// Runtime configuration for an event worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity written into `assigned` when this worker claims an event.
    pub worker_id: String,
    /// Only events of this type are mirrored and claimed.
    pub event_type: EventType,
    pub lead_in: Duration,
    pub lead_out: Duration,
    pub poll_interval: Duration,
    pub transient_error_backoff_initial: Duration,
    pub transient_error_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "zoomrec-worker-1".to_string(),
            event_type: EventType::Zoom,
            lead_in: Duration::from_secs(60),
            lead_out: Duration::from_secs(300),
            poll_interval: Duration::from_secs(60),
            transient_error_backoff_initial: Duration::from_secs(1),
            transient_error_backoff_max: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Validates identity, window margins, polling and retry-backoff configuration.
    pub fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }
        if self.transient_error_backoff_initial.is_zero() {
            anyhow::bail!("transient_error_backoff_initial must be greater than 0");
        }
        if self.transient_error_backoff_max.is_zero() {
            anyhow::bail!("transient_error_backoff_max must be greater than 0");
        }
        let max_offset = Duration::from_secs(LeadOffsets::MAX_SECS.unsigned_abs());
        if self.lead_in > max_offset || self.lead_out > max_offset {
            anyhow::bail!(
                "lead_in and lead_out must not exceed {} seconds",
                LeadOffsets::MAX_SECS
            );
        }
        if self.transient_error_backoff_max < self.transient_error_backoff_initial {
            anyhow::bail!("transient_error_backoff_max must be >= transient_error_backoff_initial");
        }
        Ok(())
    }

    pub fn offsets(&self) -> LeadOffsets {
        LeadOffsets::new(duration_secs(self.lead_in), duration_secs(self.lead_out))
    }
}

fn duration_secs(value: Duration) -> i64 {
    i64::try_from(value.as_secs()).unwrap_or(i64::MAX)
}

pub(crate) fn compute_poll_retry_delay(
    failure_count: u32,
    initial: Duration,
    max: Duration,
) -> Duration {
    let mut delay = initial;
    for _ in 1..failure_count {
        delay = delay.saturating_mul(2);
        if delay >= max {
            return max;
        }
    }
    std::cmp::min(delay, max)
}
