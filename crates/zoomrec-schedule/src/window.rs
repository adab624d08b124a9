use crate::OccurrenceSchedule;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

/// Margins added around every occurrence, each within `0..=MAX_SECS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadOffsets {
    lead_in_secs: i64,
    lead_out_secs: i64,
}

impl LeadOffsets {
    /// One week.
    pub const MAX_SECS: i64 = 7 * 24 * 60 * 60;

    /// Out-of-range margins are clamped.
    pub fn new(lead_in_secs: i64, lead_out_secs: i64) -> Self {
        Self {
            lead_in_secs: lead_in_secs.clamp(0, Self::MAX_SECS),
            lead_out_secs: lead_out_secs.clamp(0, Self::MAX_SECS),
        }
    }

    /// Seconds before the start at which the window opens.
    pub fn lead_in_secs(self) -> i64 {
        self.lead_in_secs
    }

    /// Seconds after the scheduled end at which the window closes.
    pub fn lead_out_secs(self) -> i64 {
        self.lead_out_secs
    }
}

impl Default for LeadOffsets {
    fn default() -> Self {
        Self::new(60, 300)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Pending,
    Active,
    Expired,
}

/// Actionable interval `[start - lead_in, start + duration + lead_out]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub occurrence: DateTime<Tz>,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl Window {
    pub fn new(occurrence: DateTime<Tz>, duration_minutes: u32, offsets: LeadOffsets) -> Self {
        let start = occurrence - Duration::seconds(offsets.lead_in_secs);
        let end = occurrence
            + Duration::minutes(i64::from(duration_minutes))
            + Duration::seconds(offsets.lead_out_secs);
        Self {
            occurrence,
            start,
            end,
        }
    }

    /// Both bounds are inclusive.
    pub fn classify(&self, now: DateTime<Utc>) -> WindowState {
        if now < self.start {
            WindowState::Pending
        } else if now <= self.end {
            WindowState::Active
        } else {
            WindowState::Expired
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.classify(now) == WindowState::Active
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.classify(now) == WindowState::Expired
    }

    /// Time left until the window closes, zero once it has.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let left = self.end.with_timezone(&Utc) - now;
        left.max(Duration::zero())
    }
}

impl OccurrenceSchedule {
    pub fn windows(
        &self,
        duration_minutes: u32,
        offsets: LeadOffsets,
    ) -> impl Iterator<Item = Window> + '_ {
        self.iter()
            .map(move |start| Window::new(start, duration_minutes, offsets))
    }

    /// Earliest window that has not yet expired at `now`.
    ///
    /// Windows share one length, so the first non-expired one in start order
    /// also has the earliest end.
    pub fn current_window(
        &self,
        duration_minutes: u32,
        offsets: LeadOffsets,
        now: DateTime<Utc>,
    ) -> Option<Window> {
        self.windows(duration_minutes, offsets)
            .find(|window| !window.is_expired(now))
    }

    /// True when every window has expired. Unbounded rules never are past.
    pub fn is_past(&self, duration_minutes: u32, offsets: LeadOffsets, now: DateTime<Utc>) -> bool {
        if !self.is_bounded() {
            return false;
        }
        self.current_window(duration_minutes, offsets, now).is_none()
    }
}
