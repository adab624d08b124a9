use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;
use zoomrec_types::{Event, ScheduleError, DTSTART_FORMAT};

/// Parses an IANA timezone name.
pub fn parse_timezone(value: &str) -> Result<Tz, ScheduleError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::MissingField("timezone"));
    }
    trimmed
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone {
            value: value.to_string(),
        })
}

/// Interprets a naive `DD/MM/YYYY HH:MM` start in `timezone`.
///
/// Ambiguous wall-clock times (DST fall-back) resolve to the earlier instant.
/// Times inside a DST gap do not exist and are rejected.
pub fn parse_dtstart(value: &str, timezone: Tz) -> Result<DateTime<Tz>, ScheduleError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScheduleError::MissingField("dtstart"));
    }
    let naive = NaiveDateTime::parse_from_str(trimmed, DTSTART_FORMAT).map_err(|_| {
        ScheduleError::InvalidDateTime {
            value: value.to_string(),
        }
    })?;
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ScheduleError::NonexistentLocalTime {
            value: value.to_string(),
            timezone: timezone.name().to_string(),
        })
}

#[derive(Debug, Clone)]
struct Recurrence {
    set: RRuleSet,
    bounded: bool,
}

/// Resolved occurrence sequence of one event.
#[derive(Debug, Clone)]
pub struct OccurrenceSchedule {
    timezone: Tz,
    anchor: DateTime<Tz>,
    recurrence: Option<Recurrence>,
}

impl OccurrenceSchedule {
    pub fn resolve(event: &Event) -> Result<Self, ScheduleError> {
        Self::from_parts(&event.dtstart, &event.timezone, event.recurrence())
    }

    pub fn from_parts(
        dtstart: &str,
        timezone: &str,
        rrule: Option<&str>,
    ) -> Result<Self, ScheduleError> {
        let timezone = parse_timezone(timezone)?;
        let anchor = parse_dtstart(dtstart, timezone)?;
        let recurrence = match rrule.map(str::trim).filter(|rule| !rule.is_empty()) {
            Some(rule) => Some(build_recurrence(rule, anchor)?),
            None => None,
        };
        Ok(Self {
            timezone,
            anchor,
            recurrence,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First occurrence, taken from `dtstart`.
    pub fn anchor(&self) -> DateTime<Tz> {
        self.anchor
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// True when the sequence is finite: one-off events and rules carrying
    /// `COUNT` or `UNTIL`.
    pub fn is_bounded(&self) -> bool {
        self.recurrence
            .as_ref()
            .map_or(true, |recurrence| recurrence.bounded)
    }

    /// Lazily yields occurrence starts in ascending order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = DateTime<Tz>> + '_> {
        match &self.recurrence {
            None => Box::new(std::iter::once(self.anchor)),
            Some(recurrence) => {
                let timezone = self.timezone;
                Box::new(
                    (&recurrence.set)
                        .into_iter()
                        .map(move |start| start.with_timezone(&timezone)),
                )
            }
        }
    }

    /// True when some occurrence starts strictly after `instant`.
    pub fn has_occurrence_after(&self, instant: DateTime<Utc>) -> bool {
        if !self.is_bounded() {
            return true;
        }
        self.iter().any(|start| start > instant)
    }
}

fn build_recurrence(rule: &str, anchor: DateTime<Tz>) -> Result<Recurrence, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidRecurrence {
        value: rule.to_string(),
        reason,
    };
    let mut lines = Vec::new();
    for line in rule.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if line.to_ascii_uppercase().starts_with("DTSTART") {
            return Err(invalid("DTSTART comes from the event start".to_string()));
        }
        // Bare rule bodies (`FREQ=DAILY;COUNT=3`) get the property name added.
        if line.contains(':') {
            lines.push(line.to_string());
        } else {
            lines.push(format!("RRULE:{line}"));
        }
    }
    let bounded = rule_lines_are_bounded(&lines);
    let source = format!(
        "DTSTART;TZID={}:{}\n{}",
        anchor.timezone().name(),
        anchor.format("%Y%m%dT%H%M%S"),
        lines.join("\n")
    );
    let set = source
        .parse::<RRuleSet>()
        .map_err(|error| invalid(error.to_string()))?;
    Ok(Recurrence { set, bounded })
}

fn rule_lines_are_bounded(lines: &[String]) -> bool {
    lines
        .iter()
        .filter(|line| line.to_ascii_uppercase().starts_with("RRULE:"))
        .all(|line| {
            line.to_ascii_uppercase()
                .split([':', ';'])
                .any(|part| part.starts_with("COUNT=") || part.starts_with("UNTIL="))
        })
}
