//! `(field, operator, value)` filter triples understood by every store backend.

use crate::{format_store_timestamp, Event, EventField, EventStatus, EventType, ScheduleError};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    /// SQL / query-string spelling of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = ScheduleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            _ => Err(ScheduleError::InvalidValue {
                field: "filter operator",
                value: value.to_string(),
            }),
        }
    }
}

/// Typed field value used on both sides of a filter comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Compares two values, coercing text to the other side's type when needed.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(left), Self::Text(right)) => Some(left.cmp(right)),
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(right)),
            (Self::Timestamp(left), Self::Timestamp(right)) => Some(left.cmp(right)),
            (Self::Integer(left), Self::Text(right)) => {
                right.trim().parse::<i64>().ok().map(|right| left.cmp(&right))
            }
            (Self::Text(left), Self::Integer(right)) => {
                left.trim().parse::<i64>().ok().map(|left| left.cmp(right))
            }
            (Self::Timestamp(left), Self::Text(right)) => DateTime::parse_from_rfc3339(right)
                .ok()
                .map(|right| left.cmp(&right.with_timezone(&Utc))),
            (Self::Text(left), Self::Timestamp(right)) => DateTime::parse_from_rfc3339(left)
                .ok()
                .map(|left| left.with_timezone(&Utc).cmp(right)),
            _ => None,
        }
    }

    /// Text form used in query strings and SQL parameters.
    pub fn to_query_value(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Timestamp(value) => format_store_timestamp(*value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<EventStatus> for FieldValue {
    fn from(value: EventStatus) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

impl From<EventType> for FieldValue {
    fn from(value: EventType) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// One AND-combined store filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: EventField,
    pub op: FilterOp,
    pub value: FieldValue,
}

impl Filter {
    pub fn new(field: EventField, op: FilterOp, value: impl Into<FieldValue>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn equal(field: EventField, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn not_equal(field: EventField, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Ne, value)
    }

    pub fn greater(field: EventField, value: impl Into<FieldValue>) -> Self {
        Self::new(field, FilterOp::Gt, value)
    }

    /// Parses the string triple used by the HTTP query encoding.
    pub fn parse(field: &str, op: &str, value: &str) -> Result<Self, ScheduleError> {
        let field = field.parse::<EventField>()?;
        let op = op.parse::<FilterOp>()?;
        let value = match field {
            EventField::Duration => value
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|_| ScheduleError::InvalidValue {
                    field: "filter value",
                    value: value.to_string(),
                })?,
            EventField::CreatedTimestamp | EventField::LastUpdatedTimestamp => {
                DateTime::parse_from_rfc3339(value.trim())
                    .map(|instant| FieldValue::Timestamp(instant.with_timezone(&Utc)))
                    .map_err(|_| ScheduleError::InvalidValue {
                        field: "filter value",
                        value: value.to_string(),
                    })?
            }
            EventField::Status => FieldValue::from(value.parse::<EventStatus>()?),
            EventField::Type => FieldValue::from(value.parse::<EventType>()?),
            _ => FieldValue::from(value),
        };
        Ok(Self { field, op, value })
    }

    /// Evaluates the filter against an in-memory record.
    pub fn matches(&self, event: &Event) -> bool {
        event
            .field_value(self.field)
            .compare(&self.value)
            .is_some_and(|ordering| self.op.accepts(ordering))
    }
}
