//! Typed view of the `instruction` mini-language (`process=record,postprocess=transcribe`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstructionKey {
    Process,
    Postprocess,
}

impl InstructionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Postprocess => "postprocess",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "process" => Some(Self::Process),
            "postprocess" => Some(Self::Postprocess),
            _ => None,
        }
    }
}

/// Processing instructions attached to an event.
///
/// Unknown keys, bare tokens without `=` and keys with an empty value all read
/// as absent, so parsing never fails.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Instruction {
    entries: BTreeMap<InstructionKey, String>,
}

impl Instruction {
    pub const DELIMITER: char = ',';

    /// Default for newly created events: record the meeting.
    pub fn recording() -> Self {
        Self::default().with(InstructionKey::Process, "record")
    }

    pub fn parse(raw: &str) -> Self {
        let mut entries = BTreeMap::new();
        for entry in raw.split(Self::DELIMITER) {
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if let Some(key) = InstructionKey::parse(key) {
                if !value.is_empty() {
                    entries.insert(key, value.to_string());
                }
            }
        }
        Self { entries }
    }

    pub fn with(mut self, key: InstructionKey, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value.trim().to_string());
        }
        self
    }

    pub fn get(&self, key: InstructionKey) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    /// Primary action, e.g. `record`.
    pub fn process(&self) -> Option<&str> {
        self.get(InstructionKey::Process)
    }

    /// Follow-up action run after the primary one, e.g. `transcribe`.
    pub fn postprocess(&self) -> Option<&str> {
        self.get(InstructionKey::Postprocess)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, "{}", Self::DELIMITER)?;
            }
            write!(f, "{}={value}", key.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Instruction {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(value))
    }
}

impl From<String> for Instruction {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Instruction> for String {
    fn from(value: Instruction) -> Self {
        value.to_string()
    }
}
