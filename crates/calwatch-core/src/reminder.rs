//! The payload delivered to subscribers when a reminder fires.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::offset::{Offset, trigger_time};

/// A reminder that an event is about to start.
///
/// Serializes with the subscriber-facing field names; `offset` is `null`
/// when the subscription omitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    /// Calendar the event belongs to.
    pub calendar_id: String,
    /// Event the reminder is about.
    pub event_id: String,
    /// Requested number of seconds before start.
    pub offset: Offset,
    /// Start time verified against the provider when the reminder fired.
    pub start: DateTime<Utc>,
}

impl Reminder {
    /// Creates a new reminder.
    pub fn new(
        calendar_id: impl Into<String>,
        event_id: impl Into<String>,
        offset: Offset,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            event_id: event_id.into(),
            offset,
            start,
        }
    }

    /// When this reminder was due.
    pub fn due_at(&self) -> DateTime<Utc> {
        trigger_time(self.start, self.offset)
    }

    /// Human readable summary, used for desktop notifications and logs.
    pub fn summary(&self) -> String {
        match self.offset.as_secs() {
            0 => format!("Event {} is starting now", self.event_id),
            secs if secs % 60 == 0 && secs >= 60 => {
                let minutes = secs / 60;
                if minutes == 1 {
                    format!("Event {} starts in 1 minute", self.event_id)
                } else {
                    format!("Event {} starts in {} minutes", self.event_id, minutes)
                }
            }
            secs => format!("Event {} starts in {} seconds", self.event_id, secs),
        }
    }
}
