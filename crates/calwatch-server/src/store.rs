//! Persisted watcher state.
//!
//! The registry is saved as a [`RegistrySnapshot`] JSON document after each
//! change and read back on startup. Loading goes through typed records and
//! a validating conversion into watchers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use calwatch_core::Offset;

use crate::error::{ServerError, ServerResult};
use crate::registry::WatcherRegistry;
use crate::watcher::{CalendarWatcher, ChannelLease, EventWatcher};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Saved state of every watched calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Watched calendars.
    pub calendars: Vec<CalendarRecord>,
}

/// Saved state of one calendar watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarRecord {
    pub calendar_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// Saved state of one event watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_id: String,
    pub start: DateTime<Utc>,
    /// `null` entries are absent offsets.
    pub offsets: Vec<Offset>,
}

impl RegistrySnapshot {
    /// Captures the current registry.
    pub async fn capture(registry: &WatcherRegistry) -> Self {
        let mut calendars = Vec::new();
        for watcher in registry.watchers() {
            calendars.push(CalendarRecord::capture(&watcher).await);
        }
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            calendars,
        }
    }
}

impl CalendarRecord {
    /// Captures one watcher.
    pub async fn capture(watcher: &CalendarWatcher) -> Self {
        let lease = watcher.lease();
        let events = watcher
            .event_watchers()
            .await
            .into_iter()
            .map(|event| EventRecord {
                event_id: event.event_id,
                start: event.start,
                offsets: event.offsets.into_iter().collect(),
            })
            .collect();
        Self {
            calendar_id: lease.calendar_id,
            channel_id: lease.channel_id,
            resource_id: lease.resource_id,
            ttl_seconds: lease.ttl_seconds,
            created_at: lease.created_at,
            granted_expiry: lease.granted_expiry,
            events,
        }
    }
}

impl TryFrom<CalendarRecord> for CalendarWatcher {
    type Error = ServerError;

    fn try_from(record: CalendarRecord) -> ServerResult<Self> {
        if record.calendar_id.is_empty() {
            return Err(ServerError::state("calendar record without calendarId"));
        }
        if record.channel_id.is_empty() {
            return Err(ServerError::state(format!(
                "calendar {} has no channelId",
                record.calendar_id
            )));
        }
        if record.ttl_seconds == 0 {
            return Err(ServerError::state(format!(
                "calendar {} has a zero ttlSeconds",
                record.calendar_id
            )));
        }

        let mut seen = BTreeSet::new();
        let mut events = Vec::with_capacity(record.events.len());
        for event in record.events {
            if event.event_id.is_empty() {
                return Err(ServerError::state(format!(
                    "event without eventId in calendar {}",
                    record.calendar_id
                )));
            }
            if !seen.insert(event.event_id.clone()) {
                return Err(ServerError::state(format!(
                    "event {} listed twice in calendar {}",
                    event.event_id, record.calendar_id
                )));
            }
            let mut watcher = EventWatcher::new(record.calendar_id.clone(), event.event_id, event.start);
            watcher.offsets.extend(event.offsets);
            events.push(watcher);
        }

        let lease = ChannelLease {
            calendar_id: record.calendar_id,
            channel_id: record.channel_id,
            resource_id: record.resource_id,
            ttl_seconds: record.ttl_seconds,
            created_at: record.created_at,
            granted_expiry: record.granted_expiry,
        };
        Ok(CalendarWatcher::from_parts(lease, events))
    }
}

/// JSON file holding the latest [`RegistrySnapshot`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    // held from capture to rename
    write_lock: Mutex<()>,
}

impl StateStore {
    /// Creates a store at `path`. Nothing is read or written yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the snapshot; `None` when no state was saved yet.
    pub async fn load(&self) -> ServerResult<Option<RegistrySnapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No saved state");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: RegistrySnapshot = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ServerError::state(format!(
                "unsupported state version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }
        info!(
            path = %self.path.display(),
            calendars = snapshot.calendars.len(),
            "Loaded saved state"
        );
        Ok(Some(snapshot))
    }

    /// Writes the snapshot through a temporary file and a rename.
    pub async fn save(&self, snapshot: &RegistrySnapshot) -> ServerResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(snapshot).await
    }

    /// Captures `registry` and writes it. Capture and write happen under
    /// one lock, so a later call always leaves the newer state on disk.
    pub async fn save_registry(&self, registry: &WatcherRegistry) -> ServerResult<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = RegistrySnapshot::capture(registry).await;
        self.write(&snapshot).await
    }

    async fn write(&self, snapshot: &RegistrySnapshot) -> ServerResult<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            calendars = snapshot.calendars.len(),
            "State saved"
        );
        Ok(())
    }
}
