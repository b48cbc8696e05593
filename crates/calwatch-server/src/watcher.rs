//! Calendar and event watchers.
//!
//! A [`CalendarWatcher`] holds the push-channel lease for one calendar and
//! the [`EventWatcher`]s of every subscribed event in it. Pushes only say
//! "something in this calendar changed", so reconciliation re-reads the start
//! time of each watched event and re-arms the reminders of those that moved.
//!
//! Timers are never cancelled. A moved event leaves its old timers behind;
//! they fire, see that the live start differs from the one they were armed
//! for, and emit nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use calwatch_core::{Offset, Reminder, trigger_time};
use calwatch_providers::{CalendarApi, ProviderResult, WatchRequest};

use crate::config::ChannelSettings;
use crate::notify::ReminderSink;
use crate::scheduler::{ReminderTimer, RenewalTimer, ScheduledAction, Scheduler};

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// An active push-channel grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLease {
    /// Watched calendar.
    pub calendar_id: String,
    /// Channel id generated when the channel was opened.
    pub channel_id: String,
    /// Provider resource id, when the provider reported one.
    pub resource_id: Option<String>,
    /// Requested lifetime in seconds.
    pub ttl_seconds: u64,
    /// When the watch request was sent.
    pub created_at: DateTime<Utc>,
    /// Expiry reported by the provider, which may be shorter than requested.
    pub granted_expiry: Option<DateTime<Utc>>,
}

impl ChannelLease {
    /// When the provider stops delivering on this channel: the earlier of
    /// the granted expiry and `created_at + ttl_seconds`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let requested = self
            .created_at
            .checked_add_signed(seconds(self.ttl_seconds))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        match self.granted_expiry {
            Some(granted) => granted.min(requested),
            None => requested,
        }
    }

    /// When the channel should be replaced, `margin_seconds` before expiry.
    pub fn renew_at(&self, margin_seconds: u64) -> DateTime<Utc> {
        self.expires_at()
            .checked_sub_signed(seconds(margin_seconds))
            .unwrap_or(self.created_at)
            .max(self.created_at)
    }
}

/// Reminder offsets and last known start of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWatcher {
    /// Calendar of the event.
    pub calendar_id: String,
    /// The event.
    pub event_id: String,
    /// Start time as last fetched from the provider.
    pub start: DateTime<Utc>,
    /// Requested offsets; each one is an independent reminder.
    pub offsets: BTreeSet<Offset>,
}

impl EventWatcher {
    /// Creates a watcher with no offsets.
    pub fn new(
        calendar_id: impl Into<String>,
        event_id: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            event_id: event_id.into(),
            start,
            offsets: BTreeSet::new(),
        }
    }

    fn timer(&self, offset: Offset) -> ScheduledAction {
        ScheduledAction::FireReminder(ReminderTimer {
            calendar_id: self.calendar_id.clone(),
            event_id: self.event_id.clone(),
            offset,
            expected_start: self.start,
        })
    }

    /// Records `offset` and schedules its reminder against the current start.
    ///
    /// A timer is scheduled on every call, even for an offset that is
    /// already recorded. Returns the trigger time.
    pub fn arm(&mut self, offset: Offset, scheduler: &dyn Scheduler) -> DateTime<Utc> {
        let at = trigger_time(self.start, offset);
        self.offsets.insert(offset);
        scheduler.schedule_at(at, self.timer(offset));
        debug!(
            calendar_id = %self.calendar_id,
            event_id = %self.event_id,
            %offset,
            trigger_at = %at,
            "Reminder armed"
        );
        at
    }

    /// Applies a freshly fetched start time.
    ///
    /// When it differs from the stored one, the start is updated and every
    /// recorded offset is armed again. Returns true if the event moved.
    pub fn observe_start(&mut self, live_start: DateTime<Utc>, scheduler: &dyn Scheduler) -> bool {
        if live_start == self.start {
            return false;
        }
        info!(
            calendar_id = %self.calendar_id,
            event_id = %self.event_id,
            from = %self.start,
            to = %live_start,
            "Event moved, re-arming reminders"
        );
        self.start = live_start;
        let offsets: Vec<Offset> = self.offsets.iter().copied().collect();
        for offset in offsets {
            self.arm(offset, scheduler);
        }
        true
    }

    /// Refetches the start time and re-arms on drift.
    pub async fn check_drift(
        &mut self,
        api: &dyn CalendarApi,
        scheduler: &dyn Scheduler,
    ) -> ProviderResult<bool> {
        let live = api.event_start(&self.calendar_id, &self.event_id).await?;
        Ok(self.observe_start(live, scheduler))
    }

    /// Schedules every offset whose trigger time is not before `now`.
    ///
    /// Used after a restart, when the timers of the previous process are
    /// gone. Returns the number of timers scheduled.
    pub fn rearm_pending(&self, now: DateTime<Utc>, scheduler: &dyn Scheduler) -> usize {
        let mut armed = 0;
        for &offset in &self.offsets {
            let at = trigger_time(self.start, offset);
            if at >= now {
                scheduler.schedule_at(at, self.timer(offset));
                armed += 1;
            }
        }
        armed
    }
}

/// Result of a fired reminder timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// The event still starts when expected; the reminder was published.
    Emitted(Reminder),
    /// The event moved since the timer was armed.
    Suppressed {
        /// Start reported by the provider at fire time.
        current_start: DateTime<Utc>,
    },
}

/// Body of a fired reminder timer: verify the live start, then publish.
pub async fn fire_reminder(
    timer: &ReminderTimer,
    api: &dyn CalendarApi,
    sink: &dyn ReminderSink,
) -> ProviderResult<FireOutcome> {
    let live = api.event_start(&timer.calendar_id, &timer.event_id).await?;
    if live != timer.expected_start {
        debug!(
            calendar_id = %timer.calendar_id,
            event_id = %timer.event_id,
            offset = %timer.offset,
            expected = %timer.expected_start,
            live = %live,
            "Stale reminder suppressed"
        );
        return Ok(FireOutcome::Suppressed {
            current_start: live,
        });
    }

    let reminder = Reminder::new(
        timer.calendar_id.clone(),
        timer.event_id.clone(),
        timer.offset,
        live,
    );
    info!(
        calendar_id = %reminder.calendar_id,
        event_id = %reminder.event_id,
        offset = %reminder.offset,
        "Reminder emitted"
    );
    sink.publish(&reminder).await;
    Ok(FireOutcome::Emitted(reminder))
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Events whose start was refetched.
    pub checked: usize,
    /// Events that had moved and were re-armed.
    pub moved: usize,
    /// Events whose fetch failed.
    pub failed: usize,
}

/// Push-channel lease and event watchers of one calendar.
#[derive(Debug)]
pub struct CalendarWatcher {
    calendar_id: String,
    lease: RwLock<ChannelLease>,
    // tokio mutex: held across provider calls during reconcile
    events: Mutex<HashMap<String, EventWatcher>>,
}

impl CalendarWatcher {
    /// Creates a watcher owning `lease` with no events.
    pub fn new(lease: ChannelLease) -> Self {
        Self::from_parts(lease, Vec::new())
    }

    /// Rebuilds a watcher from a lease and previously watched events.
    pub fn from_parts(lease: ChannelLease, events: Vec<EventWatcher>) -> Self {
        let events = events
            .into_iter()
            .map(|event| (event.event_id.clone(), event))
            .collect();
        Self {
            calendar_id: lease.calendar_id.clone(),
            lease: RwLock::new(lease),
            events: Mutex::new(events),
        }
    }

    fn read_lease(&self) -> RwLockReadGuard<'_, ChannelLease> {
        self.lease.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lease(&self) -> RwLockWriteGuard<'_, ChannelLease> {
        self.lease.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The watched calendar.
    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    /// Id of the current channel.
    pub fn channel_id(&self) -> String {
        self.read_lease().channel_id.clone()
    }

    /// Copy of the current lease.
    pub fn lease(&self) -> ChannelLease {
        self.read_lease().clone()
    }

    /// Installs a renewed lease and returns the one it supersedes.
    pub fn replace_lease(&self, lease: ChannelLease) -> ChannelLease {
        std::mem::replace(&mut *self.write_lease(), lease)
    }

    /// Arms `offset` for `event_id`, creating the event watcher on first use.
    ///
    /// `start` is the freshly fetched start time; if an existing watcher
    /// holds a different one, its offsets are re-armed first.
    pub async fn arm(
        &self,
        event_id: &str,
        start: DateTime<Utc>,
        offset: Offset,
        scheduler: &dyn Scheduler,
    ) -> DateTime<Utc> {
        let mut events = self.events.lock().await;
        let watcher = events
            .entry(event_id.to_string())
            .or_insert_with(|| EventWatcher::new(self.calendar_id.clone(), event_id, start));
        watcher.observe_start(start, scheduler);
        watcher.arm(offset, scheduler)
    }

    /// Checks every event for drift. A failing event is logged and skipped.
    pub async fn reconcile(
        &self,
        api: &dyn CalendarApi,
        scheduler: &dyn Scheduler,
    ) -> ReconcileReport {
        let mut events = self.events.lock().await;
        let mut report = ReconcileReport::default();

        for watcher in events.values_mut() {
            report.checked += 1;
            match watcher.check_drift(api, scheduler).await {
                Ok(true) => report.moved += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        calendar_id = %self.calendar_id,
                        event_id = %watcher.event_id,
                        error = %e,
                        "Drift check failed"
                    );
                }
            }
        }

        debug!(
            calendar_id = %self.calendar_id,
            checked = report.checked,
            moved = report.moved,
            failed = report.failed,
            "Reconciled"
        );
        report
    }

    /// Copies of the event watchers, ordered by event id.
    pub async fn event_watchers(&self) -> Vec<EventWatcher> {
        let events = self.events.lock().await;
        let mut watchers: Vec<EventWatcher> = events.values().cloned().collect();
        watchers.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        watchers
    }

    /// Copy of one event watcher.
    pub async fn event(&self, event_id: &str) -> Option<EventWatcher> {
        self.events.lock().await.get(event_id).cloned()
    }

    /// Number of watched events.
    pub async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Schedules the still-pending reminders of every event.
    pub async fn rearm_pending(&self, now: DateTime<Utc>, scheduler: &dyn Scheduler) -> usize {
        let events = self.events.lock().await;
        events
            .values()
            .map(|watcher| watcher.rearm_pending(now, scheduler))
            .sum()
    }
}

/// Opens a push channel on `calendar_id` and schedules its renewal.
///
/// Fails when the provider rejects the watch request; nothing is retried.
pub async fn acquire_channel(
    calendar_id: &str,
    api: &dyn CalendarApi,
    scheduler: &dyn Scheduler,
    settings: &ChannelSettings,
) -> ProviderResult<ChannelLease> {
    let channel_id = format!("{}-calwatch", Uuid::new_v4().simple());
    let request = WatchRequest::webhook(
        channel_id.as_str(),
        settings.token.as_str(),
        settings.callback_url.as_str(),
        settings.ttl_seconds,
    );
    let created_at = Utc::now();

    let grant = api.watch_calendar(calendar_id, &request).await?;

    let lease = ChannelLease {
        calendar_id: calendar_id.to_string(),
        channel_id,
        resource_id: grant.resource_id,
        ttl_seconds: settings.ttl_seconds,
        created_at,
        granted_expiry: grant.expiration,
    };
    let renew_at = lease.renew_at(settings.renewal_margin_seconds);
    scheduler.schedule_at(
        renew_at,
        ScheduledAction::RenewChannel(RenewalTimer {
            calendar_id: lease.calendar_id.clone(),
            channel_id: lease.channel_id.clone(),
        }),
    );

    info!(
        calendar_id = %lease.calendar_id,
        channel_id = %lease.channel_id,
        ttl_secs = lease.ttl_seconds,
        expires_at = %lease.expires_at(),
        renew_at = %renew_at,
        "Push channel opened"
    );
    Ok(lease)
}
