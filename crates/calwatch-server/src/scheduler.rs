//! Delayed invocation of reminder and renewal actions.
//!
//! Actions are typed values rather than closures: a fired reminder carries
//! the start time it was armed for, a renewal carries the channel it was
//! meant to renew. Both are re-validated when they run, and there is no
//! cancel operation: a timer that has become stale (the event moved, the
//! channel was already replaced) does nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use calwatch_core::Offset;

/// A pending reminder: fire `offset` seconds before an event that was
/// expected to start at `expected_start` when the timer was armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTimer {
    /// Calendar of the event.
    pub calendar_id: String,
    /// The event.
    pub event_id: String,
    /// Requested offset.
    pub offset: Offset,
    /// Start time the timer was computed from.
    pub expected_start: DateTime<Utc>,
}

/// A pending channel renewal for the given lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalTimer {
    /// Calendar whose channel is renewed.
    pub calendar_id: String,
    /// Channel the renewal was scheduled for.
    pub channel_id: String,
}

/// An action executed when its timer is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledAction {
    /// Verify the event start and emit a reminder.
    FireReminder(ReminderTimer),
    /// Open a fresh push channel before the current one expires.
    RenewChannel(RenewalTimer),
}

impl ScheduledAction {
    /// Calendar the action belongs to.
    pub fn calendar_id(&self) -> &str {
        match self {
            Self::FireReminder(timer) => &timer.calendar_id,
            Self::RenewChannel(timer) => &timer.calendar_id,
        }
    }
}

/// Fire-and-forget delayed invocation.
///
/// Timers cannot be cancelled; see the module docs.
pub trait Scheduler: Send + Sync {
    /// Runs `action` at `at`. Times in the past run as soon as possible.
    fn schedule_at(&self, at: DateTime<Utc>, action: ScheduledAction);

    /// Runs `action` after `delay`.
    fn schedule_in(&self, delay: Duration, action: ScheduledAction) {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let at = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.schedule_at(at, action);
    }

    /// Number of timers not yet due.
    fn pending(&self) -> usize;
}

/// Scheduler backed by tokio timers.
///
/// Each action sleeps in its own task and is then handed to the receiver
/// returned by [`TimerScheduler::new`], which the reminder service drains.
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct TimerScheduler {
    tx: mpsc::UnboundedSender<ScheduledAction>,
    pending: Arc<AtomicUsize>,
}

impl TimerScheduler {
    /// Creates a scheduler and the receiving end of due actions.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };
        (scheduler, rx)
    }
}

impl Scheduler for TimerScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, action: ScheduledAction) {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let tx = self.tx.clone();
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        trace!(at = %at, delay_secs = delay.as_secs(), ?action, "Timer armed");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.fetch_sub(1, Ordering::SeqCst);
            if tx.send(action).is_err() {
                debug!("Dispatcher stopped, dropping due action");
            }
        });
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// A recorded timer of a [`ManualScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
    /// When the action is due.
    pub at: DateTime<Utc>,
    /// The action.
    pub action: ScheduledAction,
}

/// Scheduler that only records timers; the caller decides when they fire.
///
/// Used by tests to step through time deterministically.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    timers: Mutex<Vec<ScheduledTimer>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn timers(&self) -> MutexGuard<'_, Vec<ScheduledTimer>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All outstanding timers, earliest first.
    pub fn scheduled(&self) -> Vec<ScheduledTimer> {
        let mut timers = self.timers().clone();
        timers.sort_by_key(|t| t.at);
        timers
    }

    /// Due times of outstanding reminder timers for one event, earliest first.
    pub fn reminder_times(&self, calendar_id: &str, event_id: &str) -> Vec<DateTime<Utc>> {
        self.scheduled()
            .into_iter()
            .filter(|t| match &t.action {
                ScheduledAction::FireReminder(r) => {
                    r.calendar_id == calendar_id && r.event_id == event_id
                }
                ScheduledAction::RenewChannel(_) => false,
            })
            .map(|t| t.at)
            .collect()
    }

    /// Removes and returns every action due at or before `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledAction> {
        let mut timers = self.timers();
        let (mut due, rest): (Vec<_>, Vec<_>) = timers.drain(..).partition(|t| t.at <= now);
        *timers = rest;
        due.sort_by_key(|t| t.at);
        due.into_iter().map(|t| t.action).collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, action: ScheduledAction) {
        self.timers().push(ScheduledTimer { at, action });
    }

    fn pending(&self) -> usize {
        self.timers().len()
    }
}
