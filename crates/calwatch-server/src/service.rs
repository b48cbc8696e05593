//! The reminder service: subscription entry point and timer dispatch.
//!
//! [`ReminderService`] owns the registry and wires it to the provider, the
//! scheduler and the reminder sink. The HTTP layer and the webhook router
//! hold it behind an `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use calwatch_core::Offset;
use calwatch_providers::{CalendarApi, ProviderResult};

use crate::config::ChannelSettings;
use crate::error::{ServerError, ServerResult};
use crate::notify::ReminderSink;
use crate::registry::WatcherRegistry;
use crate::scheduler::{ReminderTimer, RenewalTimer, ScheduledAction, Scheduler};
use crate::store::{RegistrySnapshot, StateStore};
use crate::watcher::{
    CalendarWatcher, FireOutcome, ReconcileReport, acquire_channel, fire_reminder,
};

/// An accepted subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub calendar_id: String,
    pub event_id: String,
    pub offset: Offset,
    /// Event start as fetched while subscribing.
    pub start: DateTime<Utc>,
    /// When the reminder is due.
    pub trigger_at: DateTime<Utc>,
    /// Channel currently watching the calendar.
    pub channel_id: String,
}

/// Result of an unsubscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Removing reminders is not supported; timers cannot be cancelled.
    Unsupported {
        /// Whether the calendar is currently watched.
        watching: bool,
    },
}

/// Outcome of a renewal timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    /// A new channel replaced the old one.
    Renewed {
        old_channel_id: String,
        new_channel_id: String,
    },
    /// The timer belonged to a channel that is no longer current.
    Stale,
    /// The provider refused the new channel.
    Failed,
}

/// Health and watcher overview for `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub provider: String,
    pub provider_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_error: Option<String>,
    pub pending_timers: usize,
    pub calendars: Vec<CalendarStatus>,
}

/// One watched calendar in a [`StatusReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarStatus {
    pub calendar_id: String,
    pub channel_id: String,
    pub ttl_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub renew_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub events: usize,
}

/// Subscription entry point, timer dispatch and persistence.
pub struct ReminderService {
    api: Arc<dyn CalendarApi>,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn ReminderSink>,
    registry: WatcherRegistry,
    channel: ChannelSettings,
    store: Option<StateStore>,
}

impl std::fmt::Debug for ReminderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderService")
            .field("provider", &self.api.name())
            .field("calendars", &self.registry.len())
            .field("channel", &self.channel)
            .field("store", &self.store)
            .finish()
    }
}

impl ReminderService {
    /// Creates a service with an empty registry and no persistence.
    pub fn new(
        api: Arc<dyn CalendarApi>,
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn ReminderSink>,
        channel: ChannelSettings,
    ) -> Self {
        Self {
            api,
            scheduler,
            sink,
            registry: WatcherRegistry::new(),
            channel,
            store: None,
        }
    }

    /// Builder: persist the registry to `store` after every change.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The watcher registry.
    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// The calendar provider.
    pub fn api(&self) -> &dyn CalendarApi {
        self.api.as_ref()
    }

    /// Requests a reminder `offset` seconds before `event_id` starts.
    ///
    /// The offset is validated before any provider call. The first
    /// subscription for a calendar opens its push channel; a rejected
    /// channel fails the subscription.
    pub async fn subscribe(
        &self,
        calendar_id: &str,
        event_id: &str,
        offset: Option<i64>,
    ) -> ServerResult<Subscription> {
        let offset = Offset::from_request(offset)?;
        if calendar_id.is_empty() {
            return Err(ServerError::invalid_request("calendarId is required"));
        }
        if event_id.is_empty() {
            return Err(ServerError::invalid_request("eventId is required"));
        }

        let watcher = self
            .registry
            .get_or_create(calendar_id, || {
                acquire_channel(
                    calendar_id,
                    self.api.as_ref(),
                    self.scheduler.as_ref(),
                    &self.channel,
                )
            })
            .await?;

        let start = self.api.event_start(calendar_id, event_id).await?;
        let trigger_at = watcher
            .arm(event_id, start, offset, self.scheduler.as_ref())
            .await;
        self.persist().await;

        info!(calendar_id, event_id, %offset, %trigger_at, "Subscribed");
        Ok(Subscription {
            calendar_id: calendar_id.to_string(),
            event_id: event_id.to_string(),
            offset,
            start,
            trigger_at,
            channel_id: watcher.channel_id(),
        })
    }

    /// Removing a reminder is not supported: scheduled timers cannot be
    /// cancelled. The calendar is resolved and the gap reported.
    pub fn unsubscribe(
        &self,
        calendar_id: &str,
        event_id: &str,
        offset: Option<i64>,
    ) -> UnsubscribeOutcome {
        let watching = self.registry.lookup(calendar_id).is_some();
        warn!(
            calendar_id,
            event_id,
            ?offset,
            watching,
            "Unsubscribe requested but reminders cannot be cancelled"
        );
        UnsubscribeOutcome::Unsupported { watching }
    }

    /// Reconciles one watcher and persists if any event moved.
    pub async fn reconcile_watcher(&self, watcher: &CalendarWatcher) -> ReconcileReport {
        let report = watcher
            .reconcile(self.api.as_ref(), self.scheduler.as_ref())
            .await;
        if report.moved > 0 {
            self.persist().await;
        }
        report
    }

    /// Reconciles a calendar by id; `None` if it is not watched.
    pub async fn reconcile(&self, calendar_id: &str) -> Option<ReconcileReport> {
        let watcher = self.registry.lookup(calendar_id)?;
        Some(self.reconcile_watcher(&watcher).await)
    }

    /// Runs a fired reminder timer.
    pub async fn fire(&self, timer: &ReminderTimer) -> ProviderResult<FireOutcome> {
        fire_reminder(timer, self.api.as_ref(), self.sink.as_ref()).await
    }

    /// Runs a renewal timer: opens a new channel and swaps it in.
    ///
    /// The superseded channel is not stopped here; its next push hits the
    /// webhook router, which stops it. A failed renewal is logged and not
    /// retried.
    pub async fn renew_channel(&self, timer: &RenewalTimer) -> RenewOutcome {
        let Some(watcher) = self.registry.lookup(&timer.calendar_id) else {
            debug!(calendar_id = %timer.calendar_id, "Renewal for unknown calendar ignored");
            return RenewOutcome::Stale;
        };
        let current = watcher.channel_id();
        if current != timer.channel_id {
            debug!(
                calendar_id = %timer.calendar_id,
                timer_channel = %timer.channel_id,
                current_channel = %current,
                "Stale renewal ignored"
            );
            return RenewOutcome::Stale;
        }

        match acquire_channel(
            &timer.calendar_id,
            self.api.as_ref(),
            self.scheduler.as_ref(),
            &self.channel,
        )
        .await
        {
            Ok(lease) => {
                let new_channel_id = lease.channel_id.clone();
                let old = watcher.replace_lease(lease);
                self.persist().await;
                info!(
                    calendar_id = %timer.calendar_id,
                    old_channel = %old.channel_id,
                    new_channel = %new_channel_id,
                    "Channel renewed"
                );
                RenewOutcome::Renewed {
                    old_channel_id: old.channel_id,
                    new_channel_id,
                }
            }
            Err(e) => {
                error!(
                    calendar_id = %timer.calendar_id,
                    channel_id = %timer.channel_id,
                    error = %e,
                    "Channel renewal failed"
                );
                RenewOutcome::Failed
            }
        }
    }

    /// Executes one due action.
    pub async fn handle(&self, action: ScheduledAction) {
        match action {
            ScheduledAction::FireReminder(timer) => {
                if let Err(e) = self.fire(&timer).await {
                    warn!(
                        calendar_id = %timer.calendar_id,
                        event_id = %timer.event_id,
                        offset = %timer.offset,
                        error = %e,
                        "Reminder check failed"
                    );
                }
            }
            ScheduledAction::RenewChannel(timer) => {
                self.renew_channel(&timer).await;
            }
        }
    }

    /// Drains due actions from a [`TimerScheduler`](crate::scheduler::TimerScheduler),
    /// each in its own task.
    pub fn spawn_dispatcher(
        self: &Arc<Self>,
        mut due: mpsc::UnboundedReceiver<ScheduledAction>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(action) = due.recv().await {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.handle(action).await });
            }
            debug!("Scheduler closed, dispatcher stopping");
        })
    }

    /// Rebuilds watchers from a snapshot, re-arms their timers, then
    /// reconciles each restored calendar.
    ///
    /// Reminders whose trigger time has passed are dropped. Renewals that
    /// are overdue run immediately. Invalid records are skipped.
    pub async fn restore(&self, snapshot: RegistrySnapshot) -> usize {
        let now = Utc::now();
        let mut restored = Vec::new();

        for record in snapshot.calendars {
            let calendar_id = record.calendar_id.clone();
            let watcher = match CalendarWatcher::try_from(record) {
                Ok(watcher) => Arc::new(watcher),
                Err(e) => {
                    warn!(calendar_id = %calendar_id, error = %e, "Skipping saved calendar");
                    continue;
                }
            };

            let lease = watcher.lease();
            self.scheduler.schedule_at(
                lease.renew_at(self.channel.renewal_margin_seconds),
                ScheduledAction::RenewChannel(RenewalTimer {
                    calendar_id: lease.calendar_id.clone(),
                    channel_id: lease.channel_id.clone(),
                }),
            );
            let armed = watcher.rearm_pending(now, self.scheduler.as_ref()).await;
            debug!(
                calendar_id = %calendar_id,
                channel_id = %lease.channel_id,
                reminders = armed,
                "Watcher restored"
            );

            self.registry.insert(Arc::clone(&watcher));
            restored.push(watcher);
        }

        for watcher in &restored {
            self.reconcile_watcher(watcher).await;
        }
        info!(calendars = restored.len(), "Saved state restored");
        restored.len()
    }

    /// Writes the registry to the state store, if one is configured.
    /// Failures are logged; in-memory state stays authoritative.
    pub async fn persist(&self) {
        let Some(ref store) = self.store else {
            return;
        };
        if let Err(e) = store.save_registry(&self.registry).await {
            error!(path = %store.path().display(), error = %e, "Failed to save state");
        }
    }

    /// Probes the provider and summarizes the watchers.
    pub async fn status(&self) -> StatusReport {
        let probe = self.api.check_status().await;
        let mut calendars = Vec::new();
        for watcher in self.registry.watchers() {
            let lease = watcher.lease();
            calendars.push(CalendarStatus {
                renew_at: lease.renew_at(self.channel.renewal_margin_seconds),
                expires_at: lease.expires_at(),
                calendar_id: lease.calendar_id,
                channel_id: lease.channel_id,
                ttl_seconds: lease.ttl_seconds,
                created_at: lease.created_at,
                events: watcher.event_count().await,
            });
        }

        StatusReport {
            provider: self.api.name().to_string(),
            provider_ok: probe.is_ok(),
            provider_error: probe.err().map(|e| e.to_string()),
            pending_timers: self.scheduler.pending(),
            calendars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone};

    use calwatch_providers::ProviderErrorCode;

    use crate::testing::Harness;

    fn ten() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn eleven() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn subscribe_schedules_trigger_time() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());

        let subscription = h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();

        assert_eq!(subscription.start, ten());
        assert_eq!(subscription.trigger_at, Utc.with_ymd_and_hms(2024, 1, 1, 9, 55, 0).unwrap());
        assert_eq!(subscription.offset, Offset::seconds(300));
        assert_eq!(h.scheduler.reminder_times("cal1", "ev1"), vec![subscription.trigger_at]);
        assert_eq!(h.api.watches().len(), 1);
        assert_eq!(subscription.channel_id, h.api.watches()[0].request.id);
    }

    #[tokio::test]
    async fn negative_offset_makes_no_calls() {
        let h = Harness::new();

        let err = h.service.subscribe("cal1", "ev1", Some(-1)).await.unwrap_err();

        assert!(err.is_validation());
        assert_eq!(h.api.call_count(), 0);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(h.service.registry().is_empty());
    }

    #[tokio::test]
    async fn empty_ids_are_rejected() {
        let h = Harness::new();
        assert!(h.service.subscribe("", "ev1", None).await.unwrap_err().is_validation());
        assert!(h.service.subscribe("cal1", "", None).await.unwrap_err().is_validation());
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn rejected_channel_fails_subscribe() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        h.api.reject_watch(401);

        let err = h.service.subscribe("cal1", "ev1", Some(60)).await.unwrap_err();

        let ServerError::Provider(ref provider) = err else {
            panic!("expected provider error, got {err:?}");
        };
        assert_eq!(provider.code(), ProviderErrorCode::ChannelRejected);
        assert!(h.service.registry().lookup("cal1").is_none());
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn subscribe_retries_channel_after_rejection() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        h.api.reject_watch(403);
        assert!(h.service.subscribe("cal1", "ev1", Some(60)).await.is_err());

        h.api.accept_watch();
        let subscription = h.service.subscribe("cal1", "ev1", Some(60)).await.unwrap();

        assert_eq!(h.api.watches().len(), 2);
        assert_eq!(subscription.channel_id, h.api.watches()[1].request.id);
        assert_eq!(
            h.service.registry().lookup("cal1").unwrap().channel_id(),
            subscription.channel_id
        );
    }

    #[tokio::test]
    async fn missing_event_fails_after_channel_opened() {
        let h = Harness::new();

        let err = h.service.subscribe("cal1", "nope", None).await.unwrap_err();

        assert!(matches!(err, ServerError::Provider(_)));
        // the channel stays; later subscriptions reuse it
        assert!(h.service.registry().lookup("cal1").is_some());
    }

    #[tokio::test]
    async fn second_subscription_reuses_channel() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        h.api.set_start("cal1", "ev2", eleven());

        h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();
        h.service.subscribe("cal1", "ev2", None).await.unwrap();
        h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();

        assert_eq!(h.api.watches().len(), 1);
        let watcher = h.service.registry().lookup("cal1").unwrap();
        assert_eq!(watcher.event_count().await, 2);
        assert_eq!(watcher.event("ev1").await.unwrap().offsets.len(), 1);
        // re-subscribing schedules another timer for the same offset
        assert_eq!(h.scheduler.reminder_times("cal1", "ev1").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_subscribes_open_one_channel() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        h.api.set_start("cal1", "ev2", ten());
        h.api.set_watch_delay(StdDuration::from_millis(100));

        let (a, b) = tokio::join!(
            h.service.subscribe("cal1", "ev1", Some(60)),
            h.service.subscribe("cal1", "ev2", Some(120)),
        );

        assert_eq!(a.unwrap().channel_id, b.unwrap().channel_id);
        assert_eq!(h.api.watches().len(), 1);
        let renewals = h
            .scheduler
            .scheduled()
            .into_iter()
            .filter(|t| matches!(t.action, ScheduledAction::RenewChannel(_)))
            .count();
        assert_eq!(renewals, 1);
    }

    #[tokio::test]
    async fn end_to_end_unchanged_event_emits() {
        let h = Harness::new();
        let mut rx = h.sink.subscribe();
        h.api.set_start("cal1", "ev1", ten());
        h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();

        for action in h.scheduler.take_due(Utc.with_ymd_and_hms(2024, 1, 1, 9, 55, 0).unwrap()) {
            h.service.handle(action).await;
        }

        let reminder = rx.try_recv().unwrap();
        assert_eq!(reminder.offset, Offset::seconds(300));
        assert_eq!(reminder.event_id, "ev1");
        assert_eq!(reminder.start, ten());
    }

    #[tokio::test]
    async fn end_to_end_moved_event_rearms_on_reconcile() {
        let h = Harness::new();
        let mut rx = h.sink.subscribe();
        h.api.set_start("cal1", "ev1", ten());
        h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();

        h.api.set_start("cal1", "ev1", eleven());
        let report = h.service.reconcile("cal1").await.unwrap();
        assert_eq!(report.moved, 1);

        let nine_fifty_five = Utc.with_ymd_and_hms(2024, 1, 1, 9, 55, 0).unwrap();
        let ten_fifty_five = Utc.with_ymd_and_hms(2024, 1, 1, 10, 55, 0).unwrap();
        assert_eq!(
            h.scheduler.reminder_times("cal1", "ev1"),
            vec![nine_fifty_five, ten_fifty_five]
        );

        for action in h.scheduler.take_due(nine_fifty_five) {
            h.service.handle(action).await;
        }
        assert!(rx.try_recv().is_err());

        for action in h.scheduler.take_due(ten_fifty_five) {
            h.service.handle(action).await;
        }
        let reminder = rx.try_recv().unwrap();
        assert_eq!(reminder.start, eleven());
        assert_eq!(reminder.due_at(), ten_fifty_five);
    }

    #[tokio::test]
    async fn unsubscribe_is_unsupported() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        assert_eq!(
            h.service.unsubscribe("cal1", "ev1", Some(300)),
            UnsubscribeOutcome::Unsupported { watching: false }
        );

        h.service.subscribe("cal1", "ev1", Some(300)).await.unwrap();
        let calls = h.api.call_count();
        assert_eq!(
            h.service.unsubscribe("cal1", "ev1", Some(300)),
            UnsubscribeOutcome::Unsupported { watching: true }
        );
        assert_eq!(h.api.call_count(), calls);
    }

    #[tokio::test]
    async fn renewal_replaces_lease_and_keeps_events() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        let first = h.service.subscribe("cal1", "ev1", Some(60)).await.unwrap();

        let timer = RenewalTimer {
            calendar_id: "cal1".to_string(),
            channel_id: first.channel_id.clone(),
        };
        let RenewOutcome::Renewed {
            old_channel_id,
            new_channel_id,
        } = h.service.renew_channel(&timer).await
        else {
            panic!("expected renewal");
        };
        assert_eq!(old_channel_id, first.channel_id);
        assert_ne!(new_channel_id, first.channel_id);

        let watcher = h.service.registry().lookup("cal1").unwrap();
        assert_eq!(watcher.channel_id(), new_channel_id);
        assert_eq!(watcher.event_count().await, 1);
        assert_eq!(h.api.watches().len(), 2);

        // the superseded renewal timer is now stale
        assert_eq!(h.service.renew_channel(&timer).await, RenewOutcome::Stale);
        assert_eq!(h.api.watches().len(), 2);
    }

    #[tokio::test]
    async fn failed_renewal_keeps_current_lease() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        let first = h.service.subscribe("cal1", "ev1", None).await.unwrap();
        h.api.reject_watch(500);

        let outcome = h
            .service
            .renew_channel(&RenewalTimer {
                calendar_id: "cal1".to_string(),
                channel_id: first.channel_id.clone(),
            })
            .await;

        assert_eq!(outcome, RenewOutcome::Failed);
        assert_eq!(h.service.registry().lookup("cal1").unwrap().channel_id(), first.channel_id);
    }

    #[tokio::test]
    async fn renewal_for_unknown_calendar_is_stale() {
        let h = Harness::new();
        let outcome = h
            .service
            .renew_channel(&RenewalTimer {
                calendar_id: "cal9".to_string(),
                channel_id: "x".to_string(),
            })
            .await;
        assert_eq!(outcome, RenewOutcome::Stale);
        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn persists_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let h = Harness::with_store(StateStore::new(&path));
        let start = Utc::now() + Duration::hours(2);
        h.api.set_start("cal1", "ev1", start);
        let subscription = h.service.subscribe("cal1", "ev1", Some(600)).await.unwrap();

        let snapshot = StateStore::new(&path).load().await.unwrap().unwrap();
        assert_eq!(snapshot.calendars.len(), 1);

        let restarted = Harness::with_store(StateStore::new(&path));
        restarted.api.set_start("cal1", "ev1", start);
        assert_eq!(restarted.service.restore(snapshot).await, 1);

        let watcher = restarted.service.registry().lookup("cal1").unwrap();
        assert_eq!(watcher.channel_id(), subscription.channel_id);
        assert_eq!(
            restarted.scheduler.reminder_times("cal1", "ev1"),
            vec![subscription.trigger_at]
        );
        let renewals = restarted
            .scheduler
            .scheduled()
            .into_iter()
            .filter(|t| matches!(t.action, ScheduledAction::RenewChannel(_)))
            .count();
        assert_eq!(renewals, 1);
        // restore does not open a new channel
        assert!(restarted.api.watches().is_empty());
    }

    #[tokio::test]
    async fn restore_reconciles_moved_events() {
        let h = Harness::new();
        let start = Utc::now() + Duration::hours(2);
        h.api.set_start("cal1", "ev1", start);
        h.service.subscribe("cal1", "ev1", Some(60)).await.unwrap();
        let snapshot = RegistrySnapshot::capture(h.service.registry()).await;

        let restarted = Harness::new();
        let moved = start + Duration::hours(1);
        restarted.api.set_start("cal1", "ev1", moved);
        restarted.service.restore(snapshot).await;

        let event = restarted
            .service
            .registry()
            .lookup("cal1")
            .unwrap()
            .event("ev1")
            .await
            .unwrap();
        assert_eq!(event.start, moved);
        assert!(
            restarted
                .scheduler
                .reminder_times("cal1", "ev1")
                .contains(&(moved - Duration::minutes(1)))
        );
    }

    #[tokio::test]
    async fn status_lists_watchers() {
        let h = Harness::new();
        h.api.set_start("cal1", "ev1", ten());
        h.service.subscribe("cal1", "ev1", Some(60)).await.unwrap();

        let status = h.service.status().await;

        assert_eq!(status.provider, "memory");
        assert!(status.provider_ok);
        assert!(status.provider_error.is_none());
        assert_eq!(status.pending_timers, 2);
        assert_eq!(status.calendars.len(), 1);
        assert_eq!(status.calendars[0].events, 1);
        assert_eq!(status.calendars[0].ttl_seconds, 3600);
        assert_eq!(
            status.calendars[0].renew_at,
            status.calendars[0].expires_at - Duration::seconds(300)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_runs_due_actions() {
        let api = Arc::new(calwatch_providers::InMemoryCalendar::new());
        let (scheduler, due) = crate::scheduler::TimerScheduler::new();
        let sink = Arc::new(crate::notify::BroadcastSink::new(8));
        let mut rx = sink.subscribe();
        let service = Arc::new(ReminderService::new(
            api.clone(),
            Arc::new(scheduler.clone()),
            sink,
            ChannelSettings::new("http://localhost/webhook/calendar/events", 3600, 300),
        ));
        service.spawn_dispatcher(due);

        let start = Utc::now() + Duration::seconds(90);
        api.set_start("cal1", "ev1", start);
        service.subscribe("cal1", "ev1", Some(30)).await.unwrap();

        let reminder = tokio::time::timeout(StdDuration::from_secs(120), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reminder.offset, Offset::seconds(30));
        assert_eq!(reminder.start, start);
    }
}
