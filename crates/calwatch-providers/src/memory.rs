//! In-memory calendar provider.
//!
//! Holds event start times in a map and records every outbound call. The
//! server's tests drive it to simulate events moving, channel rejections and
//! slow provider responses; it can also back a local run without Google
//! credentials.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::api::{BoxFuture, CalendarApi, ChannelGrant, StopChannelRequest, WatchRequest};
use crate::error::{ProviderError, ProviderResult};

/// A recorded watch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWatch {
    /// Calendar the channel was opened on.
    pub calendar_id: String,
    /// The request body.
    pub request: WatchRequest,
}

#[derive(Debug, Default)]
struct Inner {
    starts: HashMap<(String, String), DateTime<Utc>>,
    failing_events: HashSet<(String, String)>,
    watches: Vec<RecordedWatch>,
    stops: Vec<StopChannelRequest>,
    reject_watch_with: Option<u16>,
    watch_delay: Option<Duration>,
    event_delay: Option<Duration>,
    grant_lifetime: Option<TimeDelta>,
}

/// Calendar provider backed by a map of event start times.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    inner: Mutex<Inner>,
    calls: AtomicUsize,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryCalendar {
    /// Creates an empty calendar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or moves) an event's start time.
    pub fn set_start(&self, calendar_id: &str, event_id: &str, start: DateTime<Utc>) {
        lock(&self.inner)
            .starts
            .insert((calendar_id.to_string(), event_id.to_string()), start);
    }

    /// Removes an event so fetches return not-found.
    pub fn remove_event(&self, calendar_id: &str, event_id: &str) {
        lock(&self.inner)
            .starts
            .remove(&(calendar_id.to_string(), event_id.to_string()));
    }

    /// Makes every fetch of this event fail with a server error.
    pub fn fail_event(&self, calendar_id: &str, event_id: &str) {
        lock(&self.inner)
            .failing_events
            .insert((calendar_id.to_string(), event_id.to_string()));
    }

    /// Makes watch calls answer with the given non-200 status.
    pub fn reject_watch(&self, status: u16) {
        lock(&self.inner).reject_watch_with = Some(status);
    }

    /// Makes watch calls succeed again.
    pub fn accept_watch(&self) {
        lock(&self.inner).reject_watch_with = None;
    }

    /// Delays watch responses, widening the window for concurrent subscribes.
    pub fn set_watch_delay(&self, delay: Duration) {
        lock(&self.inner).watch_delay = Some(delay);
    }

    /// Delays event fetches, keeping a reconcile suspended inside the provider.
    pub fn set_event_delay(&self, delay: Duration) {
        lock(&self.inner).event_delay = Some(delay);
    }

    /// Grants channels an expiry `lifetime` after the watch call, whatever
    /// ttl was requested.
    pub fn set_grant_lifetime(&self, lifetime: TimeDelta) {
        lock(&self.inner).grant_lifetime = Some(lifetime);
    }

    /// Watch calls made so far.
    pub fn watches(&self) -> Vec<RecordedWatch> {
        lock(&self.inner).watches.clone()
    }

    /// Stop calls made so far.
    pub fn stops(&self) -> Vec<StopChannelRequest> {
        lock(&self.inner).stops.clone()
    }

    /// Total number of provider calls of any kind.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup_start(&self, calendar_id: &str, event_id: &str) -> ProviderResult<DateTime<Utc>> {
        let key = (calendar_id.to_string(), event_id.to_string());
        let inner = lock(&self.inner);
        if inner.failing_events.contains(&key) {
            return Err(ProviderError::server(format!(
                "simulated failure fetching {}/{}",
                calendar_id, event_id
            ))
            .with_status(503));
        }
        inner.starts.get(&key).copied().ok_or_else(|| {
            ProviderError::not_found(format!("event {} not found in {}", event_id, calendar_id))
                .with_status(404)
        })
    }
}

impl CalendarApi for InMemoryCalendar {
    fn name(&self) -> &str {
        "memory"
    }

    fn watch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        request: &'a WatchRequest,
    ) -> BoxFuture<'a, ProviderResult<ChannelGrant>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = lock(&self.inner).watch_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let mut inner = lock(&self.inner);
            inner.watches.push(RecordedWatch {
                calendar_id: calendar_id.to_string(),
                request: request.clone(),
            });
            if let Some(status) = inner.reject_watch_with {
                return Err(ProviderError::channel_rejected(format!(
                    "failed to watch calendar {}",
                    calendar_id
                ))
                .with_status(status));
            }
            Ok(ChannelGrant {
                resource_id: Some(format!("resource-{}", calendar_id)),
                expiration: inner
                    .grant_lifetime
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
            })
        })
    }

    fn stop_channel<'a>(
        &'a self,
        request: &'a StopChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.inner).stops.push(request.clone());
            Ok(())
        })
    }

    fn event_start<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<DateTime<Utc>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = lock(&self.inner).event_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.lookup_start(calendar_id, event_id)
        })
    }

    fn check_status(&self) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use chrono::TimeZone;

    #[tokio::test]
    async fn event_start_roundtrip() {
        let calendar = InMemoryCalendar::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        calendar.set_start("cal1", "ev1", start);

        assert_eq!(calendar.event_start("cal1", "ev1").await.unwrap(), start);

        let missing = calendar.event_start("cal1", "nope").await.unwrap_err();
        assert_eq!(missing.code(), ProviderErrorCode::NotFound);
        assert_eq!(calendar.call_count(), 2);

        calendar.remove_event("cal1", "ev1");
        let removed = calendar.event_start("cal1", "ev1").await.unwrap_err();
        assert_eq!(removed.code(), ProviderErrorCode::NotFound);
    }

    #[tokio::test]
    async fn failing_event() {
        let calendar = InMemoryCalendar::new();
        calendar.set_start("cal1", "ev1", Utc::now());
        calendar.fail_event("cal1", "ev1");

        let err = calendar.event_start("cal1", "ev1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn records_watches_and_rejections() {
        let calendar = InMemoryCalendar::new();
        let request = WatchRequest::webhook("chan-1", "unused", "https://cb", 60);

        let grant = calendar.watch_calendar("cal1", &request).await.unwrap();
        assert_eq!(grant.resource_id.as_deref(), Some("resource-cal1"));

        calendar.reject_watch(403);
        let err = calendar.watch_calendar("cal1", &request).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ChannelRejected);
        assert_eq!(err.status(), Some(403));

        calendar.accept_watch();
        calendar.set_grant_lifetime(TimeDelta::hours(1));
        let grant = calendar.watch_calendar("cal1", &request).await.unwrap();
        assert!(grant.expiration.unwrap() <= Utc::now() + TimeDelta::hours(1));

        let watches = calendar.watches();
        assert_eq!(watches.len(), 3);
        assert_eq!(watches[0].calendar_id, "cal1");
        assert_eq!(watches[0].request.id, "chan-1");
    }

    #[tokio::test]
    async fn records_stops() {
        let calendar = InMemoryCalendar::new();
        calendar
            .stop_channel(&StopChannelRequest::new("res", "old"))
            .await
            .unwrap();
        assert_eq!(calendar.stops(), vec![StopChannelRequest::new("res", "old")]);
    }
}
