//! Inbound push notifications.
//!
//! Google delivers a POST to the callback URL whenever anything in a watched
//! calendar changes. Only the headers matter:
//!
//! - `X-Goog-Channel-ID`: the channel the push arrived on
//! - `X-Goog-Resource-URI`: `https://www.googleapis.com/calendar/v3/calendars/{calendarId}/events...`
//! - `X-Goog-Resource-ID`: needed to stop the channel
//! - `X-Goog-Resource-State`: `sync` for the handshake sent when a channel opens

use std::sync::{Arc, LazyLock};

use axum::http::HeaderMap;
use regex::Regex;
use tracing::{debug, info, warn};

use calwatch_providers::StopChannelRequest;

use crate::service::ReminderService;
use crate::watcher::ReconcileReport;

pub const CHANNEL_ID_HEADER: &str = "x-goog-channel-id";
pub const RESOURCE_URI_HEADER: &str = "x-goog-resource-uri";
pub const RESOURCE_ID_HEADER: &str = "x-goog-resource-id";
pub const RESOURCE_STATE_HEADER: &str = "x-goog-resource-state";

static CALENDAR_RESOURCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://www\.googleapis\.com/calendar/v\d+/calendars/([^/?#]+)")
        .expect("Invalid calendar resource regex")
});

/// Extracts the calendar id from a resource URI.
pub fn calendar_id_from_resource_uri(uri: &str) -> Option<String> {
    let encoded = CALENDAR_RESOURCE_REGEX.captures(uri)?.get(1)?.as_str();
    urlencoding::decode(encoded).ok().map(|id| id.into_owned())
}

/// Push notification headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushNotification {
    pub channel_id: Option<String>,
    pub resource_uri: Option<String>,
    pub resource_id: Option<String>,
    pub resource_state: Option<String>,
}

impl PushNotification {
    /// Reads the push headers; missing or non-UTF-8 values become `None`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Self {
            channel_id: get(CHANNEL_ID_HEADER),
            resource_uri: get(RESOURCE_URI_HEADER),
            resource_id: get(RESOURCE_ID_HEADER),
            resource_state: get(RESOURCE_STATE_HEADER),
        }
    }
}

/// Why a push was dropped without action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    MissingChannelId,
    MissingResourceUri,
    UnrecognizedResource,
    /// Channel handshake; the channel may not be registered yet.
    SyncMessage,
    /// A stale channel without a resource id cannot be stopped.
    MissingResourceId,
}

/// What the router did with a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The push matched the live channel; the calendar was reconciled.
    Reconciled(ReconcileReport),
    /// The push came from an unknown or superseded channel, which was stopped.
    Stopped { channel_id: String },
    /// Stopping the stale channel failed.
    StopFailed { channel_id: String },
    Ignored(IgnoreReason),
}

/// Routes pushes to reconciliation or stops stale channels.
#[derive(Debug, Clone)]
pub struct WebhookRouter {
    service: Arc<ReminderService>,
}

impl WebhookRouter {
    /// Creates a router over the service's registry.
    pub fn new(service: Arc<ReminderService>) -> Self {
        Self { service }
    }

    /// Handles one push. Never fails: problems are logged and reported in
    /// the outcome.
    pub async fn dispatch(&self, push: &PushNotification) -> RouteOutcome {
        let Some(ref channel_id) = push.channel_id else {
            debug!("Push without channel id ignored");
            return RouteOutcome::Ignored(IgnoreReason::MissingChannelId);
        };
        if push.resource_state.as_deref() == Some("sync") {
            debug!(channel_id = %channel_id, "Channel sync message");
            return RouteOutcome::Ignored(IgnoreReason::SyncMessage);
        }
        let Some(ref resource_uri) = push.resource_uri else {
            debug!(channel_id = %channel_id, "Push without resource URI ignored");
            return RouteOutcome::Ignored(IgnoreReason::MissingResourceUri);
        };
        let Some(calendar_id) = calendar_id_from_resource_uri(resource_uri) else {
            warn!(channel_id = %channel_id, resource_uri = %resource_uri, "Unrecognized resource URI");
            return RouteOutcome::Ignored(IgnoreReason::UnrecognizedResource);
        };

        if let Some(watcher) = self.service.registry().lookup(&calendar_id) {
            if watcher.channel_id() == *channel_id {
                debug!(calendar_id = %calendar_id, channel_id = %channel_id, "Calendar changed");
                return RouteOutcome::Reconciled(self.service.reconcile_watcher(&watcher).await);
            }
        }

        self.stop_stale(&calendar_id, channel_id, push.resource_id.as_deref())
            .await
    }

    async fn stop_stale(
        &self,
        calendar_id: &str,
        channel_id: &str,
        resource_id: Option<&str>,
    ) -> RouteOutcome {
        let Some(resource_id) = resource_id else {
            warn!(calendar_id, channel_id, "Stale channel without resource id, cannot stop");
            return RouteOutcome::Ignored(IgnoreReason::MissingResourceId);
        };

        let request = StopChannelRequest::new(resource_id, channel_id);
        match self.service.api().stop_channel(&request).await {
            Ok(()) => {
                info!(calendar_id, channel_id, "Stopped stale channel");
                RouteOutcome::Stopped {
                    channel_id: channel_id.to_string(),
                }
            }
            Err(e) => {
                warn!(calendar_id, channel_id, error = %e, "Failed to stop stale channel");
                RouteOutcome::StopFailed {
                    channel_id: channel_id.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::testing::Harness;
    use crate::watcher::{CalendarWatcher, ChannelLease};

    fn push(channel_id: &str, calendar_id: &str) -> PushNotification {
        PushNotification {
            channel_id: Some(channel_id.to_string()),
            resource_uri: Some(format!(
                "https://www.googleapis.com/calendar/v3/calendars/{}/events?alt=json",
                calendar_id
            )),
            resource_id: Some("resource-1".to_string()),
            resource_state: Some("exists".to_string()),
        }
    }

    fn register(h: &Harness, calendar_id: &str, channel_id: &str) {
        h.service
            .registry()
            .insert(Arc::new(CalendarWatcher::new(ChannelLease {
                calendar_id: calendar_id.to_string(),
                channel_id: channel_id.to_string(),
                resource_id: Some("resource-1".to_string()),
                ttl_seconds: 3600,
                created_at: Utc::now(),
                granted_expiry: None,
            })));
    }

    #[test]
    fn parses_calendar_id() {
        assert_eq!(
            calendar_id_from_resource_uri(
                "https://www.googleapis.com/calendar/v3/calendars/primary/events?alt=json"
            ),
            Some("primary".to_string())
        );
        assert_eq!(
            calendar_id_from_resource_uri(
                "https://www.googleapis.com/calendar/v3/calendars/team%40example.com/events"
            ),
            Some("team@example.com".to_string())
        );
        assert_eq!(
            calendar_id_from_resource_uri("https://www.googleapis.com/calendar/v3/calendars/cal1"),
            Some("cal1".to_string())
        );
        assert_eq!(calendar_id_from_resource_uri("https://example.com/calendars/x"), None);
        assert_eq!(calendar_id_from_resource_uri(""), None);
    }

    #[test]
    fn reads_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-channel-id", "abc".parse().unwrap());
        headers.insert("x-goog-resource-state", "exists".parse().unwrap());
        headers.insert("x-goog-resource-id", " ".parse().unwrap());

        let push = PushNotification::from_headers(&headers);
        assert_eq!(push.channel_id.as_deref(), Some("abc"));
        assert_eq!(push.resource_state.as_deref(), Some("exists"));
        assert_eq!(push.resource_id, None);
        assert_eq!(push.resource_uri, None);
    }

    #[tokio::test]
    async fn matching_channel_reconciles() {
        let h = Harness::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        register(&h, "cal1", "abc");
        h.service
            .registry()
            .lookup("cal1")
            .unwrap()
            .arm("ev1", start, calwatch_core::Offset::seconds(60), h.scheduler.as_ref())
            .await;
        h.api.set_start("cal1", "ev1", start);

        let outcome = h.router().dispatch(&push("abc", "cal1")).await;

        assert_eq!(
            outcome,
            RouteOutcome::Reconciled(ReconcileReport {
                checked: 1,
                moved: 0,
                failed: 0
            })
        );
        assert!(h.api.stops().is_empty());
    }

    #[tokio::test]
    async fn superseded_channel_is_stopped() {
        let h = Harness::new();
        register(&h, "cal1", "new");

        let outcome = h.router().dispatch(&push("old", "cal1")).await;

        assert_eq!(
            outcome,
            RouteOutcome::Stopped {
                channel_id: "old".to_string()
            }
        );
        assert_eq!(h.api.stops(), vec![StopChannelRequest::new("resource-1", "old")]);
        assert_eq!(h.service.registry().lookup("cal1").unwrap().channel_id(), "new");
        assert_eq!(h.service.registry().len(), 1);
    }

    #[tokio::test]
    async fn unknown_calendar_is_stopped() {
        let h = Harness::new();

        let outcome = h.router().dispatch(&push("abc", "cal9")).await;

        assert!(matches!(outcome, RouteOutcome::Stopped { .. }));
        assert!(h.service.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_pushes_are_ignored() {
        let h = Harness::new();
        register(&h, "cal1", "abc");
        let router = h.router();

        let mut no_channel = push("abc", "cal1");
        no_channel.channel_id = None;
        assert_eq!(
            router.dispatch(&no_channel).await,
            RouteOutcome::Ignored(IgnoreReason::MissingChannelId)
        );

        let mut no_uri = push("abc", "cal1");
        no_uri.resource_uri = None;
        assert_eq!(
            router.dispatch(&no_uri).await,
            RouteOutcome::Ignored(IgnoreReason::MissingResourceUri)
        );

        let mut bad_uri = push("abc", "cal1");
        bad_uri.resource_uri = Some("garbage".to_string());
        assert_eq!(
            router.dispatch(&bad_uri).await,
            RouteOutcome::Ignored(IgnoreReason::UnrecognizedResource)
        );

        let mut stale_without_resource = push("old", "cal1");
        stale_without_resource.resource_id = None;
        assert_eq!(
            router.dispatch(&stale_without_resource).await,
            RouteOutcome::Ignored(IgnoreReason::MissingResourceId)
        );

        assert_eq!(h.api.call_count(), 0);
    }

    #[tokio::test]
    async fn sync_message_does_not_stop_new_channel() {
        let h = Harness::new();
        let mut sync = push("fresh", "cal1");
        sync.resource_state = Some("sync".to_string());

        let outcome = h.router().dispatch(&sync).await;

        assert_eq!(outcome, RouteOutcome::Ignored(IgnoreReason::SyncMessage));
        assert!(h.api.stops().is_empty());
    }
}
