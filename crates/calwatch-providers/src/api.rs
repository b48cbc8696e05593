//! The [`CalendarApi`] trait and the request types it exchanges.
//!
//! The reminder service only needs four provider operations: open a push
//! channel on a calendar, stop a channel, read an event's start time, and a
//! cheap liveness probe for the status page.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of a "watch calendar events" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRequest {
    /// Channel id chosen by the caller.
    pub id: String,
    /// Opaque token echoed back on every push.
    pub token: String,
    /// Always `"webhook"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Callback URL pushes are delivered to.
    pub address: String,
    /// Channel parameters.
    pub params: WatchParams,
}

/// Parameters of a watch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchParams {
    /// Requested channel lifetime in seconds. Google encodes it as a string.
    pub ttl: String,
}

impl WatchRequest {
    /// Builds a webhook watch request.
    pub fn webhook(
        channel_id: impl Into<String>,
        token: impl Into<String>,
        address: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            id: channel_id.into(),
            token: token.into(),
            kind: "webhook".to_string(),
            address: address.into(),
            params: WatchParams {
                ttl: ttl_seconds.to_string(),
            },
        }
    }
}

/// What the provider reports back after opening a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelGrant {
    /// Provider id of the watched resource, needed to stop the channel.
    pub resource_id: Option<String>,
    /// When the provider will stop delivering on this channel.
    pub expiration: Option<DateTime<Utc>>,
}

/// Body of a "stop channel" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopChannelRequest {
    /// Resource id from the push headers.
    pub resource_id: String,
    /// Channel to stop.
    pub id: String,
}

impl StopChannelRequest {
    /// Creates a stop request.
    pub fn new(resource_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            id: channel_id.into(),
        }
    }
}

/// Provider operations used by the reminder service.
///
/// Implementations must be `Send + Sync`; the service shares one instance
/// across webhook deliveries, subscribe calls and fired timers.
pub trait CalendarApi: Send + Sync {
    /// Short provider name for logs (e.g. "google").
    fn name(&self) -> &str;

    /// Opens a push channel on `calendar_id`.
    ///
    /// Succeeds only when the provider answers HTTP 200; anything else is a
    /// [`ProviderErrorCode::ChannelRejected`](crate::ProviderErrorCode::ChannelRejected)
    /// or transport error.
    fn watch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        request: &'a WatchRequest,
    ) -> BoxFuture<'a, ProviderResult<ChannelGrant>>;

    /// Stops a push channel.
    fn stop_channel<'a>(
        &'a self,
        request: &'a StopChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Fetches the authoritative start time (`start.dateTime`) of an event.
    fn event_start<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<DateTime<Utc>>>;

    /// Checks that the provider is reachable and the credentials work.
    fn check_status(&self) -> BoxFuture<'_, ProviderResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_request_wire_format() {
        let request = WatchRequest::webhook(
            "abc-calwatch",
            "unused",
            "https://hooks.example.com/webhook/calendar/events",
            86_400,
        );
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "id": "abc-calwatch",
                "token": "unused",
                "type": "webhook",
                "address": "https://hooks.example.com/webhook/calendar/events",
                "params": { "ttl": "86400" }
            })
        );
    }

    #[test]
    fn stop_request_wire_format() {
        let json = serde_json::to_value(StopChannelRequest::new("res-1", "old")).unwrap();
        assert_eq!(json, serde_json::json!({ "resourceId": "res-1", "id": "old" }));
    }
}
