//! Google Calendar API client.
//!
//! Low-level HTTP client for the handful of Calendar v3 endpoints the
//! reminder service uses: `events.watch`, `channels.stop`, `events.get` and a
//! one-item `calendarList` probe.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::{BoxFuture, CalendarApi, ChannelGrant, StopChannelRequest, WatchRequest};
use crate::error::{ProviderError, ProviderResult};

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GoogleCalendarClient {
    /// Creates a client against `base_url`, normally
    /// `https://www.googleapis.com/calendar/v3`.
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ProviderError::configuration("failed to create HTTP client").with_source(e)
            })?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    fn calendar_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ProviderResult<reqwest::Response> {
        request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::network("request timeout").with_source(e)
                } else if e.is_connect() {
                    ProviderError::network(format!("connection failed: {}", e)).with_source(e)
                } else {
                    ProviderError::network(format!("request failed: {}", e)).with_source(e)
                }
            })
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let body = response.text().await.map_err(|e| {
            ProviderError::network(format!("failed to read response: {}", e)).with_source(e)
        })?;
        serde_json::from_str(&body).map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse response: {}", e))
                .with_source(e)
        })
    }

    /// Opens a push channel on a calendar's events collection.
    pub async fn watch_events(
        &self,
        calendar_id: &str,
        request: &WatchRequest,
    ) -> ProviderResult<ChannelGrant> {
        let url = format!("{}/events/watch", self.calendar_url(calendar_id));
        let response = self.send(self.http_client.post(&url).json(request)).await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(
                calendar_id = %calendar_id,
                status = status.as_u16(),
                "watch request rejected"
            );
            return Err(ProviderError::channel_rejected(format!(
                "failed to watch calendar {}: {}",
                calendar_id, body
            ))
            .with_status(status.as_u16()));
        }

        let channel: ApiChannel = Self::read_json(response).await?;
        debug!(
            calendar_id = %calendar_id,
            channel_id = ?channel.id,
            resource_id = ?channel.resource_id,
            "watch channel opened"
        );
        Ok(channel.into_grant())
    }

    /// Stops a push channel.
    pub async fn stop(&self, request: &StopChannelRequest) -> ProviderResult<()> {
        let url = format!("{}/channels/stop", self.base_url);
        let response = self.send(self.http_client.post(&url).json(request)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    /// Fetches one event and returns its `start.dateTime`.
    pub async fn get_event_start(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> ProviderResult<DateTime<Utc>> {
        let url = format!(
            "{}/events/{}",
            self.calendar_url(calendar_id),
            urlencoding::encode(event_id)
        );
        let response = self.send(self.http_client.get(&url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response.text().await.unwrap_or_default()));
        }

        let event: ApiEvent = Self::read_json(response).await?;
        event.start_time(event_id)
    }

    /// Requests a single calendar list entry to verify credentials.
    pub async fn probe(&self) -> ProviderResult<()> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let response = self
            .send(self.http_client.get(&url).query(&[("maxResults", "1")]))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response.text().await.unwrap_or_default()));
        }
        Ok(())
    }
}

impl CalendarApi for GoogleCalendarClient {
    fn name(&self) -> &str {
        "google"
    }

    fn watch_calendar<'a>(
        &'a self,
        calendar_id: &'a str,
        request: &'a WatchRequest,
    ) -> BoxFuture<'a, ProviderResult<ChannelGrant>> {
        Box::pin(self.watch_events(calendar_id, request))
    }

    fn stop_channel<'a>(
        &'a self,
        request: &'a StopChannelRequest,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.stop(request))
    }

    fn event_start<'a>(
        &'a self,
        calendar_id: &'a str,
        event_id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<DateTime<Utc>>> {
        Box::pin(self.get_event_start(calendar_id, event_id))
    }

    fn check_status(&self) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(self.probe())
    }
}

/// Maps a non-success status to a provider error.
fn error_for_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    let code = status.as_u16();
    let error = match status {
        reqwest::StatusCode::UNAUTHORIZED => {
            ProviderError::authentication("access token expired or invalid")
        }
        reqwest::StatusCode::FORBIDDEN => ProviderError::authorization("access denied to calendar"),
        reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
            ProviderError::not_found(format!("resource not found: {}", body))
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited("rate limit exceeded"),
        _ => ProviderError::server(format!("API error: {}", body)),
    };
    error.with_status(code)
}

/// Channel resource returned by `events.watch`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChannel {
    id: Option<String>,
    resource_id: Option<String>,
    /// Milliseconds since the epoch, as a string.
    expiration: Option<String>,
}

impl ApiChannel {
    fn into_grant(self) -> ChannelGrant {
        let expiration = self
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        ChannelGrant {
            resource_id: self.resource_id,
            expiration,
        }
    }
}

/// The subset of an event resource needed for drift checks.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    status: Option<String>,
    start: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date_time: Option<String>,
}

impl ApiEvent {
    fn start_time(self, event_id: &str) -> ProviderResult<DateTime<Utc>> {
        if self.status.as_deref() == Some("cancelled") {
            return Err(ProviderError::not_found(format!(
                "event {} was cancelled",
                event_id
            )));
        }
        let raw = self
            .start
            .and_then(|s| s.date_time)
            .ok_or_else(|| {
                ProviderError::invalid_response(format!(
                    "event {} has no start.dateTime",
                    event_id
                ))
            })?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                ProviderError::invalid_response(format!("invalid start time {:?}", raw))
                    .with_source(e)
            })
    }
}
