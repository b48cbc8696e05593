//! Google Calendar push-channel provider.
//!
//! Authentication is handled elsewhere: the client is given a bearer token
//! and uses it as-is. Push notifications are delivered to the address named
//! in each [`WatchRequest`](crate::WatchRequest) and carry these headers:
//!
//! - `X-Goog-Channel-ID`: the channel id chosen when watching
//! - `X-Goog-Resource-ID`: needed to stop the channel
//! - `X-Goog-Resource-URI`: `https://www.googleapis.com/calendar/v3/calendars/{calendarId}/events...`

mod client;

pub use client::GoogleCalendarClient;
