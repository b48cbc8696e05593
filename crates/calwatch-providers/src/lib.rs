//! Calendar provider access for calwatch.
//!
//! - [`CalendarApi`]: the operations the reminder service needs from a provider
//! - [`GoogleCalendarClient`](google::GoogleCalendarClient): Google Calendar v3 over reqwest
//! - [`InMemoryCalendar`]: map-backed provider for tests and local runs
//! - [`ProviderError`]: error taxonomy for provider calls

pub mod api;
pub mod error;
#[cfg(feature = "google")]
pub mod google;
pub mod memory;

pub use api::{BoxFuture, CalendarApi, ChannelGrant, StopChannelRequest, WatchParams, WatchRequest};
pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use memory::{InMemoryCalendar, RecordedWatch};
