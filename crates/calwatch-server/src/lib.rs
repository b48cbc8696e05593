//! Webhook service for calendar reminders.
//!
//! Subscribers ask for a reminder "N seconds before event X starts". The
//! provider only pushes "something in this calendar changed", so the service
//! keeps, per calendar, a push channel and the last known start of every
//! subscribed event, and re-arms reminder timers whenever a push reveals that
//! an event moved.
//!
//! - [`ReminderService`]: subscribe, timer dispatch, renewal, persistence
//! - [`WebhookRouter`]: push notifications to reconciliation or channel stops
//! - [`WatcherRegistry`], [`CalendarWatcher`], [`EventWatcher`]: watcher state
//! - [`TimerScheduler`]: tokio-backed delayed actions
//! - [`router`]: the axum application
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use calwatch_providers::InMemoryCalendar;
//! use calwatch_server::{BroadcastSink, ReminderService, ServerConfig, TimerScheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("https://hooks.example.com");
//!     let (scheduler, due) = TimerScheduler::new();
//!     let service = Arc::new(ReminderService::new(
//!         Arc::new(InMemoryCalendar::new()),
//!         Arc::new(scheduler),
//!         Arc::new(BroadcastSink::new(16)),
//!         config.channel_settings(),
//!     ));
//!     service.spawn_dispatcher(due);
//!
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//!     axum::serve(listener, calwatch_server::router(service)).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod http;
mod notify;
mod registry;
mod scheduler;
pub mod secret;
mod service;
mod store;
mod watcher;
mod webhook;

#[cfg(test)]
mod testing;

pub use config::{ChannelSettings, NotifyConfig, ServerConfig, WEBHOOK_PATH};
pub use error::{ServerError, ServerResult};
pub use http::{AppError, AppState, ErrorResponse, SubscriptionRequest, router};
pub use notify::{BroadcastSink, DesktopSink, FanoutSink, ForwardSink, ReminderSink};
pub use registry::WatcherRegistry;
pub use scheduler::{
    ManualScheduler, ReminderTimer, RenewalTimer, ScheduledAction, ScheduledTimer, Scheduler,
    TimerScheduler,
};
pub use service::{
    CalendarStatus, ReminderService, RenewOutcome, StatusReport, Subscription,
    UnsubscribeOutcome,
};
pub use store::{CalendarRecord, EventRecord, RegistrySnapshot, SNAPSHOT_VERSION, StateStore};
pub use watcher::{
    CalendarWatcher, ChannelLease, EventWatcher, FireOutcome, ReconcileReport, acquire_channel,
    fire_reminder,
};
pub use webhook::{
    IgnoreReason, PushNotification, RouteOutcome, WebhookRouter, calendar_id_from_resource_uri,
};
