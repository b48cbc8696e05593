//! Reminder delivery.
//!
//! A fired, verified reminder is handed to a [`ReminderSink`]. Sinks never
//! fail the caller; delivery problems are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use notify_rust::Notification;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use calwatch_core::Reminder;
use calwatch_providers::BoxFuture;

use crate::config::NotifyConfig;
use crate::error::{ServerError, ServerResult};

/// Destination for fired reminders.
pub trait ReminderSink: Send + Sync {
    /// Delivers one reminder.
    fn publish<'a>(&'a self, reminder: &'a Reminder) -> BoxFuture<'a, ()>;
}

/// In-process fan-out to any number of receivers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Reminder>,
}

impl BroadcastSink {
    /// Creates a broadcast sink buffering up to `capacity` reminders per receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns a new receiver; it sees reminders published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Reminder> {
        self.tx.subscribe()
    }
}

impl ReminderSink for BroadcastSink {
    fn publish<'a>(&'a self, reminder: &'a Reminder) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self.tx.send(reminder.clone()) {
                Ok(receivers) => debug!(receivers, "Reminder broadcast"),
                Err(_) => debug!(event_id = %reminder.event_id, "No reminder receivers"),
            }
        })
    }
}

/// Desktop notification through the platform notification service.
#[derive(Debug, Clone)]
pub struct DesktopSink {
    app_name: String,
    timeout: Duration,
}

impl DesktopSink {
    /// Creates a desktop sink.
    pub fn new(app_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            app_name: app_name.into(),
            timeout,
        }
    }
}

impl ReminderSink for DesktopSink {
    fn publish<'a>(&'a self, reminder: &'a Reminder) -> BoxFuture<'a, ()> {
        let app_name = self.app_name.clone();
        let timeout = self.timeout;
        let summary = reminder.summary();
        let body = format!("Starts at {}", reminder.start.format("%H:%M UTC"));
        let event_id = reminder.event_id.clone();

        Box::pin(async move {
            // notify-rust talks to D-Bus synchronously
            let shown = tokio::task::spawn_blocking(move || {
                Notification::new()
                    .appname(&app_name)
                    .summary(&summary)
                    .body(&body)
                    .timeout(timeout)
                    .show()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await;

            match shown {
                Ok(Ok(())) => info!(event_id = %event_id, "Desktop notification sent"),
                Ok(Err(e)) => error!(error = %e, event_id = %event_id, "Failed to send notification"),
                Err(e) => error!(error = %e, "Notification task panicked"),
            }
        })
    }
}

/// POSTs each reminder as JSON to a consumer URL.
#[derive(Debug, Clone)]
pub struct ForwardSink {
    client: reqwest::Client,
    url: String,
}

impl ForwardSink {
    /// Creates a forwarding sink.
    pub fn new(url: impl Into<String>, timeout: Duration) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl ReminderSink for ForwardSink {
    fn publish<'a>(&'a self, reminder: &'a Reminder) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            match self.client.post(&self.url).json(reminder).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(url = %self.url, event_id = %reminder.event_id, "Reminder forwarded");
                }
                Ok(response) => warn!(
                    url = %self.url,
                    status = response.status().as_u16(),
                    "Reminder consumer rejected delivery"
                ),
                Err(e) => warn!(url = %self.url, error = %e, "Failed to forward reminder"),
            }
        })
    }
}

/// Publishes to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ReminderSink>>,
}

impl FanoutSink {
    /// Creates an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a sink.
    pub fn with(mut self, sink: Arc<dyn ReminderSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true when no sink is configured.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Builds the sinks described by `config` around an existing broadcast sink.
    pub fn from_config(
        config: &NotifyConfig,
        broadcast: BroadcastSink,
        timeout: Duration,
    ) -> ServerResult<Self> {
        let mut fanout = Self::new().with(Arc::new(broadcast));
        if config.desktop {
            fanout = fanout.with(Arc::new(DesktopSink::new(
                config.app_name.clone(),
                Duration::from_secs(u64::from(config.timeout_secs)),
            )));
        }
        if let Some(ref url) = config.forward_url {
            fanout = fanout.with(Arc::new(ForwardSink::new(url.clone(), timeout)?));
        }
        Ok(fanout)
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl ReminderSink for FanoutSink {
    fn publish<'a>(&'a self, reminder: &'a Reminder) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for sink in &self.sinks {
                sink.publish(reminder).await;
            }
        })
    }
}
