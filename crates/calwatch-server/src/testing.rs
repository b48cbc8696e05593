//! Test wiring: in-memory provider, manual scheduler, broadcast sink.

use std::sync::Arc;

use calwatch_providers::InMemoryCalendar;

use crate::config::ChannelSettings;
use crate::notify::BroadcastSink;
use crate::scheduler::ManualScheduler;
use crate::service::ReminderService;
use crate::store::StateStore;
use crate::webhook::WebhookRouter;

pub(crate) struct Harness {
    pub api: Arc<InMemoryCalendar>,
    pub scheduler: Arc<ManualScheduler>,
    pub sink: Arc<BroadcastSink>,
    pub service: Arc<ReminderService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_store(store: StateStore) -> Self {
        Self::build(Some(store))
    }

    fn build(store: Option<StateStore>) -> Self {
        let api = Arc::new(InMemoryCalendar::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let sink = Arc::new(BroadcastSink::new(16));
        let mut service = ReminderService::new(
            api.clone(),
            scheduler.clone(),
            sink.clone(),
            ChannelSettings::new("https://hooks.example.com/webhook/calendar/events", 3600, 300),
        );
        if let Some(store) = store {
            service = service.with_store(store);
        }
        Self {
            api,
            scheduler,
            sink,
            service: Arc::new(service),
        }
    }

    pub fn router(&self) -> WebhookRouter {
        WebhookRouter::new(Arc::clone(&self.service))
    }
}
