//! Calendar id to [`CalendarWatcher`] map.
//!
//! The registry is the only record of which calendars are being watched. It
//! is owned by the reminder service and shared with the webhook router.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use calwatch_providers::ProviderResult;

use crate::watcher::{CalendarWatcher, ChannelLease};

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Drops the per-calendar creation lock from the map once its last user is
/// done, whether acquisition succeeded or failed.
struct CreatingEntry<'a> {
    registry: &'a WatcherRegistry,
    calendar_id: &'a str,
    key_lock: &'a KeyLock,
}

impl Drop for CreatingEntry<'_> {
    fn drop(&mut self) {
        let mut creating = self.registry.creating();
        let last_user = creating
            .get(self.calendar_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, self.key_lock))
            // the map and this caller
            && Arc::strong_count(self.key_lock) == 2;
        if last_user {
            creating.remove(self.calendar_id);
        }
    }
}

/// Process-wide set of calendar watchers.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    watchers: RwLock<HashMap<String, Arc<CalendarWatcher>>>,
    // one async lock per calendar being created, held across channel acquisition
    creating: Mutex<HashMap<String, KeyLock>>,
}

impl WatcherRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn creating(&self) -> MutexGuard<'_, HashMap<String, KeyLock>> {
        self.creating.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the watcher for `calendar_id`, opening a channel if there is none.
    ///
    /// `acquire` runs at most once per calendar even under concurrent calls:
    /// later callers wait for the first and get its watcher. An existing
    /// watcher is returned as is, however close its lease is to expiry.
    /// If `acquire` fails, nothing is registered and the error is returned.
    pub async fn get_or_create<F, Fut>(
        &self,
        calendar_id: &str,
        acquire: F,
    ) -> ProviderResult<Arc<CalendarWatcher>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProviderResult<ChannelLease>>,
    {
        if let Some(watcher) = self.lookup(calendar_id) {
            return Ok(watcher);
        }

        let key_lock = self
            .creating()
            .entry(calendar_id.to_string())
            .or_default()
            .clone();
        let _entry = CreatingEntry {
            registry: self,
            calendar_id,
            key_lock: &key_lock,
        };
        let _guard = key_lock.lock().await;

        if let Some(watcher) = self.lookup(calendar_id) {
            return Ok(watcher);
        }

        debug!(calendar_id, "No watcher yet, acquiring channel");
        let lease = acquire().await?;
        let watcher = Arc::new(CalendarWatcher::new(lease));
        self.insert(Arc::clone(&watcher));
        Ok(watcher)
    }

    #[cfg(test)]
    fn creating_len(&self) -> usize {
        self.creating().len()
    }

    /// Returns the watcher for `calendar_id` without creating one.
    pub fn lookup(&self, calendar_id: &str) -> Option<Arc<CalendarWatcher>> {
        self.watchers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(calendar_id)
            .cloned()
    }

    /// Registers a watcher, replacing any previous one for its calendar.
    pub fn insert(&self, watcher: Arc<CalendarWatcher>) {
        self.watchers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(watcher.calendar_id().to_string(), watcher);
    }

    /// All watchers, ordered by calendar id.
    pub fn watchers(&self) -> Vec<Arc<CalendarWatcher>> {
        let mut watchers: Vec<_> = self
            .watchers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        watchers.sort_by(|a, b| a.calendar_id().cmp(b.calendar_id()));
        watchers
    }

    /// Number of watched calendars.
    pub fn len(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns true when no calendar is watched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use calwatch_providers::ProviderError;
    use chrono::Utc;

    fn lease(calendar_id: &str, channel_id: &str) -> ChannelLease {
        ChannelLease {
            calendar_id: calendar_id.to_string(),
            channel_id: channel_id.to_string(),
            resource_id: None,
            ttl_seconds: 3600,
            created_at: Utc::now(),
            granted_expiry: None,
        }
    }

    #[tokio::test]
    async fn creates_once_then_returns_existing() {
        let registry = WatcherRegistry::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .get_or_create("cal1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(lease("cal1", "abc"))
            })
            .await
            .unwrap();
        let second = registry
            .get_or_create("cal1", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(lease("cal1", "other"))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.channel_id(), "abc");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_calls_acquire_once() {
        let registry = Arc::new(WatcherRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                registry
                    .get_or_create("cal1", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(lease("cal1", "abc"))
                    })
                    .await
                    .unwrap()
                    .channel_id()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "abc");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.creating_len(), 0);
    }

    #[tokio::test]
    async fn failed_acquisition_registers_nothing() {
        let registry = WatcherRegistry::new();

        let err = registry
            .get_or_create("cal1", || async {
                Err(ProviderError::channel_rejected("denied").with_status(403))
            })
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert!(registry.lookup("cal1").is_none());
        assert_eq!(registry.creating_len(), 0);

        let watcher = registry
            .get_or_create("cal1", || async { Ok(lease("cal1", "retry")) })
            .await
            .unwrap();
        assert_eq!(watcher.channel_id(), "retry");
        assert_eq!(registry.creating_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_retries_after_failed_acquisition() {
        let registry = Arc::new(WatcherRegistry::new());
        let in_flight = Arc::new(AtomicUsize::new(0));

        let attempt = |fail: bool| {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                registry
                    .get_or_create("cal1", || async move {
                        assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        if fail {
                            Err(ProviderError::channel_rejected("denied").with_status(403))
                        } else {
                            Ok(lease("cal1", "second"))
                        }
                    })
                    .await
                    .map(|watcher| watcher.channel_id())
            })
        };
        let first = attempt(true);
        tokio::task::yield_now().await;
        let second = attempt(false);

        assert!(first.await.unwrap().is_err());
        assert_eq!(second.await.unwrap().unwrap(), "second");
        assert_eq!(registry.creating_len(), 0);
    }

    #[test]
    fn watchers_are_sorted() {
        let registry = WatcherRegistry::new();
        registry.insert(Arc::new(CalendarWatcher::new(lease("b", "1"))));
        registry.insert(Arc::new(CalendarWatcher::new(lease("a", "2"))));

        let ids: Vec<_> = registry
            .watchers()
            .iter()
            .map(|w| w.calendar_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.lookup("c").is_none());
    }
}
