// Dataset cache orchestration.
// Decides between disk and remote, tracks per-key status, and refreshes stale data in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex as FlightLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{DurableStore, Recovery};
use crate::error::{DataFileError, Result};
use crate::registry::{DatasetDefinition, DatasetRegistry};
use crate::remote::DatasetPayload;

use super::status::{Availability, DatasetStatus, LoadOutcome, LoadStatus, StatusEvent};

const EVENT_CAPACITY: usize = 64;

/// Per-key state: the status snapshot and the single-flight lock.
#[derive(Default)]
struct Slot {
    flight: FlightLock<()>,
    status: RwLock<DatasetStatus>,
}

impl Slot {
    fn snapshot(&self) -> DatasetStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct Inner {
    registry: Arc<DatasetRegistry>,
    store: Arc<DurableStore>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    events: broadcast::Sender<StatusEvent>,
    refreshes: Mutex<Vec<JoinHandle<()>>>,
}

/// Cache of registered datasets. Cloning shares the same state.
#[derive(Clone)]
pub struct DatasetCache {
    inner: Arc<Inner>,
}

impl DatasetCache {
    pub fn new(registry: Arc<DatasetRegistry>, store: DurableStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry,
                store: Arc::new(store),
                slots: Mutex::new(HashMap::new()),
                events,
                refreshes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &DurableStore {
        &self.inner.store
    }

    /// Receive a notification for every status transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of a registered dataset's status.
    pub fn status(&self, key: &str) -> Result<DatasetStatus> {
        Ok(self.slot(key)?.snapshot())
    }

    /// Snapshots of every registered dataset, in registration order.
    pub fn statuses(&self) -> Vec<(String, DatasetStatus)> {
        self.inner
            .registry
            .keys()
            .filter_map(|key| Some((key.to_string(), self.status(key).ok()?)))
            .collect()
    }

    /// How consumers should treat the dataset right now.
    pub fn availability(&self, key: &str) -> Result<Availability> {
        let definition = self.inner.registry.get(key)?;
        let status = self.status(key)?;
        let stale = status
            .date()
            .is_some_and(|date| definition.is_stale(date, Utc::now()));
        Ok(status.availability(stale))
    }

    /// Make the dataset available, reading the persisted copy when there is one
    /// and fetching otherwise. A no-op once loaded.
    pub async fn ensure_loaded(&self, key: &str) -> Result<LoadOutcome> {
        let definition = self.inner.registry.get(key)?;
        let slot = self.slot(key)?;

        if slot.snapshot().is_loaded() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        let Ok(_flight) = slot.flight.try_lock() else {
            return Ok(LoadOutcome::InFlight);
        };
        // Another task may have finished between the check and the lock
        if slot.snapshot().is_loaded() {
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        if self.stored_copy_available(key).await {
            self.transition(key, &slot, |s| s.begin(LoadStatus::Loading));
            match self.read_from_disk(key).await {
                Ok((payload, date)) => {
                    definition.run_on_load(&payload);
                    self.transition(key, &slot, |s| s.complete(payload, date));

                    let refresh_scheduled = definition.is_stale(date, Utc::now());
                    if refresh_scheduled {
                        info!(key, %date, "Data is too old, fetching a fresh version");
                        self.spawn_refresh(key);
                    } else {
                        debug!(key, %date, "Data file loaded from disk");
                    }
                    return Ok(LoadOutcome::LoadedFromDisk { refresh_scheduled });
                }
                Err(e) => {
                    warn!(key, error = %e, "Stored data unusable, fetching a fresh version");
                }
            }
        } else {
            info!(key, "Data not found, fetching a fresh version");
        }

        Ok(self.fetch_locked(&definition, &slot).await)
    }

    /// Fetch from the remote source and persist, unless a load for the key is in flight.
    pub async fn fetch_dataset(&self, key: &str) -> Result<LoadOutcome> {
        let definition = self.inner.registry.get(key)?;
        let slot = self.slot(key)?;

        let Ok(_flight) = slot.flight.try_lock() else {
            debug!(key, "Fetch already in flight");
            return Ok(LoadOutcome::InFlight);
        };
        Ok(self.fetch_locked(&definition, &slot).await)
    }

    /// Fetch regardless of current status or age.
    pub async fn force_refresh(&self, key: &str) -> Result<LoadOutcome> {
        self.fetch_dataset(key).await
    }

    /// Ensure every registered dataset is loaded. Each key succeeds or fails on its own.
    pub async fn load_all(&self) -> Vec<(String, LoadOutcome)> {
        let loads = self.inner.registry.keys().map(|key| async move {
            let outcome = match self.ensure_loaded(key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(key, error = %e, "Load failed");
                    LoadOutcome::Failed
                }
            };
            (key.to_string(), outcome)
        });
        join_all(loads).await
    }

    /// Wait for every background refresh started so far, including ones
    /// started while waiting.
    pub async fn wait_for_refreshes(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .refreshes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background refresh task did not finish");
                }
            }
        }
    }

    fn slot(&self, key: &str) -> Result<Arc<Slot>> {
        if !self.inner.registry.contains(key) {
            return Err(DataFileError::NotFound(key.to_string()));
        }
        let mut slots = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(slots.entry(key.to_string()).or_default()))
    }

    /// Apply a status change and notify subscribers.
    fn transition(&self, key: &str, slot: &Slot, change: impl FnOnce(&mut DatasetStatus)) {
        let status = {
            let mut current = slot.status.write().unwrap_or_else(PoisonError::into_inner);
            change(&mut *current);
            current.status
        };
        // No subscribers is fine
        let _ = self.inner.events.send(StatusEvent {
            key: key.to_string(),
            status,
        });
    }

    /// Repair an interrupted write for the key, then report whether a current copy exists.
    /// The caller holds the key's flight lock, so no write for the key is in progress.
    async fn stored_copy_available(&self, key: &str) -> bool {
        let store = Arc::clone(&self.inner.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            match store.recover(&key) {
                Ok(Recovery::Clean) => {}
                Ok(recovery) => debug!(key = %key, ?recovery, "Repaired data file before load"),
                Err(e) => warn!(key = %key, error = %e, "Data file recovery failed"),
            }
            store.exists(&key)
        })
        .await
        .unwrap_or(false)
    }

    async fn read_from_disk(&self, key: &str) -> Result<(Arc<DatasetPayload>, DateTime<Utc>)> {
        let store = Arc::clone(&self.inner.store);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<(Arc<DatasetPayload>, DateTime<Utc>)> {
            let payload = store.read_payload(&key)?;
            let date = match payload.date() {
                Some(date) => date,
                None => store.modified_at(&key)?,
            };
            Ok((Arc::new(payload), date))
        })
        .await
        .map_err(|e| DataFileError::Io(std::io::Error::other(e)))?
    }

    async fn fetch_and_persist(
        &self,
        definition: &DatasetDefinition,
    ) -> Result<(Arc<DatasetPayload>, DateTime<Utc>)> {
        let payload = Arc::new(definition.fetcher.fetch(&definition.key).await?);
        let date = payload.date().unwrap_or_else(Utc::now);

        let store = Arc::clone(&self.inner.store);
        let key = definition.key.clone();
        let to_write = Arc::clone(&payload);
        tokio::task::spawn_blocking(move || store.write_payload(&key, &to_write))
            .await
            .map_err(|e| DataFileError::Io(std::io::Error::other(e)))??;

        Ok((payload, date))
    }

    /// Fetch path. The caller holds the key's flight lock.
    async fn fetch_locked(&self, definition: &DatasetDefinition, slot: &Slot) -> LoadOutcome {
        let key = definition.key.as_str();
        self.transition(key, slot, |s| s.begin(LoadStatus::Fetching));

        match self.fetch_and_persist(definition).await {
            Ok((payload, date)) => {
                definition.run_on_load(&payload);
                self.transition(key, slot, |s| s.complete(payload, date));
                info!(key, %date, "Data file fetched");
                LoadOutcome::Fetched
            }
            Err(e) => {
                warn!(key, error = %e, "Data file fetch failed");
                self.transition(key, slot, |s| s.fail(e.to_string()));
                LoadOutcome::Failed
            }
        }
    }

    fn spawn_refresh(&self, key: &str) {
        let cache = self.clone();
        let key = key.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = cache.refresh_if_stale(&key).await {
                warn!(key = %key, error = %e, "Background refresh failed");
            }
        });

        let mut refreshes = self
            .inner
            .refreshes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        refreshes.retain(|h| !h.is_finished());
        refreshes.push(handle);
    }

    /// Waits for any in-flight work on the key, then fetches only if still stale.
    async fn refresh_if_stale(&self, key: &str) -> Result<LoadOutcome> {
        let definition = self.inner.registry.get(key)?;
        let slot = self.slot(key)?;
        let _flight = slot.flight.lock().await;

        let current = slot.snapshot();
        let still_stale = match (current.status, current.date()) {
            (LoadStatus::Loaded, Some(date)) => definition.is_stale(date, Utc::now()),
            _ => true,
        };
        if !still_stale {
            debug!(key, "Refreshed elsewhere, skipping background fetch");
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        Ok(self.fetch_locked(&definition, &slot).await)
    }
}
