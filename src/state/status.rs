// Per-dataset load status.
// Snapshots of what the cache currently holds for each key.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::remote::DatasetPayload;

/// Load lifecycle of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStatus {
    #[default]
    Unloaded,
    /// Reading the persisted copy.
    Loading,
    /// Fetching from the remote source.
    Fetching,
    Loaded,
    Error,
}

impl LoadStatus {
    pub fn display(&self) -> &'static str {
        match self {
            LoadStatus::Unloaded => "unloaded",
            LoadStatus::Loading => "loading",
            LoadStatus::Fetching => "fetching",
            LoadStatus::Loaded => "loaded",
            LoadStatus::Error => "error",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, LoadStatus::Loading | LoadStatus::Fetching)
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.display())
    }
}

/// The loaded value of a dataset. Payload and date always travel together.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub payload: Arc<DatasetPayload>,
    pub date: DateTime<Utc>,
}

/// How consumers should treat a dataset right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No payload; the feature depending on it is unavailable.
    Unavailable,
    Available,
    /// A payload is served but the last refresh failed or it is past its max age.
    PossiblyStale,
}

/// Snapshot of one dataset's state.
#[derive(Debug, Clone, Default)]
pub struct DatasetStatus {
    pub status: LoadStatus,
    pub loaded: Option<LoadedData>,
    pub error: Option<String>,
}

impl DatasetStatus {
    pub fn payload(&self) -> Option<&Arc<DatasetPayload>> {
        self.loaded.as_ref().map(|l| &l.payload)
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.loaded.as_ref().map(|l| l.date)
    }

    pub fn is_loaded(&self) -> bool {
        self.status == LoadStatus::Loaded
    }

    /// Classify the snapshot for consumers. `stale` reports whether the
    /// loaded date is past the dataset's max age.
    pub fn availability(&self, stale: bool) -> Availability {
        match (&self.loaded, self.status) {
            (None, _) => Availability::Unavailable,
            (Some(_), LoadStatus::Error) => Availability::PossiblyStale,
            (Some(_), _) if stale => Availability::PossiblyStale,
            (Some(_), _) => Availability::Available,
        }
    }

    /// Enter an in-flight state, keeping the current value.
    pub(crate) fn begin(&mut self, status: LoadStatus) {
        self.status = status;
    }

    /// Replace the value wholesale and mark it loaded.
    pub(crate) fn complete(&mut self, payload: Arc<DatasetPayload>, date: DateTime<Utc>) {
        self.status = LoadStatus::Loaded;
        self.loaded = Some(LoadedData { payload, date });
        self.error = None;
    }

    /// Record a failure, keeping the last good value.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = LoadStatus::Error;
        self.error = Some(error.into());
    }
}

/// Notification sent on every status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: String,
    pub status: LoadStatus,
}

/// Result of a load, fetch, or refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already loaded; nothing was read or fetched.
    AlreadyLoaded,
    /// Read from the persisted copy. When stale, a background refresh was started.
    LoadedFromDisk { refresh_scheduled: bool },
    Fetched,
    /// Another task is loading or fetching this key.
    InFlight,
    /// Recorded in the key's `error` status.
    Failed,
}

impl LoadOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, LoadOutcome::Failed)
    }
}
