// Dataset registry.
// Catalog of dataset definitions populated once at startup by extensions.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{DataFileError, Result};
use crate::remote::DatasetPayload;

/// Produces a fresh copy of a dataset from its remote source.
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<DatasetPayload>;
}

/// Adapts an async closure into a [`DatasetFetcher`].
pub struct FnFetcher<F>(pub F);

#[async_trait]
impl<F, Fut> DatasetFetcher for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<DatasetPayload>> + Send,
{
    async fn fetch(&self, _key: &str) -> Result<DatasetPayload> {
        (self.0)().await
    }
}

/// Hook run whenever a payload becomes the current value, e.g. to build indexes.
pub type OnLoad = Arc<dyn Fn(&DatasetPayload) + Send + Sync>;

/// Immutable description of one dataset.
#[derive(Clone)]
pub struct DatasetDefinition {
    pub key: String,
    pub fetcher: Arc<dyn DatasetFetcher>,
    pub on_load: Option<OnLoad>,
    /// `None` means the dataset is never refreshed because of its age.
    pub max_age_in_days: Option<u32>,
}

impl DatasetDefinition {
    pub fn new(key: impl Into<String>, fetcher: impl DatasetFetcher + 'static) -> Self {
        Self {
            key: key.into(),
            fetcher: Arc::new(fetcher),
            on_load: None,
            max_age_in_days: None,
        }
    }

    pub fn with_on_load(mut self, on_load: impl Fn(&DatasetPayload) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(on_load));
        self
    }

    pub fn with_max_age_days(mut self, days: u32) -> Self {
        self.max_age_in_days = Some(days);
        self
    }

    /// Maximum age as a duration, if the dataset has one.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_in_days.map(|days| Duration::days(i64::from(days)))
    }

    /// Check whether data dated `date` is older than the allowed age at `now`.
    pub fn is_stale(&self, date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.max_age() {
            Some(max_age) => now.signed_duration_since(date) > max_age,
            None => false,
        }
    }

    pub(crate) fn run_on_load(&self, payload: &DatasetPayload) {
        if let Some(on_load) = &self.on_load {
            on_load(payload);
        }
    }
}

impl fmt::Debug for DatasetDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetDefinition")
            .field("key", &self.key)
            .field("on_load", &self.on_load.is_some())
            .field("max_age_in_days", &self.max_age_in_days)
            .finish()
    }
}

/// Append-only catalog of dataset definitions.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    definitions: HashMap<String, Arc<DatasetDefinition>>,
    order: Vec<String>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Keys must be unique and max ages positive.
    pub fn register(&mut self, definition: DatasetDefinition) -> Result<()> {
        if self.definitions.contains_key(&definition.key) {
            return Err(DataFileError::DuplicateKey(definition.key));
        }
        if definition.max_age_in_days == Some(0) {
            return Err(DataFileError::Config(format!(
                "max age for {} must be at least one day",
                definition.key
            )));
        }

        tracing::debug!(key = %definition.key, max_age_days = ?definition.max_age_in_days, "Registered data file");
        self.order.push(definition.key.clone());
        self.definitions
            .insert(definition.key.clone(), Arc::new(definition));
        Ok(())
    }

    /// Look up a definition by key.
    pub fn get(&self, key: &str) -> Result<Arc<DatasetDefinition>> {
        self.definitions
            .get(key)
            .cloned()
            .ok_or_else(|| DataFileError::NotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    /// All definitions in registration order. Each call starts a new pass.
    pub fn all(&self) -> impl Iterator<Item = &Arc<DatasetDefinition>> + '_ {
        self.order.iter().filter_map(|key| self.definitions.get(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
