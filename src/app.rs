// Application wiring.
// Builds the registry and cache from configuration and runs the command-line operations.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::cache::DurableStore;
use crate::config::Config;
use crate::error::Result;
use crate::registry::{DatasetDefinition, DatasetRegistry};
use crate::remote::HttpFetcher;
use crate::state::{DatasetCache, LoadOutcome};

/// Main application state.
pub struct App {
    cache: DatasetCache,
}

impl App {
    /// Register every configured dataset and repair any interrupted writes.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = DatasetRegistry::new();
        for dataset in &config.datasets {
            let fetcher = HttpFetcher::with_timeout(&dataset.url, config.fetch_timeout())?;
            let mut definition = DatasetDefinition::new(&dataset.key, fetcher);
            if let Some(days) = dataset.max_age_days {
                definition = definition.with_max_age_days(days);
            }
            registry.register(definition)?;
        }

        let store = DurableStore::new(config.data_dir()?);
        let repaired = store.recover_all()?;
        if repaired > 0 {
            info!(repaired, dir = %store.root().display(), "Recovered interrupted data file writes");
        }

        Ok(Self::with_cache(DatasetCache::new(Arc::new(registry), store)))
    }

    pub fn with_cache(cache: DatasetCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &DatasetCache {
        &self.cache
    }

    /// Load every dataset and wait for any background refreshes to finish.
    pub async fn load_all(&self) -> Vec<(String, LoadOutcome)> {
        let outcomes = self.cache.load_all().await;
        self.cache.wait_for_refreshes().await;
        outcomes
    }

    /// Load one dataset, waiting for a background refresh if one was started.
    pub async fn load(&self, key: &str) -> Result<LoadOutcome> {
        let outcome = self.cache.ensure_loaded(key).await?;
        self.cache.wait_for_refreshes().await;
        Ok(outcome)
    }

    pub async fn refresh(&self, key: &str) -> Result<LoadOutcome> {
        self.cache.force_refresh(key).await
    }

    /// Delete the persisted copy of a registered dataset.
    pub fn clear(&self, key: &str) -> Result<()> {
        self.cache.registry().get(key)?;
        self.cache.store().remove(key)?;
        info!(key, "Cleared data file");
        Ok(())
    }

    /// One line per dataset: key, status, availability, date, and last error.
    pub fn status_lines(&self, key: Option<&str>) -> Result<Vec<String>> {
        let keys: Vec<String> = match key {
            Some(key) => {
                self.cache.registry().get(key)?;
                vec![key.to_string()]
            }
            None => self.cache.registry().keys().map(str::to_string).collect(),
        };

        keys.iter()
            .map(|key| -> Result<String> {
                let status = self.cache.status(key)?;
                let availability = self.cache.availability(key)?;
                let date = status
                    .date()
                    .map(|d| d.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                let age = status
                    .date()
                    .map(|d| format!("{}d", Utc::now().signed_duration_since(d).num_days()))
                    .unwrap_or_else(|| "-".to_string());

                let mut line = format!(
                    "{:<20} {:<9} {:<15} {:<26} {}",
                    key,
                    status.status,
                    format!("{:?}", availability),
                    date,
                    age
                );
                if let Some(error) = &status.error {
                    line.push_str(&format!("  ({})", error));
                }
                Ok(line)
            })
            .collect()
    }
}
