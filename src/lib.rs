// datafiles: cache for remote reference datasets.
// Registry of dataset definitions, crash-safe local persistence, and per-key load status.

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod remote;
pub mod state;

pub use cache::{DurableStore, Recovery};
pub use error::{DataFileError, Result};
pub use registry::{DatasetDefinition, DatasetFetcher, DatasetRegistry, FnFetcher, OnLoad};
pub use remote::{DatasetPayload, HttpFetcher};
pub use state::{
    Availability, DatasetCache, DatasetStatus, LoadOutcome, LoadStatus, LoadedData, StatusEvent,
};
