// In-memory dataset state.
// Tracks per-key load status and orchestrates loading and refreshing.

pub mod datasets;
pub mod status;

pub use datasets::DatasetCache;
pub use status::{Availability, DatasetStatus, LoadOutcome, LoadStatus, LoadedData, StatusEvent};
