// Durable storage for dataset files.
// Persists each dataset's current value on disk with crash-safe replacement.

pub mod paths;
pub mod store;

pub use store::{DurableStore, Recovery};
