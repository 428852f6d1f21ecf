// Remote dataset sources.
// Payload type shared by fetchers and an HTTP fetcher for JSON documents.

pub mod client;
pub mod types;

pub use client::HttpFetcher;
pub use types::DatasetPayload;
