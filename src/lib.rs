//! Vitals Board - Live health vitals ingestion and display engine
//!
//! A producer posts loosely-typed vitals snapshots to the ingestion server,
//! which keeps the current record and pushes it to display clients. Each
//! client normalizes the record into a canonical view model, diffs it against
//! the previous one and highlights every changed field for a fixed duration,
//! with each field expiring independently.
//!
//! ## Modules
//!
//! - **Producer side**: ingestion schema, snapshot store, HTTP server
//! - **Display side**: normalizer, change tracker, display state, live client

pub mod client;
pub mod config;
pub mod display;
pub mod error;
pub mod normalizer;
pub mod schema;
pub mod server;
pub mod store;
pub mod tracker;
pub mod types;

pub use client::{DisplayClient, LiveChannel, LocalChannel, PollingChannel, SseChannel};
pub use config::VitalsConfig;
pub use display::{Board, DisplayState};
pub use error::{ValidationError, VitalsError};
pub use normalizer::Normalizer;
pub use schema::{IngestBatch, RawSnapshot};
pub use store::{InMemorySnapshotStore, SnapshotStore};
pub use tracker::{diff, ChangeTracker, FlashSet};
pub use types::{Field, FieldSet, ViewModel};

/// Crate version reported by the server health route
pub const VITALS_VERSION: &str = env!("CARGO_PKG_VERSION");
