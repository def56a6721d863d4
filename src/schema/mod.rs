//! Producer-side payload schema
//!
//! This module defines the structured types at the ingestion boundary: the
//! batches the producer posts and the raw snapshot record they are merged into.

mod ingest;
mod snapshot;

pub use ingest::*;
pub use snapshot::*;
