//! Wire types pushed to dashboard clients.
//!
//! One [`snapshot::Snapshot`] per broadcast cycle, encoded once as compact
//! JSON and sent as a WebSocket text frame.

pub mod snapshot;

pub use snapshot::{normalize_ranking, RankEntry, Snapshot, TIME_FORMAT};
