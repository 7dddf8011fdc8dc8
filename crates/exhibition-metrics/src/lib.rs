//! `exhibition-metrics`: the data-store capability and snapshot aggregation.
//!
//! # Overview
//!
//! [`store::DataStore`] is the only thing the aggregator knows about the
//! backing database: a filtered row count and a grouped ranking. The
//! [`sqlite::SqliteStore`] implementation owns every line of SQL.
//!
//! [`aggregator::SnapshotAggregator`] fans the configured counters and the
//! ranking out as independent queries and folds the results into a
//! [`exhibition_protocol::Snapshot`]. A failed query costs its own value
//! (`0` or an empty ranking), never the cycle.

pub mod aggregator;
pub mod db;
pub mod error;
pub mod sqlite;
pub mod store;

pub use aggregator::SnapshotAggregator;
pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::{CountFilter, DataStore, RankingFilter};
