//! `exhibition-core`: configuration, metric schema and shared error type.

pub mod config;
pub mod error;
pub mod schema;

pub use config::ExhibitionConfig;
pub use error::{ExhibitionError, Result};
pub use schema::{CounterSpec, MetricSchema, RankColumn, RankingSpec};
