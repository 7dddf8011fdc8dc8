use async_trait::async_trait;
use chrono::NaiveDateTime;
use exhibition_protocol::RankEntry;

use crate::error::Result;

/// Rows created at or after `since`, optionally narrowed by status and
/// business code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountFilter {
    pub since: NaiveDateTime,
    pub status: Option<String>,
    /// `None` counts every business; `Some` restricts to the listed codes.
    pub codes: Option<Vec<String>>,
}

/// Rows since `since`, grouped by business, ordered by row count descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingFilter {
    pub since: NaiveDateTime,
    /// One entry per sub-count column: the statuses that column counts.
    pub columns: Vec<Vec<String>>,
    pub limit: usize,
}

/// Query capability the aggregator runs against.
///
/// Implementations own the query dialect and schema. Every call is
/// independent; a failure is reported to the caller, never retried here.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Stable lowercase identifier used in logs (e.g. `"sqlite"`).
    fn name(&self) -> &str;

    /// Number of rows matching `filter`.
    async fn count(&self, filter: &CountFilter) -> Result<u64>;

    /// Top groups for `filter`, at most `filter.limit` of them, each carrying
    /// one sub-count per `filter.columns` entry.
    async fn ranking(&self, filter: &RankingFilter) -> Result<Vec<RankEntry>>;
}
