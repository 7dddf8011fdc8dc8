//! Metric schema: which counters a snapshot carries and how the ranking
//! rows are shaped.
//!
//! Deployments have shipped more than one message layout (four counters with
//! five ranking sub-counts, and six counters with six sub-counts), so nothing
//! here is hard-coded into the aggregator. The built-in default reproduces the
//! four-counter layout; the six-counter layout lives in
//! `exhibition.example.toml`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ExhibitionError, Result};

/// Hard upper bound on ranking rows per snapshot.
pub const MAX_RANKING: usize = 10;

/// Status code of a released (cleared) declaration.
pub const STATUS_RELEASED: &str = "800";

/// Keys reserved by the snapshot envelope; counters must not shadow them.
const RESERVED_KEYS: [&str; 2] = ["time", "ranking"];

/// Missing keys fall back to [`MetricSchema::default`], so a config file can
/// override the segments alone and keep the stock counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSchema {
    /// Named groups of e-commerce business codes, e.g. `cainiao`.
    pub segments: BTreeMap<String, Vec<String>>,
    /// Scalar counters, emitted in this order after `time`.
    pub counters: Vec<CounterSpec>,
    pub ranking: RankingSpec,
}

/// One scalar counter: rows since start of day, optionally narrowed to a
/// single status and/or a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSpec {
    /// JSON field name, e.g. `totalDeclareCount`.
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
}

impl CounterSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: None,
            segment: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSpec {
    pub limit: usize,
    /// Sub-count columns following `[name, total, ...]` in every row.
    pub columns: Vec<RankColumn>,
}

/// A ranking sub-count: rows of the entity whose status is any of `statuses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankColumn {
    /// Human label, only used in logs and the dashboard legend.
    #[serde(default)]
    pub label: String,
    pub statuses: Vec<String>,
}

impl RankColumn {
    pub fn status(label: &str, status: &str) -> Self {
        Self {
            label: label.to_string(),
            statuses: vec![status.to_string()],
        }
    }
}

impl Default for RankingSpec {
    fn default() -> Self {
        Self {
            limit: MAX_RANKING,
            columns: vec![
                RankColumn::status("released", STATUS_RELEASED),
                RankColumn::status("status 2", "2"),
                RankColumn::status("status 03", "03"),
                RankColumn::status("status 02", "02"),
                RankColumn::status("status 100", "100"),
            ],
        }
    }
}

impl Default for MetricSchema {
    fn default() -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(
            "cainiao".to_string(),
            vec![
                "3301968FU0".to_string(),
                "410166003B".to_string(),
                "4403160SGR".to_string(),
            ],
        );
        Self {
            segments,
            counters: vec![
                CounterSpec::new("totalDeclareCount"),
                CounterSpec::new("totalReleaseCount").with_status(STATUS_RELEASED),
                CounterSpec::new("caiNiaoDeclareCount").with_segment("cainiao"),
                CounterSpec::new("caiNiaoReleaseCount")
                    .with_segment("cainiao")
                    .with_status(STATUS_RELEASED),
            ],
            ranking: RankingSpec::default(),
        }
    }
}

impl MetricSchema {
    /// Business codes of a segment, if the segment is defined.
    pub fn segment_codes(&self, segment: &str) -> Option<&[String]> {
        self.segments.get(segment).map(Vec::as_slice)
    }

    /// Number of elements in each serialized ranking row.
    pub fn ranking_arity(&self) -> usize {
        2 + self.ranking.columns.len()
    }

    /// Reject schemas the aggregator cannot honour.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for counter in &self.counters {
            if counter.name.is_empty() {
                return Err(ExhibitionError::Schema("counter name must not be empty".into()));
            }
            if RESERVED_KEYS.contains(&counter.name.as_str()) {
                return Err(ExhibitionError::Schema(format!(
                    "counter name '{}' is reserved",
                    counter.name
                )));
            }
            if !seen.insert(counter.name.as_str()) {
                return Err(ExhibitionError::Schema(format!(
                    "duplicate counter '{}'",
                    counter.name
                )));
            }
            if let Some(ref segment) = counter.segment {
                if !self.segments.contains_key(segment) {
                    return Err(ExhibitionError::Schema(format!(
                        "counter '{}' references unknown segment '{}'",
                        counter.name, segment
                    )));
                }
            }
        }

        if self.ranking.limit == 0 || self.ranking.limit > MAX_RANKING {
            return Err(ExhibitionError::Schema(format!(
                "ranking.limit must be between 1 and {MAX_RANKING}, got {}",
                self.ranking.limit
            )));
        }
        if let Some(col) = self.ranking.columns.iter().find(|c| c.statuses.is_empty()) {
            return Err(ExhibitionError::Schema(format!(
                "ranking column '{}' has no statuses",
                col.label
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_is_valid() {
        let schema = MetricSchema::default();
        schema.validate().expect("default schema must validate");
        assert_eq!(schema.counters.len(), 4);
        assert_eq!(schema.ranking_arity(), 7);
    }

    #[test]
    fn unknown_segment_is_rejected() {
        let mut schema = MetricSchema::default();
        schema
            .counters
            .push(CounterSpec::new("vipDeclareCount").with_segment("vip"));
        assert!(schema.validate().is_err());

        schema
            .segments
            .insert("vip".to_string(), vec!["V001".to_string()]);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn duplicate_and_reserved_names_are_rejected() {
        let mut schema = MetricSchema::default();
        schema.counters.push(CounterSpec::new("totalDeclareCount"));
        assert!(schema.validate().is_err());

        let mut schema = MetricSchema::default();
        schema.counters.push(CounterSpec::new("ranking"));
        assert!(matches!(schema.validate(), Err(ExhibitionError::Schema(_))));
    }

    #[test]
    fn ranking_limit_bounds() {
        let mut schema = MetricSchema::default();
        schema.ranking.limit = 0;
        assert!(schema.validate().is_err());
        schema.ranking.limit = MAX_RANKING + 1;
        assert!(schema.validate().is_err());
        schema.ranking.limit = 3;
        assert!(schema.validate().is_ok());
    }
}
