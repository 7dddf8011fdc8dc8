use chrono::{DateTime, TimeZone};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// `time` field layout: local wall clock with microseconds.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One row of the top-N ranking.
/// Wire: `["<name>", total, c1, c2, ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankEntry {
    pub name: String,
    pub total: u64,
    /// Sub-category counts, one per configured ranking column.
    pub counts: Vec<u64>,
}

impl RankEntry {
    pub fn new(name: impl Into<String>, total: u64, counts: Vec<u64>) -> Self {
        Self {
            name: name.into(),
            total,
            counts,
        }
    }
}

impl Serialize for RankEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2 + self.counts.len()))?;
        seq.serialize_element(&self.name)?;
        seq.serialize_element(&self.total)?;
        for count in &self.counts {
            seq.serialize_element(count)?;
        }
        seq.end()
    }
}

/// Order by total descending (ties keep their incoming order) and cut to `limit`.
pub fn normalize_ranking(entries: &mut Vec<RankEntry>, limit: usize) {
    entries.sort_by(|a, b| b.total.cmp(&a.total));
    entries.truncate(limit);
}

/// Metrics computed for one broadcast cycle.
///
/// Immutable once built. Serializes with a stable key order: `time`, then the
/// counters in schema order, then `ranking`.
///
/// Wire: `{"time":"2024-05-01 09:30:00.123456","totalDeclareCount":5,...,"ranking":[...]}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    time: String,
    counters: Vec<(String, u64)>,
    ranking: Vec<RankEntry>,
}

impl Snapshot {
    pub fn new<Tz: TimeZone>(
        taken_at: &DateTime<Tz>,
        counters: Vec<(String, u64)>,
        ranking: Vec<RankEntry>,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            time: taken_at.format(TIME_FORMAT).to_string(),
            counters,
            ranking,
        }
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn counters(&self) -> &[(String, u64)] {
        &self.counters
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn ranking(&self) -> &[RankEntry] {
        &self.ranking
    }

    /// Compact JSON; non-ASCII entity names are emitted as-is, not `\u`-escaped.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counters.len() + 2))?;
        map.serialize_entry("time", &self.time)?;
        for (name, value) in &self.counters {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("ranking", &self.ranking)?;
        map.end()
    }
}
