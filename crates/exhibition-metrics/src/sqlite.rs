use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use exhibition_protocol::RankEntry;
use rusqlite::{Connection, InterruptHandle};
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::store::{CountFilter, DataStore, RankingFilter};

/// Layout of `invt_head.sys_date`.
const SYS_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// [`DataStore`] over a single SQLite connection.
///
/// rusqlite is synchronous, so every query runs on the blocking pool while
/// holding the connection mutex. Queries therefore execute one at a time even
/// when the aggregator issues them concurrently.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Option<Duration>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout: None,
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    /// Bound every query; a query exceeding it fails with [`StoreError::Timeout`]
    /// and its statement is interrupted. Time spent queued behind other
    /// queries for the connection does not count.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let (started_tx, started_rx) = oneshot::channel();
        let armed: Arc<Mutex<Option<InterruptHandle>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&armed);

        let mut task = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(guard.get_interrupt_handle());
            }
            let _ = started_tx.send(());
            let result = query(&guard);
            // disarm while the connection is still ours
            if let Ok(mut slot) = slot.lock() {
                slot.take();
            }
            result
        });

        let Some(limit) = self.timeout else {
            return task.await?;
        };

        // the deadline covers execution only, not the wait for the connection
        if started_rx.await.is_err() {
            return task.await?;
        }
        match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined?,
            Err(_) => {
                if let Ok(slot) = armed.lock() {
                    if let Some(handle) = slot.as_ref() {
                        handle.interrupt();
                    }
                }
                Err(StoreError::Timeout {
                    secs: limit.as_secs(),
                })
            }
        }
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    #[instrument(skip(self), fields(status = ?filter.status))]
    async fn count(&self, filter: &CountFilter) -> Result<u64> {
        let (sql, params) = count_query(filter);
        debug!(%sql, "count query");
        self.run(move |conn| {
            let n: i64 = conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                row.get(0)
            })?;
            Ok(n.max(0) as u64)
        })
        .await
    }

    #[instrument(skip(self), fields(limit = filter.limit, columns = filter.columns.len()))]
    async fn ranking(&self, filter: &RankingFilter) -> Result<Vec<RankEntry>> {
        let (sql, params) = ranking_query(filter);
        let width = filter.columns.len();
        debug!(%sql, "ranking query");
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let name: Option<String> = row.get(0)?;
                let total: i64 = row.get(1)?;
                let mut counts = Vec::with_capacity(width);
                for i in 0..width {
                    let n: Option<i64> = row.get(2 + i)?;
                    counts.push(n.unwrap_or(0).max(0) as u64);
                }
                Ok(RankEntry::new(
                    name.unwrap_or_default(),
                    total.max(0) as u64,
                    counts,
                ))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

fn format_since(since: &NaiveDateTime) -> String {
    since.format(SYS_DATE_FORMAT).to_string()
}

/// `?, ?, ?` for `n` positional parameters.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn count_query(filter: &CountFilter) -> (String, Vec<String>) {
    let mut sql = String::from("SELECT COUNT(1) FROM invt_head WHERE sys_date >= ?");
    let mut params = vec![format_since(&filter.since)];

    if let Some(ref status) = filter.status {
        sql.push_str(" AND app_status = ?");
        params.push(status.clone());
    }
    if let Some(ref codes) = filter.codes {
        if codes.is_empty() {
            // an empty segment matches nothing
            sql.push_str(" AND 0");
        } else {
            sql.push_str(&format!(" AND ebc_code IN ({})", placeholders(codes.len())));
            params.extend(codes.iter().cloned());
        }
    }
    (sql, params)
}

fn ranking_query(filter: &RankingFilter) -> (String, Vec<String>) {
    let mut params = Vec::new();
    let mut sql = String::from("SELECT MIN(ebc_name), COUNT(1)");
    for statuses in &filter.columns {
        sql.push_str(&format!(
            ", SUM(CASE WHEN app_status IN ({}) THEN 1 ELSE 0 END)",
            placeholders(statuses.len())
        ));
        params.extend(statuses.iter().cloned());
    }
    sql.push_str(&format!(
        " FROM invt_head WHERE sys_date >= ? GROUP BY ebc_code ORDER BY COUNT(1) DESC LIMIT {}",
        filter.limit
    ));
    params.push(format_since(&filter.since));
    (sql, params)
}
