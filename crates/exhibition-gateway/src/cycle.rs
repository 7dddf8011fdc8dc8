use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use exhibition_metrics::SnapshotAggregator;
use exhibition_scheduler::BroadcastCycle;
use tracing::info;

use crate::ws::broadcast::{BroadcastReport, Broadcaster};
use crate::ws::registry::ClientRegistry;

/// Aggregate one snapshot and push it to every connected dashboard.
pub struct SnapshotCycle {
    aggregator: SnapshotAggregator,
    broadcaster: Broadcaster,
    registry: Arc<ClientRegistry>,
}

impl SnapshotCycle {
    pub fn new(aggregator: SnapshotAggregator, registry: Arc<ClientRegistry>) -> Self {
        Self {
            aggregator,
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// One full cycle; returns what the broadcast reached.
    pub async fn execute(&self) -> BroadcastReport {
        let started = Instant::now();
        let snapshot = self.aggregator.aggregate().await;
        let report = self.broadcaster.broadcast(&snapshot);
        info!(
            clients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "broadcast cycle complete"
        );
        report
    }
}

#[async_trait]
impl BroadcastCycle for SnapshotCycle {
    fn audience(&self) -> usize {
        self.registry.len()
    }

    async fn run_cycle(&self) {
        self.execute().await;
    }
}
