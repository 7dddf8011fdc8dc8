use std::sync::Arc;

use exhibition_protocol::Snapshot;
use tracing::{debug, error, warn};

use super::registry::ClientRegistry;
use super::session::Payload;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions in the registry when the broadcast started.
    pub recipients: usize,
    pub delivered: usize,
    /// Sessions whose queue was closed or full; all of them were unregistered.
    pub failed: usize,
}

/// Fan-out of one encoded snapshot to every registered session.
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Encode `snapshot` once and queue the same text to each session.
    ///
    /// A failed hand-off only costs that session: it is removed from the
    /// registry and delivery continues with the rest.
    pub fn broadcast(&self, snapshot: &Snapshot) -> BroadcastReport {
        let sessions = self.registry.snapshot();
        if sessions.is_empty() {
            return BroadcastReport::default();
        }

        let payload: Payload = match snapshot.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(error = %e, "snapshot encoding failed, nothing sent");
                return BroadcastReport {
                    recipients: sessions.len(),
                    ..BroadcastReport::default()
                };
            }
        };

        let mut report = BroadcastReport {
            recipients: sessions.len(),
            ..BroadcastReport::default()
        };
        for session in &sessions {
            match session.try_deliver(&payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(session_id = %session.id(), error = %e, "delivery failed, dropping client");
                    self.registry.remove(&session.id());
                    report.failed += 1;
                }
            }
        }

        debug!(
            bytes = payload.len(),
            delivered = report.delivered,
            failed = report.failed,
            "snapshot queued"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::session::ClientSession;
    use chrono::{FixedOffset, TimeZone};
    use exhibition_protocol::RankEntry;
    use tokio::sync::mpsc;

    fn snapshot() -> Snapshot {
        let now = FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 1, 9, 30, 0)
            .unwrap();
        Snapshot::new(
            &now,
            vec![
                ("totalDeclareCount".into(), 5),
                ("totalReleaseCount".into(), 2),
                ("caiNiaoDeclareCount".into(), 1),
                ("caiNiaoReleaseCount".into(), 0),
            ],
            vec![RankEntry::new("天猫", 5, vec![2, 1, 1, 1, 0])],
        )
    }

    fn connect(registry: &ClientRegistry, capacity: usize) -> (ClientSession, mpsc::Receiver<Payload>) {
        let (session, rx) = ClientSession::open(capacity);
        registry.add(session.clone());
        (session, rx)
    }

    #[test]
    fn every_session_gets_the_same_bytes() {
        let registry = Arc::new(ClientRegistry::new());
        let mut receivers: Vec<_> = (0..3).map(|_| connect(&registry, 4).1).collect();

        let report = Broadcaster::new(registry.clone()).broadcast(&snapshot());
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 0);

        let frames: Vec<Payload> = receivers.iter_mut().map(|rx| rx.try_recv().unwrap()).collect();
        assert!(frames.iter().all(|f| f.as_ref() == frames[0].as_ref()));
        assert!(frames[0].contains(r#""totalDeclareCount":5"#));
        assert!(frames.iter().all(|f| Arc::ptr_eq(f, &frames[0])));
    }

    #[test]
    fn empty_registry_sends_nothing() {
        let registry = Arc::new(ClientRegistry::new());
        let report = Broadcaster::new(registry).broadcast(&snapshot());
        assert_eq!(report, BroadcastReport::default());
    }

    #[test]
    fn a_dead_session_is_removed_without_affecting_others() {
        let registry = Arc::new(ClientRegistry::new());
        let (_, mut rx_a) = connect(&registry, 4);
        let (dead, rx_dead) = connect(&registry, 4);
        let (_, mut rx_c) = connect(&registry, 4);
        drop(rx_dead);

        let report = Broadcaster::new(registry.clone()).broadcast(&snapshot());

        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert!(!registry.contains(&dead.id()));
        assert_eq!(registry.len(), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn a_stalled_session_is_dropped_once_its_queue_is_full() {
        let registry = Arc::new(ClientRegistry::new());
        let (slow, _rx_slow) = connect(&registry, 1);
        let (_, mut rx_fast) = connect(&registry, 4);
        let broadcaster = Broadcaster::new(registry.clone());

        assert_eq!(broadcaster.broadcast(&snapshot()).delivered, 2);
        rx_fast.try_recv().unwrap();

        let report = broadcaster.broadcast(&snapshot());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert!(!registry.contains(&slow.id()));
        assert!(rx_fast.try_recv().is_ok());
    }

    #[test]
    fn disconnected_session_is_not_a_recipient() {
        let registry = Arc::new(ClientRegistry::new());
        let (gone, rx_gone) = connect(&registry, 4);
        let (_, mut rx_live) = connect(&registry, 4);

        registry.remove(&gone.id());
        drop(rx_gone);
        let report = Broadcaster::new(registry.clone()).broadcast(&snapshot());

        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);
        assert!(rx_live.try_recv().is_ok());
    }
}
