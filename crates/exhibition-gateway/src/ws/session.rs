use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Encoded frame shared by every recipient of one broadcast.
pub type Payload = Arc<str>;

/// Identity of one live WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a frame could not be queued for a session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

/// Write handle for one client. The connection task owns the matching
/// receiver and the socket; everything else only ever sees this handle.
#[derive(Debug, Clone)]
pub struct ClientSession {
    id: SessionId,
    tx: mpsc::Sender<Payload>,
}

impl ClientSession {
    /// New session with a bounded outbound queue of `capacity` frames.
    pub fn open(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: SessionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue `payload` without waiting. A full queue means the client is not
    /// keeping up and is treated like a dead one.
    pub fn try_deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        self.tx.try_send(Arc::clone(payload)).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        })
    }
}

impl PartialEq for ClientSession {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ClientSession {}
