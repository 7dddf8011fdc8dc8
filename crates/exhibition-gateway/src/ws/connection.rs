use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::ws::session::{ClientSession, SessionId};

/// A peer that accepts no bytes for this long is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// WS connection states, linear progression, no backwards transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closed,
}

/// Axum handler, upgrades HTTP to WebSocket at `{prefix}/ws/exhibition`.
/// Any origin is accepted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let session_state = Arc::clone(&state);
        state.track(run_connection(socket, session_state));
    })
}

/// Per-connection event loop, lives for the entire WS session.
///
/// The session is registered on open and unregistered on every exit path.
/// Snapshots arrive through the session's queue; inbound frames are read only
/// to notice the peer going away.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let mut conn_state = ConnState::Connecting;
    let (session, mut outbound) = ClientSession::open(state.config.broadcast.client_queue);
    let conn_id = session.id();

    let (mut tx, mut rx) = socket.split();

    if state.registry.add(session) {
        conn_state = ConnState::Open;
        info!(conn_id = %conn_id, clients = state.registry.len(), "WS client connected");
    }

    while conn_state == ConnState::Open {
        tokio::select! {
            msg = rx.next() => {
                conn_state = on_inbound(&conn_id, msg);
            }

            frame = outbound.recv() => {
                conn_state = match frame {
                    Some(payload) => {
                        let text = Message::Text(Utf8Bytes::from(&*payload));
                        write_frame(&conn_id, &mut tx, text, WRITE_TIMEOUT).await
                    }
                    None => {
                        // unregistered by the broadcaster or by shutdown
                        write_frame(&conn_id, &mut tx, Message::Close(None), WRITE_TIMEOUT).await;
                        ConnState::Closed
                    }
                };
            }
        }
    }

    state.registry.remove(&conn_id);
    info!(conn_id = %conn_id, clients = state.registry.len(), "WS client disconnected");
}

/// Send one frame, giving up after `limit`. A TCP peer that stops reading
/// fills the kernel buffers and would otherwise park the session forever.
async fn write_frame<S>(conn_id: &SessionId, sink: &mut S, msg: Message, limit: Duration) -> ConnState
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(msg)).await {
        Ok(Ok(())) => ConnState::Open,
        Ok(Err(e)) => {
            debug!(conn_id = %conn_id, error = %e, "WS write failed");
            ConnState::Closed
        }
        Err(_) => {
            warn!(conn_id = %conn_id, secs = limit.as_secs(), "WS write timed out");
            ConnState::Closed
        }
    }
}

/// Next state after one inbound frame. Client messages carry no meaning and
/// are discarded; pings are answered by the socket itself.
fn on_inbound(conn_id: &SessionId, msg: Option<Result<Message, axum::Error>>) -> ConnState {
    match msg {
        Some(Ok(Message::Text(text))) => {
            debug!(conn_id = %conn_id, len = text.len(), "ignoring client text frame");
            ConnState::Open
        }
        Some(Ok(Message::Binary(data))) => {
            debug!(conn_id = %conn_id, len = data.len(), "ignoring client binary frame");
            ConnState::Open
        }
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => ConnState::Open,
        Some(Ok(Message::Close(_))) | None => ConnState::Closed,
        Some(Err(e)) => {
            debug!(conn_id = %conn_id, error = %e, "WS read failed");
            ConnState::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer whose receive window never reopens.
    struct StalledPeer;

    impl Sink<Message> for StalledPeer {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_closes_after_write_timeout() {
        let id = SessionId::new();
        let started = tokio::time::Instant::now();
        let state = write_frame(&id, &mut StalledPeer, Message::Text("{}".into()), WRITE_TIMEOUT).await;
        assert_eq!(state, ConnState::Closed);
        assert!(started.elapsed() >= WRITE_TIMEOUT);
    }

    #[tokio::test]
    async fn accepted_write_keeps_the_connection_open() {
        let id = SessionId::new();
        let mut sink = futures_util::sink::drain();
        let state = write_frame(&id, &mut sink, Message::Text("{}".into()), WRITE_TIMEOUT).await;
        assert_eq!(state, ConnState::Open);
    }

    #[test]
    fn client_frames_keep_the_connection_open() {
        let id = SessionId::new();
        assert_eq!(on_inbound(&id, Some(Ok(Message::Text("hello".into())))), ConnState::Open);
        assert_eq!(
            on_inbound(&id, Some(Ok(Message::Binary(Bytes::from_static(&[1, 2, 3]))))),
            ConnState::Open
        );
        assert_eq!(on_inbound(&id, Some(Ok(Message::Ping(Bytes::new())))), ConnState::Open);
    }

    #[test]
    fn close_end_of_stream_and_errors_close_the_connection() {
        let id = SessionId::new();
        assert_eq!(on_inbound(&id, Some(Ok(Message::Close(None)))), ConnState::Closed);
        assert_eq!(on_inbound(&id, None), ConnState::Closed);
        assert_eq!(
            on_inbound(&id, Some(Err(axum::Error::new(std::io::Error::other("reset"))))),
            ConnState::Closed
        );
    }
}
