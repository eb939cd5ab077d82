//! Viewer WebSocket: event-tagged JSON frames in both directions.
//!
//! Client → server:
//! `{"event":"match:subscribe","data":{"match_id":"m1","sport":"cricket"}}`
//! `{"event":"match:unsubscribe","data":{"match_id":"m1"}}`
//!
//! Server → client:
//! `{"event":"match:update","data":<envelope>}`
//! `{"event":"error","data":{"message":"..."}}`

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AppState;
use crate::models::{Envelope, Sport};
use crate::relay::Viewer;

const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "match:subscribe")]
    Subscribe(SubscribeRequest),
    #[serde(rename = "match:unsubscribe")]
    Unsubscribe(UnsubscribeRequest),
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct SubscribeRequest {
    pub match_id: String,
    #[serde(default)]
    pub sport: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct UnsubscribeRequest {
    pub match_id: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent<'a> {
    #[serde(rename = "match:update")]
    Update(&'a Envelope),
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent<'_> {
    fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                warn!("Failed to encode server event: {}", e);
                None
            }
        }
    }
}

fn error_frame(message: impl Into<String>) -> Option<Message> {
    ServerEvent::Error {
        message: message.into(),
    }
    .to_message()
}

/// Resolve the requested sport, falling back to the configured default.
fn resolve_sport(requested: Option<&str>, default: Sport) -> Result<Sport, String> {
    match requested {
        None => Ok(default),
        Some(s) if s.trim().is_empty() => Ok(default),
        Some(s) => s.parse().map_err(|e: crate::error::UnknownSport| e.to_string()),
    }
}

/// Drive one viewer connection until the socket closes.
pub(super) async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (viewer, mut updates) = Viewer::channel(state.viewer_buffer);
    let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Message>();
    let viewer_id = viewer.id();
    let closed = CancellationToken::new();
    info!("Viewer {} connected", viewer_id);

    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(envelope) = updates.recv() => ServerEvent::Update(envelope.as_ref()).to_message(),
                Some(msg) = control_rx.recv() => Some(msg),
                else => break,
            };
            if let Some(msg) = msg {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, &viewer, &control_tx, &closed, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_frame(&state, &viewer, &control_tx, &closed, text),
                        Err(_) => {
                            if let Some(frame) = error_frame("binary frames must be UTF-8 JSON") {
                                let _ = control_tx.send(frame);
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error for {}: {}", viewer_id, e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if control_tx.send(Message::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        }
    }

    // Cancel before leaving so an in-flight subscribe either joins before
    // this leave_all or sees the token and leaves on its own.
    closed.cancel();
    let left = state.relay.disconnect(viewer_id);
    send_task.abort();
    info!("Viewer {} disconnected ({} subscription(s) dropped)", viewer_id, left);
}

fn handle_frame(
    state: &Arc<AppState>,
    viewer: &Viewer,
    control_tx: &mpsc::UnboundedSender<Message>,
    closed: &CancellationToken,
    text: &str,
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("Unparseable frame from {}: {}", viewer.id(), e);
            if let Some(frame) = error_frame(format!("invalid message: {}", e)) {
                let _ = control_tx.send(frame);
            }
            return;
        }
    };

    match event {
        ClientEvent::Subscribe(req) => {
            let match_id = req.match_id.trim().to_string();
            if match_id.is_empty() {
                if let Some(frame) = error_frame("match_id is required") {
                    let _ = control_tx.send(frame);
                }
                return;
            }
            let sport = match resolve_sport(req.sport.as_deref(), state.default_sport) {
                Ok(sport) => sport,
                Err(message) => {
                    warn!("Viewer {} requested {}", viewer.id(), message);
                    if let Some(frame) = error_frame(message) {
                        let _ = control_tx.send(frame);
                    }
                    return;
                }
            };

            // A first fetch can take up to the fetch timeout; keep reading
            // frames from this socket meanwhile.
            let relay = state.relay.clone();
            let viewer = viewer.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                let delivery = relay.subscribe(&viewer, &match_id, sport).await;
                debug!("Viewer {} subscribe to {} answered: {:?}", viewer.id(), match_id, delivery);
                if closed.is_cancelled() {
                    relay.disconnect(viewer.id());
                }
            });
        }
        ClientEvent::Unsubscribe(req) => {
            state.relay.unsubscribe(viewer.id(), req.match_id.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PollKey;
    use crate::relay::testing::{test_relay, FakeSource, Mode};
    use serde_json::{json, Value};

    struct Conn {
        state: Arc<AppState>,
        viewer: Viewer,
        updates: mpsc::Receiver<Arc<Envelope>>,
        control_tx: mpsc::UnboundedSender<Message>,
        control_rx: mpsc::UnboundedReceiver<Message>,
        closed: CancellationToken,
    }

    impl Conn {
        fn new() -> Self {
            let state = Arc::new(AppState {
                relay: test_relay(FakeSource::new(Mode::Ok)),
                default_sport: Sport::Football,
                viewer_buffer: 16,
            });
            let (viewer, updates) = Viewer::channel(16);
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            Conn {
                state,
                viewer,
                updates,
                control_tx,
                control_rx,
                closed: CancellationToken::new(),
            }
        }

        fn send(&self, text: &str) {
            handle_frame(&self.state, &self.viewer, &self.control_tx, &self.closed, text);
        }

        /// Message of the next queued `error` frame.
        fn error_message(&mut self) -> String {
            let Ok(Message::Text(text)) = self.control_rx.try_recv() else {
                panic!("expected a text frame");
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["event"], "error");
            frame["data"]["message"].as_str().unwrap().to_string()
        }
    }

    /// Let spawned subscribe tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_frame_starts_worker_and_delivers() {
        let mut conn = Conn::new();
        conn.send(r#"{"event":"match:subscribe","data":{"match_id":"m1","sport":"cricket"}}"#);
        settle().await;

        assert!(conn.control_rx.try_recv().is_err());
        assert_eq!(conn.state.relay.registry().len(), 1);
        assert!(conn
            .state
            .relay
            .registry()
            .contains(&PollKey::new("m1", Sport::Cricket)));
        assert!(conn.updates.try_recv().unwrap().is_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_sport_gets_error_and_no_worker() {
        let mut conn = Conn::new();
        conn.send(r#"{"event":"match:subscribe","data":{"match_id":"m1","sport":"hockey"}}"#);
        settle().await;

        assert!(conn.error_message().contains("hockey"));
        assert!(conn.state.relay.registry().is_empty());
        assert_eq!(conn.state.relay.topics().membership_count(), 0);
        assert!(conn.updates.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_match_id_rejected() {
        let mut conn = Conn::new();
        conn.send(r#"{"event":"match:subscribe","data":{"match_id":"  ","sport":"football"}}"#);
        settle().await;

        assert_eq!(conn.error_message(), "match_id is required");
        assert!(conn.state.relay.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_frame_gets_error() {
        let mut conn = Conn::new();
        conn.send("not json");
        conn.send(r#"{"event":"match:subscribe","data":{}}"#);
        settle().await;

        assert!(conn.error_message().starts_with("invalid message"));
        assert!(conn.error_message().starts_with("invalid message"));
        assert!(conn.state.relay.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_frame_leaves_topic() {
        let conn = Conn::new();
        conn.send(r#"{"event":"match:subscribe","data":{"match_id":"m1"}}"#);
        settle().await;
        assert_eq!(conn.state.relay.topics().member_count("m1"), 1);

        conn.send(r#"{"event":"match:unsubscribe","data":{"match_id":"m1"}}"#);
        assert_eq!(conn.state.relay.topics().member_count("m1"), 0);
        assert_eq!(conn.state.relay.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_finishing_after_close_leaves_no_member() {
        let conn = Conn::new();
        conn.closed.cancel();
        conn.state.relay.disconnect(conn.viewer.id());

        conn.send(r#"{"event":"match:subscribe","data":{"match_id":"m1"}}"#);
        settle().await;

        assert_eq!(conn.state.relay.topics().membership_count(), 0);
        assert_eq!(conn.state.relay.registry().len(), 1);
    }

    #[test]
    fn test_parse_subscribe() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"event":"match:subscribe","data":{"match_id":"match-1","sport":"cricket","simulate":true}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Subscribe(SubscribeRequest {
                match_id: "match-1".into(),
                sport: Some("cricket".into()),
            })
        );
    }

    #[test]
    fn test_parse_subscribe_without_sport() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"match:subscribe","data":{"match_id":"m1"}}"#).unwrap();
        let ClientEvent::Subscribe(req) = event else {
            panic!("expected subscribe");
        };
        assert_eq!(req.sport, None);
    }

    #[test]
    fn test_parse_unsubscribe() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"match:unsubscribe","data":{"match_id":"m1"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Unsubscribe(UnsubscribeRequest {
                match_id: "m1".into()
            })
        );
    }

    #[test]
    fn test_unknown_event_rejected() {
        let res = serde_json::from_str::<ClientEvent>(r#"{"event":"match:delete","data":{}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_resolve_sport() {
        assert_eq!(resolve_sport(None, Sport::Cricket), Ok(Sport::Cricket));
        assert_eq!(resolve_sport(Some(""), Sport::Football), Ok(Sport::Football));
        assert_eq!(resolve_sport(Some("Cricket"), Sport::Football), Ok(Sport::Cricket));
        let err = resolve_sport(Some("hockey"), Sport::Football).unwrap_err();
        assert!(err.contains("hockey"));
    }

    #[test]
    fn test_server_event_shapes() {
        let envelope = Envelope::no_data(&PollKey::new("m1", Sport::Football), "waiting");
        let value = serde_json::to_value(ServerEvent::Update(&envelope)).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "match:update",
                "data": {"info": "waiting", "id": "m1", "sport": "football"}
            })
        );

        let value = serde_json::to_value(ServerEvent::Error {
            message: "bad".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"event": "error", "data": {"message": "bad"}}));
    }
}
