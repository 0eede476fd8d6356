// WebSocket transport: one task per connection, one reply per text frame.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use lineup_core::engine::Engine;
use lineup_core::store::EntityStore;

use crate::protocol;

/// Accept connections on `listener` forever, serving each on its own task.
pub async fn run<S>(listener: TcpListener, engine: Arc<Engine<S>>) -> anyhow::Result<()>
where
    S: EntityStore + 'static,
{
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            serve_connection(stream, addr.to_string(), engine).await;
        });
    }
}

/// Perform the handshake and answer requests until the client goes away.
async fn serve_connection<S>(stream: TcpStream, addr: String, engine: Arc<Engine<S>>)
where
    S: EntityStore + 'static,
{
    info!("Accepted TCP connection from {addr}");
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (write, read) = ws_stream.split();
    let answered = process_message_stream(read, write, &engine, &addr).await;
    info!("Client {addr} disconnected after {answered} requests");
}

/// Answer every text frame from `stream` on `sink` until a close frame, a
/// read error, or a failed write. Returns the number of replies sent.
///
/// Generic over the stream and sink so it can be driven with in-memory
/// values in tests.
pub async fn process_message_stream<St, Si, S>(
    mut stream: St,
    mut sink: Si,
    engine: &Engine<S>,
    addr: &str,
) -> usize
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
    S: EntityStore,
{
    let mut answered = 0;
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let reply = protocol::handle_text(engine, text.as_str()).await;
                let json = match serde_json::to_string(&reply) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode reply for {addr}: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(json)).await {
                    warn!("Failed to send reply to {addr}: {e}");
                    break;
                }
                answered += 1;
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            Ok(other) => {
                debug!("Ignoring non-text frame from {addr}: {:?}", other);
            }
        }
    }
    answered
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{sink, stream};
    use lineup_core::auth::Actor;
    use lineup_core::engine::EngineOptions;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::{self, error::SendError};

    use crate::db::Database;

    fn engine() -> Engine<Database> {
        Engine::new(
            Database::open(":memory:").unwrap(),
            EngineOptions::default(),
        )
    }

    fn mock_stream(
        messages: Vec<Result<Message, WsError>>,
    ) -> impl Stream<Item = Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    /// A sink that forwards every reply into `tx`.
    fn channel_sink(
        tx: mpsc::Sender<Message>,
    ) -> impl Sink<Message, Error = SendError<Message>> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: Message| async move {
            tx.send(msg).await.map(|()| tx)
        }))
    }

    fn request(id: u64, op: Value) -> Message {
        let mut body = json!({ "id": id, "actor": Actor::admin("root") });
        if let (Some(body), Some(op)) = (body.as_object_mut(), op.as_object()) {
            body.extend(op.clone());
        }
        Message::text(body.to_string())
    }

    /// Everything sent so far, decoded.
    fn replies(rx: &mut mpsc::Receiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            match msg {
                Message::Text(t) => out.push(serde_json::from_str(t.as_str()).unwrap()),
                other => panic!("expected text reply, got {other:?}"),
            }
        }
        out
    }

    #[tokio::test]
    async fn each_text_frame_gets_one_reply_in_order() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(request(1, json!({ "op": "create_league", "name": "Eredivisie" }))),
            Ok(request(2, json!({ "op": "list_matches" }))),
        ];

        let answered =
            process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test")
                .await;

        assert_eq!(answered, 2);
        let replies = replies(&mut rx);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[0]["ok"], true);
        assert_eq!(replies[0]["data"]["name"], "Eredivisie");
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(replies[1]["data"], json!([]));
    }

    #[tokio::test]
    async fn malformed_json_is_answered_and_connection_continues() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::text("{not json")),
            Ok(request(9, json!({ "op": "list_squads" }))),
        ];

        process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test").await;

        let replies = replies(&mut rx);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["ok"], false);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["kind"], "bad_request");
        assert_eq!(replies[1]["ok"], true);
    }

    #[tokio::test]
    async fn close_frame_stops_processing() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(request(1, json!({ "op": "list_matches" }))),
            Ok(Message::Close(None)),
            Ok(request(2, json!({ "op": "list_matches" }))),
        ];

        let answered =
            process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test")
                .await;
        assert_eq!(answered, 1);
        assert_eq!(replies(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn error_stops_processing() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(request(1, json!({ "op": "list_matches" }))),
            Err(WsError::ConnectionClosed),
            Ok(request(2, json!({ "op": "list_matches" }))),
        ];

        process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test").await;
        assert_eq!(replies(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn failed_write_stops_processing() {
        let engine = engine();
        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        let messages = vec![
            Ok(request(1, json!({ "op": "list_matches" }))),
            Ok(request(2, json!({ "op": "list_matches" }))),
        ];

        let answered =
            process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test")
                .await;
        assert_eq!(answered, 0);
    }

    #[tokio::test]
    async fn binary_and_ping_frames_are_ignored() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![
            Ok(Message::Binary(vec![1, 2, 3].into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Pong(vec![].into())),
            Ok(request(5, json!({ "op": "list_matches" }))),
        ];

        let answered =
            process_message_stream(mock_stream(messages), channel_sink(tx), &engine, "test")
                .await;
        assert_eq!(answered, 1);
        assert_eq!(replies(&mut rx)[0]["id"], 5);
    }

    #[tokio::test]
    async fn empty_stream_completes_normally() {
        let engine = engine();
        let (tx, mut rx) = mpsc::channel(64);
        let answered =
            process_message_stream(mock_stream(vec![]), channel_sink(tx), &engine, "test").await;
        assert_eq!(answered, 0);
        assert!(replies(&mut rx).is_empty());
    }
}
