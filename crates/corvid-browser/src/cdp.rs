//! Chrome DevTools Protocol connection.
//!
//! One websocket per target. Commands are JSON-RPC style: each carries a
//! monotonically increasing id, and the reply is routed back to the caller
//! through a oneshot channel registered before the send. Events (frames
//! without an id) fan out on a broadcast channel so independent consumers
//! (the settle waiter, the file-chooser listener) can each hold their own
//! subscription without stealing from one another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{BrowserError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Default per-command reply timeout. Distinct from any settle ceiling:
/// this bounds a single protocol round trip, not page activity.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered event capacity. Events that arrive while an action is executing
/// must still be observable by the settle waiter afterwards, so the buffer
/// is sized for a busy page, not a quiet one.
const EVENT_CHANNEL_CAPACITY: usize = 2048;

/// A protocol event, e.g. `Network.requestWillBeSent`.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone)]
enum CommandOutcome {
    Result(Value),
    Error { code: i64, message: String },
    ConnectionClosed,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CommandOutcome>>>>;

/// An established CDP websocket connection.
pub struct CdpConnection {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<WsSink>,
    events: broadcast::Sender<CdpEvent>,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a DevTools websocket URL
    /// (`ws://host:port/devtools/page/<id>` or `/devtools/browser/<id>`).
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (sink, source) = ws.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_loop(source, Arc::clone(&pending), events.clone()));
        debug!(url, "CDP connection established");
        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(sink),
            events,
            reader,
        })
    }

    /// Subscribe to the event stream. Each subscriber sees every event
    /// broadcast after the point of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a command and await its result with the default timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send a command and await its result, bounded by `timeout`.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        // Register before sending so a fast reply cannot race the insert.
        self.pending.lock().await.insert(id, tx);

        let message = build_command(id, method, &params);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Message::text(message)).await {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Protocol {
                    detail: format!("websocket send failed: {e}"),
                });
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                })
            }
            Ok(Err(_)) => Err(BrowserError::Protocol {
                detail: format!("reply channel for {method} dropped"),
            }),
            Ok(Ok(CommandOutcome::Result(value))) => Ok(value),
            Ok(Ok(CommandOutcome::Error { code, message })) => {
                Err(BrowserError::Cdp { code, message })
            }
            Ok(Ok(CommandOutcome::ConnectionClosed)) => Err(BrowserError::Protocol {
                detail: format!("connection closed before {method} replied"),
            }),
        }
    }

    /// Enable a protocol domain (`Page`, `Network`, ...).
    pub async fn enable(&self, domain: &str) -> Result<()> {
        self.call(&format!("{domain}.enable"), json!({})).await?;
        Ok(())
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for CdpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpConnection")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

async fn read_loop(mut source: WsSource, pending: PendingMap, events: broadcast::Sender<CdpEvent>) {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match classify_frame(&text) {
            Frame::Reply { id, outcome } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(outcome);
                }
            }
            Frame::Event(event) => {
                // Send fails only when nobody is subscribed, which is fine.
                let _ = events.send(event);
            }
            Frame::Malformed => {
                warn!("discarding unparseable CDP frame");
            }
        }
    }
    debug!("CDP read loop finished");
    // The socket is gone; fail every caller still waiting for a reply.
    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let _ = tx.send(CommandOutcome::ConnectionClosed);
    }
}

enum Frame {
    Reply { id: u64, outcome: CommandOutcome },
    Event(CdpEvent),
    Malformed,
}

fn build_command(id: u64, method: &str, params: &Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

fn classify_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Frame::Malformed,
    };
    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        return Frame::Reply {
            id,
            outcome: parse_reply(&value),
        };
    }
    if let Some(method) = value.get("method").and_then(Value::as_str) {
        return Frame::Event(CdpEvent {
            method: method.to_string(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        });
    }
    Frame::Malformed
}

fn parse_reply(value: &Value) -> CommandOutcome {
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown CDP error")
            .to_string();
        CommandOutcome::Error { code, message }
    } else {
        CommandOutcome::Result(value.get("result").cloned().unwrap_or(Value::Null))
    }
}
