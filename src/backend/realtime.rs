//! PocketBase realtime subscriptions
//!
//! The server pushes record changes over a server-sent event stream. A
//! connection starts with a `PB_CONNECT` event carrying the client ID, which
//! is then registered for topics with a POST. Each subscription owns one
//! connection task that forwards topic events into a broadcast channel and
//! reconnects when the stream drops, until every receiver is gone.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::{AuthStore, BackendError, RecordEvent};

const CONNECT_EVENT: &str = "PB_CONNECT";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// How often an idle stream checks whether anyone still listens
const IDLE_CHECK: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 64;

/// One dispatched server-sent event
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed a chunk and return every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() && event.event.is_empty() {
        return None;
    }
    event.data = data.join("\n");
    Some(event)
}

/// Everything needed to (re)open a subscription
#[derive(Clone)]
pub(crate) struct RealtimeTarget {
    pub http: reqwest::Client,
    /// Client without a total request timeout, for the long-lived stream
    pub stream_http: reqwest::Client,
    pub base_url: String,
    pub auth: Arc<AuthStore>,
    pub topic: String,
    pub connect_timeout: Duration,
}

struct Connection {
    stream: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    parser: SseParser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    client_id: String,
}

impl RealtimeTarget {
    async fn open(&self) -> Result<Connection, BackendError> {
        let response = self
            .stream_http
            .get(format!("{}/api/realtime", self.base_url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::Realtime(format!(
                "connect returned {}",
                response.status()
            )));
        }

        let mut connection = Connection {
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            parser: SseParser::default(),
        };

        let client_id = tokio::time::timeout(self.connect_timeout, connection.client_id())
            .await
            .map_err(|_| BackendError::Realtime("timed out waiting for PB_CONNECT".to_string()))??;

        let mut request = self
            .http
            .post(format!("{}/api/realtime", self.base_url))
            .json(&json!({ "clientId": client_id, "subscriptions": [self.topic] }));
        let token = self.auth.token();
        if !token.is_empty() {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Realtime(format!(
                "subscribe to {} returned {}",
                self.topic,
                response.status()
            )));
        }

        tracing::debug!("Realtime client {} subscribed to {}", client_id, self.topic);
        Ok(connection)
    }
}

impl Connection {
    async fn client_id(&mut self) -> Result<String, BackendError> {
        while let Some(chunk) = self.stream.next().await {
            for event in self.parser.push(&chunk?) {
                if event.event == CONNECT_EVENT {
                    let payload: ConnectPayload = serde_json::from_str(&event.data)
                        .map_err(|e| BackendError::Realtime(e.to_string()))?;
                    return Ok(payload.client_id);
                }
            }
        }
        Err(BackendError::Realtime(
            "stream closed before PB_CONNECT".to_string(),
        ))
    }

    /// Forward topic events until the stream ends or nobody listens.
    async fn forward(&mut self, topic: &str, sender: &broadcast::Sender<RecordEvent>) {
        loop {
            let chunk = match tokio::time::timeout(IDLE_CHECK, self.stream.next()).await {
                Err(_) => {
                    if sender.receiver_count() == 0 {
                        return;
                    }
                    continue;
                }
                Ok(None) => return,
                Ok(Some(Err(e))) => {
                    tracing::warn!("Realtime stream error: {}", e);
                    return;
                }
                Ok(Some(Ok(chunk))) => chunk,
            };

            for event in self.parser.push(&chunk) {
                if event.event != topic {
                    continue;
                }
                match serde_json::from_str::<RecordEvent>(&event.data) {
                    Ok(record) => {
                        if sender.send(record).is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring malformed {} event: {}", topic, e),
                }
            }
        }
    }
}

/// Open a subscription and keep it alive in a background task.
///
/// The first connection is made before returning so that failures reach the
/// caller.
pub(crate) async fn subscribe(
    target: RealtimeTarget,
) -> Result<broadcast::Receiver<RecordEvent>, BackendError> {
    let mut connection = target.open().await?;
    let (sender, receiver) = broadcast::channel(EVENT_CAPACITY);

    tokio::spawn(async move {
        loop {
            connection.forward(&target.topic, &sender).await;
            if sender.receiver_count() == 0 {
                break;
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
            if sender.receiver_count() == 0 {
                break;
            }
            match target.open().await {
                Ok(reopened) => {
                    tracing::info!("Realtime subscription to {} reconnected", target.topic);
                    connection = reopened;
                }
                Err(e) => {
                    tracing::warn!("Realtime reconnect to {} failed: {}", target.topic, e);
                    connection = Connection {
                        stream: futures::stream::empty().boxed(),
                        parser: SseParser::default(),
                    };
                }
            }
        }
        tracing::debug!("Realtime subscription to {} closed", target.topic);
    });

    Ok(receiver)
}
