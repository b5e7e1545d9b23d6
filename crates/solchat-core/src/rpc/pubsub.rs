//! Live log subscription over WebSocket.
//!
//! Opens a `logsSubscribe` stream for transactions mentioning the program
//! and forwards notifications through a channel. The reader runs in a
//! background task owned by [`LogSubscription`]; dropping or closing the
//! subscription aborts the task and tears the connection down.

use std::str::FromStr;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{ChatError, ChatResult};
use crate::types::{Pubkey, Signature};

/// Channel capacity for buffered notifications
const NOTIFICATION_BUFFER: usize = 256;

/// One `logsNotification` payload.
#[derive(Debug, Clone)]
pub struct LogNotification {
    /// Signature of the transaction that produced these logs
    pub signature: Signature,
    /// Log message lines
    pub logs: Vec<String>,
    /// Whether the transaction failed
    pub err: bool,
}

/// Handle to a live log stream.
///
/// Notifications arrive via [`recv`](Self::recv); [`close`](Self::close)
/// (or drop) aborts the background reader, after which `recv` drains any
/// buffered notifications and then returns `None`.
pub struct LogSubscription {
    receiver: mpsc::Receiver<LogNotification>,
    task: Option<JoinHandle<()>>,
}

impl LogSubscription {
    /// Assemble from a notification channel and an optional background
    /// task to abort on close. In-memory gateways pass `None`.
    pub fn new(receiver: mpsc::Receiver<LogNotification>, task: Option<JoinHandle<()>>) -> Self {
        Self {
            receiver,
            task,
        }
    }

    /// Receive the next notification; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<LogNotification> {
        self.receiver.recv().await
    }

    /// Cancel the subscription.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.receiver.close();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to `ws_url` and subscribe to logs mentioning `mentions` at
/// confirmed commitment.
pub async fn subscribe(ws_url: &str, mentions: &Pubkey) -> ChatResult<LogSubscription> {
    let (stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| ChatError::Subscription(format!("connect to {}: {}", ws_url, e)))?;
    let (mut write, mut read) = stream.split();

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "logsSubscribe",
        "params": [
            {"mentions": [mentions.to_string()]},
            {"commitment": "confirmed"},
        ],
    });
    write
        .send(Message::Text(request.to_string()))
        .await
        .map_err(|e| ChatError::Subscription(format!("subscribe request: {}", e)))?;

    let (sender, receiver) = mpsc::channel(NOTIFICATION_BUFFER);

    let task = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(notification) = parse_notification(&text) {
                        if sender.send(notification).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if write.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("log subscription closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "log subscription transport error");
                    break;
                }
            }
        }
    });

    Ok(LogSubscription::new(receiver, Some(task)))
}

/// Parse one WebSocket text payload into a notification. Subscription
/// confirmations and unrelated frames yield `None`.
fn parse_notification(text: &str) -> Option<LogNotification> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value["method"].as_str()? != "logsNotification" {
        return None;
    }

    let result = &value["params"]["result"]["value"];
    let signature = Signature::from_str(result["signature"].as_str()?).ok()?;
    let logs = result["logs"]
        .as_array()?
        .iter()
        .filter_map(|l| l.as_str().map(str::to_string))
        .collect();

    Some(LogNotification {
        signature,
        logs,
        err: !result["err"].is_null(),
    })
}
