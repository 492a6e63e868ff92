//! In-process relay on a loopback socket for exercising the socket adapters.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nostr_sdk::prelude::Event;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the relay answers a published `["EVENT", ev]`.
#[derive(Debug, Clone)]
pub enum OkReply {
    Accept,
    Reject(String),
    Silent,
}

pub struct LoopbackRelay {
    url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    server: JoinHandle<()>,
}

impl LoopbackRelay {
    /// Answers every REQ with `stored` followed by EOSE.
    pub async fn start(stored: Vec<Event>, ok: OkReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let frames = Arc::new(Mutex::new(Vec::new()));
        let stored = Arc::new(stored);

        let server = {
            let frames = frames.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, stored.clone(), ok.clone(), frames.clone()));
                }
            })
        };

        Self {
            url,
            frames,
            server,
        }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Every client frame received so far, in arrival order.
    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| f.get(0).and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Wait up to `limit` for a client frame labelled `label`.
    pub async fn wait_for(&self, label: &str, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.labels().iter().any(|l| l == label) {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for LoopbackRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn serve(
    stream: TcpStream,
    stored: Arc<Vec<Event>>,
    ok: OkReply,
    frames: Arc<Mutex<Vec<Value>>>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        frames.lock().push(frame.clone());

        let replies = match frame.get(0).and_then(Value::as_str) {
            Some("REQ") => {
                let sub_id = frame.get(1).cloned().unwrap_or(Value::Null);
                let mut out: Vec<Value> = stored
                    .iter()
                    .map(|event| json!(["EVENT", sub_id, event]))
                    .collect();
                out.push(json!(["EOSE", sub_id]));
                out
            }
            Some("EVENT") => {
                let id = frame
                    .get(1)
                    .and_then(|event| event.get("id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                match &ok {
                    OkReply::Accept => vec![json!(["OK", id, true, ""])],
                    OkReply::Reject(reason) => vec![json!(["OK", id, false, reason])],
                    OkReply::Silent => Vec::new(),
                }
            }
            _ => Vec::new(),
        };

        for reply in replies {
            if ws.send(Message::Text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}
