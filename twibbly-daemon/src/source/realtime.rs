//! Realtime source: insert events over the store's Phoenix websocket
//!
//! 1. Connect to `{url}/realtime/v1/websocket`
//! 2. Join `realtime:{table}_channel` with a postgres_changes INSERT filter
//! 3. Catch up on entries inserted while disconnected
//! 4. Forward each INSERT as a one-entry batch
//! 5. Heartbeat every 25 s; reconnect with exponential backoff on failure

use super::{BatchOrigin, CandidateBatch, ChangeSource};
use crate::core::StoreConfig;
use crate::store::{NameEntry, RecordStore};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Initial reconnect delay
const INITIAL_RECONNECT_DELAY_SECS: u64 = 1;
/// Max reconnect delay
const MAX_RECONNECT_DELAY_SECS: u64 = 60;
/// Phoenix heartbeat interval
const HEARTBEAT_INTERVAL_SECS: u64 = 25;

const PHOENIX_TOPIC: &str = "phoenix";

/// Phoenix channel frame (protocol 1.0.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

impl PhoenixMessage {
    fn reply_status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }
}

/// How a websocket session ended
enum SessionEnd {
    Shutdown,
    Disconnected { joined: bool },
}

pub struct RealtimeSource {
    config: StoreConfig,
    /// Used for the catch-up scan after each join
    store: Option<Arc<dyn RecordStore>>,
    next_ref: u64,
}

impl RealtimeSource {
    pub fn new(config: StoreConfig, store: Option<Arc<dyn RecordStore>>) -> Self {
        Self {
            config,
            store,
            next_ref: 0,
        }
    }

    fn topic(&self) -> String {
        format!("realtime:{}_channel", self.config.table)
    }

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    /// Run a single websocket session until disconnect or shutdown
    async fn run_session(
        &mut self,
        tx: &mpsc::Sender<CandidateBatch>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let url = websocket_url(&self.config.url, &self.config.key);
        let ws = tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    tracing::warn!(error = %e, "Realtime connection failed");
                    return SessionEnd::Disconnected { joined: false };
                }
            },
        };
        tracing::info!(topic = %self.topic(), "Realtime websocket connected");

        let (mut ws_sink, mut ws_stream) = ws.split();

        let join_ref = self.make_ref();
        let join = join_message(&self.topic(), &self.config, &join_ref);
        if let Err(e) = send_json(&mut ws_sink, &join).await {
            tracing::warn!(error = %e, "Failed to send channel join");
            return SessionEnd::Disconnected { joined: false };
        }

        let mut joined = false;
        let mut pending_heartbeat: Option<String> = None;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        heartbeat.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = ws_sink.close().await;
                    return SessionEnd::Shutdown;
                }

                _ = heartbeat.tick() => {
                    if pending_heartbeat.is_some() {
                        tracing::warn!("Heartbeat not acknowledged, reconnecting");
                        return SessionEnd::Disconnected { joined };
                    }
                    let hb_ref = self.make_ref();
                    let msg = PhoenixMessage {
                        topic: PHOENIX_TOPIC.into(),
                        event: "heartbeat".into(),
                        payload: json!({}),
                        reference: Some(hb_ref.clone()),
                    };
                    if send_json(&mut ws_sink, &msg).await.is_err() {
                        tracing::warn!("Heartbeat send failed, reconnecting");
                        return SessionEnd::Disconnected { joined };
                    }
                    pending_heartbeat = Some(hb_ref);
                }

                msg = ws_stream.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_sink.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Realtime websocket closed by server");
                            return SessionEnd::Disconnected { joined };
                        }
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "Realtime websocket error");
                            return SessionEnd::Disconnected { joined };
                        }
                        None => {
                            tracing::info!("Realtime websocket stream ended");
                            return SessionEnd::Disconnected { joined };
                        }
                        _ => continue, // Binary, Pong
                    };

                    let msg: PhoenixMessage = match serde_json::from_str(&text) {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::debug!(error = %e, "Ignoring undecodable frame");
                            continue;
                        }
                    };

                    match msg.event.as_str() {
                        "phx_reply" if msg.reference.as_deref() == Some(join_ref.as_str()) => {
                            if msg.reply_status() != Some("ok") {
                                tracing::error!(payload = %msg.payload, "Channel join rejected");
                                return SessionEnd::Disconnected { joined };
                            }
                            joined = true;
                            tracing::info!("Listening for new name entries");
                            if !self.catch_up(tx).await {
                                return SessionEnd::Shutdown;
                            }
                        }
                        "phx_reply" if msg.topic == PHOENIX_TOPIC => {
                            if msg.reference == pending_heartbeat {
                                pending_heartbeat = None;
                            }
                        }
                        "phx_error" | "phx_close" => {
                            tracing::warn!(event = %msg.event, "Channel closed");
                            return SessionEnd::Disconnected { joined };
                        }
                        "system" if msg.reply_status() == Some("error") => {
                            tracing::error!(payload = %msg.payload, "Realtime subscription error");
                            return SessionEnd::Disconnected { joined };
                        }
                        "postgres_changes" => {
                            let Some(entry) = decode_insert(&msg) else { continue };
                            tracing::info!(
                                entry_id = %entry.id,
                                first_name = %entry.first_name,
                                last_name = %entry.last_name,
                                "Insert event received"
                            );
                            let batch = CandidateBatch::new(BatchOrigin::Push, vec![entry]);
                            if tx.send(batch).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Queue entries missed while disconnected. False if the coordinator is gone.
    async fn catch_up(&self, tx: &mpsc::Sender<CandidateBatch>) -> bool {
        let Some(store) = &self.store else {
            return true;
        };
        match store.fetch_unprinted().await {
            Ok(entries) if entries.is_empty() => true,
            Ok(entries) => {
                tracing::info!(count = entries.len(), "Catching up on unprinted entries");
                tx.send(CandidateBatch::new(BatchOrigin::CatchUp, entries))
                    .await
                    .is_ok()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Catch-up query failed");
                true
            }
        }
    }
}

#[async_trait]
impl ChangeSource for RealtimeSource {
    fn name(&self) -> &'static str {
        "realtime"
    }

    async fn run(
        mut self: Box<Self>,
        tx: mpsc::Sender<CandidateBatch>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(topic = %self.topic(), "Realtime source started");
        let mut reconnect_delay = Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS);

        loop {
            match self.run_session(&tx, &shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Disconnected { joined } => {
                    if joined {
                        reconnect_delay = Duration::from_secs(INITIAL_RECONNECT_DELAY_SECS);
                    }
                }
            }

            tracing::info!(delay_secs = reconnect_delay.as_secs(), "Reconnecting realtime channel");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(reconnect_delay) => {}
            }
            reconnect_delay =
                (reconnect_delay * 2).min(Duration::from_secs(MAX_RECONNECT_DELAY_SECS));
        }

        tracing::info!("Realtime source stopped");
    }
}

fn websocket_url(base_url: &str, key: &str) -> String {
    let ws_base = base_url
        .trim_end_matches('/')
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    format!("{ws_base}/realtime/v1/websocket?apikey={key}&vsn=1.0.0")
}

fn join_message(topic: &str, config: &StoreConfig, join_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "INSERT",
                    "schema": "public",
                    "table": config.table,
                    "filter": format!("session_id=eq.{}", config.session_id),
                }],
                "private": false,
            },
            "access_token": config.key,
        }),
        reference: Some(join_ref.to_string()),
    }
}

fn decode_insert(msg: &PhoenixMessage) -> Option<NameEntry> {
    let data = msg.payload.get("data")?;
    if data.get("type").and_then(Value::as_str) != Some("INSERT") {
        return None;
    }
    match serde_json::from_value(data.get("record")?.clone()) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!(error = %e, "Insert event with unreadable record");
            None
        }
    }
}

async fn send_json<S>(sink: &mut S, msg: &PhoenixMessage) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| e.to_string())
}
