//! Streaming surface
//!
//! Each accepted WebSocket becomes a session with a bounded outbound
//! queue registered at the hub. Requests arrive as enveloped messages and
//! are answered with the request id echoed; subscriptions start per-reader
//! pollers that emit edge-triggered events into the same queue.

pub mod envelope;
pub mod hub;

mod subscription;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use nfc_agent_core::{Error, NdefMessage, NdefRecord, Result};
use nfc_agent_tags::{list_readers, DataType};

use crate::logring::Category;
use crate::state::AppState;
use crate::supported::supported_readers;
use crate::version::version_info;

use envelope::{error_message, response_message, WsMessage};
use subscription::{spawn_poller, Subscription, DEFAULT_POLL_PERIOD, MIN_POLL_PERIOD};

/// Upgrade handler mounted on the router
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

/// Reader addressing shared by most payloads
#[derive(Debug, Deserialize)]
struct ReaderRef {
    reader_index: Option<usize>,
    reader_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscribePayload {
    #[serde(flatten)]
    reader: ReaderRef,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WriteCardPayload {
    #[serde(flatten)]
    reader: ReaderRef,
    #[serde(rename = "dataType")]
    data_type: String,
    data: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LockPayload {
    #[serde(flatten)]
    reader: ReaderRef,
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Deserialize)]
struct PasswordPayload {
    #[serde(flatten)]
    reader: ReaderRef,
    password: String,
    pack: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsPayload {
    #[serde(flatten)]
    reader: ReaderRef,
    records: Vec<RecordSpec>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecordSpec {
    #[serde(rename = "type")]
    record_type: String,
    data: String,
}

struct Session {
    state: AppState,
    out: mpsc::Sender<String>,
    closer: Arc<Notify>,
    subscriptions: HashMap<String, Subscription>,
}

async fn run_session(socket: WebSocket, state: AppState) {
    let (session_id, mut outbound, closer) = state.hub.register();
    let Some(out) = state.hub.sender(session_id) else {
        return;
    };
    state
        .logs
        .debug(Category::Websocket, "session opened", None);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session {
        state: state.clone(),
        out,
        closer: Arc::clone(&closer),
        subscriptions: HashMap::new(),
    };

    loop {
        tokio::select! {
            _ = closer.notified() => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(message) => session.handle_message(message).await,
                    Err(e) => session.send_error("", format!("validation: invalid message: {e}")),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read failed");
                    break;
                }
            },
        }
    }

    // No events may be emitted after close: stop every poller first.
    for (_, subscription) in session.subscriptions.drain() {
        subscription.stop();
    }
    state.hub.unregister(session_id);
    writer.abort();
    state
        .logs
        .debug(Category::Websocket, "session closed", None);
}

impl Session {
    fn send(&self, message: String) {
        if self.out.try_send(message).is_err() {
            self.closer.notify_one();
        }
    }

    fn send_response(&self, id: &str, msg_type: &str, payload: Value) {
        self.send(response_message(id, msg_type, payload));
    }

    fn send_error(&self, id: &str, error: String) {
        self.send(error_message(id, error));
    }

    fn send_result(&self, id: &str, msg_type: &str, payload: Value, result: Result<()>) {
        match result {
            Ok(()) => self.send_response(id, msg_type, payload),
            Err(e) => self.send_error(id, format!("{}: {}", e.kind(), e.message())),
        }
    }

    async fn handle_message(&mut self, message: WsMessage) {
        let id = message.id.clone();
        match message.msg_type.as_str() {
            "list_readers" => self.handle_list_readers(&id).await,
            "version" => self.send_response(&id, "version", json!(version_info())),
            "health" => self.send_response(&id, "health", json!({ "status": "ok" })),
            "supported_readers" => self.send_response(
                &id,
                "supported_readers",
                json!({ "readers": supported_readers() }),
            ),
            "read_card" => self.handle_read_card(&id, message.payload).await,
            "write_card" => self.handle_write_card(&id, message.payload).await,
            "write_records" => self.handle_write_records(&id, message.payload).await,
            "lock_card" => self.handle_lock_card(&id, message.payload).await,
            "set_password" => self.handle_set_password(&id, message.payload).await,
            "clear_password" => self.handle_clear_password(&id, message.payload).await,
            "subscribe" => self.handle_subscribe(&id, message.payload).await,
            "unsubscribe" => self.handle_unsubscribe(&id, message.payload).await,
            other => {
                self.send_error(&id, format!("unknown message type: {other}"));
            }
        }
    }

    async fn handle_list_readers(&self, id: &str) {
        let readers = list_readers(self.state.service.lab()).await;
        self.send_response(id, "readers", json!({ "readers": readers }));
    }

    /// Parse a payload, reporting schema violations as validation errors.
    fn parse_payload<T: serde::de::DeserializeOwned>(
        &self,
        payload: Option<Value>,
    ) -> Result<T> {
        let payload = payload.unwrap_or(Value::Null);
        serde_json::from_value(payload)
            .map_err(|e| Error::validation(format!("invalid payload: {e}")))
    }

    /// Resolve a reader reference against a fresh enumeration.
    async fn resolve_reader(&self, reader: &ReaderRef) -> Result<String> {
        if let Some(name) = &reader.reader_name {
            return Ok(name.clone());
        }
        let index = reader
            .reader_index
            .ok_or_else(|| Error::validation("reader_index or reader_name required"))?;
        let readers = list_readers(self.state.service.lab()).await;
        readers
            .get(index)
            .map(|r| r.name.clone())
            .ok_or_else(|| Error::validation(format!("reader index {index} out of range")))
    }

    async fn handle_read_card(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let reader_ref: ReaderRef = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&reader_ref).await?;
            self.state.service.identify(&reader).await
        }
        .await;

        match outcome {
            Ok(card) => self.send_response(id, "card", json!({ "card": card })),
            Err(e) => self.send_error(id, format!("{}: {}", e.kind(), e.message())),
        }
    }

    async fn handle_write_card(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: WriteCardPayload = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&payload.reader).await?;
            let data_type: DataType = payload.data_type.parse()?;
            let data = decode_write_data(data_type, payload.data.as_deref(), payload.url.as_deref())?;
            self.state
                .service
                .write(&reader, data_type, &data, payload.url.as_deref())
                .await?;
            self.state.logs.info(
                Category::Card,
                "card written",
                Some(json!({ "reader": reader })),
            );
            Ok(())
        }
        .await;
        self.send_result(id, "card_written", json!({}), outcome);
    }

    async fn handle_write_records(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: RecordsPayload = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&payload.reader).await?;
            let message = build_records_message(&payload.records)?;
            self.state.service.write_records(&reader, message).await
        }
        .await;
        self.send_result(id, "records_written", json!({}), outcome);
    }

    async fn handle_lock_card(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: LockPayload = self.parse_payload(payload)?;
            if !payload.confirm {
                return Err(Error::validation(
                    "locking is irreversible; pass confirm=true to proceed",
                ));
            }
            let reader = self.resolve_reader(&payload.reader).await?;
            self.state.service.lock(&reader).await?;
            self.state.logs.warn(
                Category::Card,
                "card permanently locked",
                Some(json!({ "reader": reader })),
            );
            Ok(())
        }
        .await;
        self.send_result(id, "card_locked", json!({}), outcome);
    }

    async fn handle_set_password(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: PasswordPayload = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&payload.reader).await?;
            let password = parse_password(&payload.password)?;
            let pack = parse_pack(payload.pack.as_deref())?;
            self.state.service.set_password(&reader, password, pack).await
        }
        .await;
        self.send_result(id, "password_set", json!({}), outcome);
    }

    async fn handle_clear_password(&self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: PasswordPayload = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&payload.reader).await?;
            let password = parse_password(&payload.password)?;
            self.state.service.clear_password(&reader, password).await
        }
        .await;
        self.send_result(id, "password_cleared", json!({}), outcome);
    }

    async fn handle_subscribe(&mut self, id: &str, payload: Option<Value>) {
        let outcome: Result<(String, Duration)> = async {
            let payload: SubscribePayload = self.parse_payload(payload)?;
            let reader = self.resolve_reader(&payload.reader).await?;
            let period = payload
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_PERIOD)
                .max(MIN_POLL_PERIOD);
            Ok((reader, period))
        }
        .await;

        match outcome {
            Ok((reader, period)) => {
                // Replacing an existing subscription resets its state: the
                // old poller stops and the last-observed UID starts empty,
                // so a present card re-emits an arrival.
                if let Some(existing) = self.subscriptions.remove(&reader) {
                    existing.stop();
                }
                let subscription = spawn_poller(
                    Arc::clone(&self.state.service),
                    reader.clone(),
                    period,
                    self.out.clone(),
                    Arc::clone(&self.closer),
                );
                self.subscriptions.insert(reader.clone(), subscription);
                self.send_response(id, "subscribed", json!({ "reader_name": reader }));
            }
            Err(e) => self.send_error(id, format!("{}: {}", e.kind(), e.message())),
        }
    }

    async fn handle_unsubscribe(&mut self, id: &str, payload: Option<Value>) {
        let outcome = async {
            let payload: SubscribePayload = self.parse_payload(payload)?;
            self.resolve_reader(&payload.reader).await
        }
        .await;

        match outcome {
            Ok(reader) => {
                if let Some(subscription) = self.subscriptions.remove(&reader) {
                    subscription.stop();
                }
                self.send_response(id, "unsubscribed", json!({ "reader_name": reader }));
            }
            Err(e) => self.send_error(id, format!("{}: {}", e.kind(), e.message())),
        }
    }
}

/// Decode the write payload body for its data type. Binary payloads are
/// hex strings; everything else is UTF-8 text.
pub(crate) fn decode_write_data(
    data_type: DataType,
    data: Option<&str>,
    url: Option<&str>,
) -> Result<Vec<u8>> {
    match data_type {
        DataType::Url => {
            let content = url
                .or(data)
                .ok_or_else(|| Error::validation("url payload requires url or data"))?;
            Ok(content.as_bytes().to_vec())
        }
        DataType::Binary => {
            let data = data.ok_or_else(|| Error::validation("data is required"))?;
            hex::decode(data).map_err(|_| Error::validation("binary data must be hex"))
        }
        DataType::Text | DataType::Json => {
            let data = data.ok_or_else(|| Error::validation("data is required"))?;
            Ok(data.as_bytes().to_vec())
        }
    }
}

/// Build an NDEF message from record specs.
pub(crate) fn build_records_message(records: &[RecordSpec]) -> Result<NdefMessage> {
    if records.is_empty() {
        return Err(Error::validation("records must not be empty"));
    }
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let built = match record.record_type.as_str() {
            "url" => NdefRecord::uri(&record.data),
            "text" => NdefRecord::text(&record.data),
            "json" => NdefRecord::mime("application/json", record.data.as_bytes().to_vec()),
            "binary" => {
                let bytes = hex::decode(&record.data)
                    .map_err(|_| Error::validation("binary record data must be hex"))?;
                NdefRecord::mime("application/octet-stream", bytes)
            }
            other => {
                return Err(Error::validation(format!("unknown record type: {other}")));
            }
        };
        out.push(built);
    }
    NdefMessage::new(out).map_err(|e| Error::validation(e.to_string()))
}

/// An 8-hex-character password becomes 4 bytes.
pub(crate) fn parse_password(password: &str) -> Result<[u8; 4]> {
    let bytes = hex::decode(password)
        .map_err(|_| Error::validation("password must be 8 hex characters"))?;
    bytes
        .try_into()
        .map_err(|_| Error::validation("password must be 8 hex characters"))
}

/// A 4-hex-character PACK becomes 2 bytes; absent means zero.
pub(crate) fn parse_pack(pack: Option<&str>) -> Result<[u8; 2]> {
    let Some(pack) = pack else {
        return Ok([0u8; 2]);
    };
    let bytes =
        hex::decode(pack).map_err(|_| Error::validation("pack must be 4 hex characters"))?;
    bytes
        .try_into()
        .map_err(|_| Error::validation("pack must be 4 hex characters"))
}
