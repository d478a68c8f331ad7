use std::collections::{HashMap, HashSet};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::common::{MessageRow, PresenceEntry, PresenceState};
use crate::error::ChatError;

/// One frame of the channel protocol, both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

/// Change-notification filter requested at join time.
#[derive(Debug, Clone, Serialize)]
pub struct PostgresChange {
    pub event: String,
    pub schema: String,
    pub table: String,
}

impl PostgresChange {
    pub fn inserts(schema: &str, table: &str) -> Self {
        Self {
            event: "INSERT".to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }
}

/// Per-channel subscription config.
#[derive(Debug, Clone, Default)]
pub struct JoinConfig {
    /// Presence key for this connection; `None` joins without presence.
    pub presence_key: Option<String>,
    pub postgres_changes: Vec<PostgresChange>,
}

impl JoinConfig {
    fn payload(&self, access_token: Option<&str>) -> Value {
        let mut config = json!({
            "broadcast": { "self": false },
            "postgres_changes": self.postgres_changes,
        });
        if let Some(key) = &self.presence_key {
            config["presence"] = json!({ "key": key });
        }

        let mut payload = json!({ "config": config });
        if let Some(token) = access_token {
            payload["access_token"] = json!(token);
        }
        payload
    }
}

/// Typed event decoded from the socket.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// The server acknowledged the channel join.
    Subscribed { topic: String },
    /// Ephemeral broadcast fan-out from a connected peer.
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
    },
    /// Full presence snapshot after a sync or folded diff.
    PresenceSynced { topic: String, state: PresenceState },
    /// A row matching the join-time filter was inserted.
    RowInserted { topic: String, row: MessageRow },
    Closed,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PresenceGroup {
    #[serde(default)]
    metas: Vec<PresenceMeta>,
}

#[derive(Debug, Clone, Deserialize)]
struct PresenceMeta {
    phx_ref: String,
    #[serde(default)]
    online_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PresenceDiff {
    #[serde(default)]
    joins: HashMap<String, PresenceGroup>,
    #[serde(default)]
    leaves: HashMap<String, PresenceGroup>,
}

/// Server-shaped presence bookkeeping for one channel.
///
/// The protocol sends one full `presence_state` on join and `presence_diff`
/// afterwards; diffs are folded here so consumers only ever see full
/// snapshots (wholesale replace, the server is the source of truth).
#[derive(Debug, Default)]
struct PresenceTracker {
    groups: HashMap<String, PresenceGroup>,
}

impl PresenceTracker {
    fn replace(&mut self, groups: HashMap<String, PresenceGroup>) {
        self.groups = groups;
    }

    fn apply_diff(&mut self, diff: PresenceDiff) {
        for (key, group) in diff.joins {
            self.groups.entry(key).or_default().metas.extend(group.metas);
        }
        for (key, group) in diff.leaves {
            let left: HashSet<String> =
                group.metas.into_iter().map(|meta| meta.phx_ref).collect();
            if let Some(existing) = self.groups.get_mut(&key) {
                existing.metas.retain(|meta| !left.contains(&meta.phx_ref));
                if existing.metas.is_empty() {
                    self.groups.remove(&key);
                }
            }
        }
    }

    fn snapshot(&self) -> PresenceState {
        self.groups
            .iter()
            .map(|(key, group)| {
                let entries = group
                    .metas
                    .iter()
                    .map(|meta| PresenceEntry {
                        online_at: meta.online_at.clone().unwrap_or_default(),
                    })
                    .collect();
                (key.clone(), entries)
            })
            .collect()
    }
}

/// Frame decoding separated from socket ownership so it can be exercised
/// without a connection.
#[derive(Debug, Default)]
struct ChannelDecoder {
    /// Topics currently joined; frames for anything else are late arrivals
    /// from a left channel and are dropped.
    topics: HashSet<String>,
    pending_joins: HashSet<String>,
    presence: HashMap<String, PresenceTracker>,
}

impl ChannelDecoder {
    fn join_started(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
        self.pending_joins.insert(topic.to_string());
    }

    fn left(&mut self, topic: &str) {
        self.topics.remove(topic);
        self.pending_joins.remove(topic);
        self.presence.remove(topic);
    }

    fn decode(&mut self, text: &str) -> Result<Option<RealtimeEvent>, ChatError> {
        let frame: Frame = serde_json::from_str(text)?;

        if frame.topic != "phoenix" && !self.topics.contains(&frame.topic) {
            log::debug!("Dropping frame for left channel {}", frame.topic);
            return Ok(None);
        }

        match frame.event.as_str() {
            "phx_reply" => {
                let status = frame.payload["status"].as_str().unwrap_or_default();
                if status != "ok" {
                    return Err(ChatError::Realtime(format!(
                        "channel {} reply: {}",
                        frame.topic, frame.payload["response"]
                    )));
                }
                if self.pending_joins.remove(&frame.topic) {
                    return Ok(Some(RealtimeEvent::Subscribed { topic: frame.topic }));
                }
                Ok(None)
            }
            "presence_state" => {
                let groups: HashMap<String, PresenceGroup> =
                    serde_json::from_value(frame.payload)?;
                let tracker = self.presence.entry(frame.topic.clone()).or_default();
                tracker.replace(groups);
                Ok(Some(RealtimeEvent::PresenceSynced {
                    topic: frame.topic,
                    state: tracker.snapshot(),
                }))
            }
            "presence_diff" => {
                let diff: PresenceDiff = serde_json::from_value(frame.payload)?;
                let tracker = self.presence.entry(frame.topic.clone()).or_default();
                tracker.apply_diff(diff);
                Ok(Some(RealtimeEvent::PresenceSynced {
                    topic: frame.topic,
                    state: tracker.snapshot(),
                }))
            }
            "broadcast" => {
                let event = frame.payload["event"].as_str().unwrap_or_default().to_string();
                let payload = frame.payload["payload"].clone();
                Ok(Some(RealtimeEvent::Broadcast {
                    topic: frame.topic,
                    event,
                    payload,
                }))
            }
            "postgres_changes" => {
                let data = &frame.payload["data"];
                if data["type"].as_str() != Some("INSERT") {
                    return Ok(None);
                }
                let row: MessageRow = serde_json::from_value(data["record"].clone())?;
                Ok(Some(RealtimeEvent::RowInserted {
                    topic: frame.topic,
                    row,
                }))
            }
            "phx_close" => {
                self.left(&frame.topic);
                Ok(None)
            }
            "phx_error" => {
                log::warn!("Channel {} errored; server will drop it", frame.topic);
                Ok(None)
            }
            "system" => {
                log::debug!("System frame on {}: {}", frame.topic, frame.payload);
                Ok(None)
            }
            other => {
                log::debug!("Ignoring unknown frame event `{other}`");
                Ok(None)
            }
        }
    }
}

/// Socket endpoint for a project base URL.
fn ws_endpoint(base_url: &str, anon_key: &str) -> String {
    let ws_base = base_url.replacen("http", "ws", 1);
    format!("{ws_base}/realtime/v1/websocket?apikey={anon_key}&vsn=1.0.0")
}

/// One websocket connection multiplexing named channels.
pub struct RealtimeConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    decoder: ChannelDecoder,
    access_token: Option<String>,
    reference: u64,
}

impl RealtimeConnection {
    pub async fn connect(
        base_url: &str,
        anon_key: &str,
        access_token: Option<String>,
    ) -> Result<Self, ChatError> {
        let url = ws_endpoint(base_url, anon_key);
        let (ws, _) = connect_async(url.as_str()).await?;
        log::info!("Realtime socket connected");
        Ok(Self {
            ws,
            decoder: ChannelDecoder::default(),
            access_token,
            reference: 0,
        })
    }

    fn next_reference(&mut self) -> Option<String> {
        self.reference += 1;
        Some(self.reference.to_string())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), ChatError> {
        let text = serde_json::to_string(&frame)?;
        self.ws.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    /// Start a channel subscription. The server confirms asynchronously with
    /// a `Subscribed` event from `next_event`.
    pub async fn join(&mut self, topic: &str, config: &JoinConfig) -> Result<(), ChatError> {
        let payload = config.payload(self.access_token.as_deref());
        self.decoder.join_started(topic);
        let reference = self.next_reference();
        self.send_frame(Frame {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            reference,
        })
        .await
    }

    pub async fn leave(&mut self, topic: &str) -> Result<(), ChatError> {
        self.decoder.left(topic);
        let reference = self.next_reference();
        self.send_frame(Frame {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference,
        })
        .await
    }

    /// Announce this connection's presence on a joined channel.
    pub async fn track(&mut self, topic: &str, online_at: &str) -> Result<(), ChatError> {
        let reference = self.next_reference();
        self.send_frame(Frame {
            topic: topic.to_string(),
            event: "presence".to_string(),
            payload: json!({
                "type": "presence",
                "event": "track",
                "payload": { "online_at": online_at },
            }),
            reference,
        })
        .await
    }

    /// Publish an ephemeral broadcast to the channel's connected peers.
    pub async fn broadcast(
        &mut self,
        topic: &str,
        event: &str,
        payload: &Value,
    ) -> Result<(), ChatError> {
        let reference = self.next_reference();
        self.send_frame(Frame {
            topic: topic.to_string(),
            event: "broadcast".to_string(),
            payload: json!({
                "type": "broadcast",
                "event": event,
                "payload": payload,
            }),
            reference,
        })
        .await
    }

    /// Keep the socket alive; the server drops silent connections.
    pub async fn heartbeat(&mut self) -> Result<(), ChatError> {
        let reference = self.next_reference();
        self.send_frame(Frame {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference,
        })
        .await
    }

    /// Next decoded event; resolves to `Closed` when the socket ends.
    pub async fn next_event(&mut self) -> Result<RealtimeEvent, ChatError> {
        loop {
            let Some(frame) = self.ws.next().await else {
                return Ok(RealtimeEvent::Closed);
            };
            match frame? {
                WsMessage::Text(text) => {
                    if let Some(event) = self.decoder.decode(&text)? {
                        return Ok(event);
                    }
                }
                WsMessage::Ping(data) => self.ws.send(WsMessage::Pong(data)).await?,
                WsMessage::Close(_) => return Ok(RealtimeEvent::Closed),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(topics: &[&str]) -> ChannelDecoder {
        let mut decoder = ChannelDecoder::default();
        for topic in topics {
            decoder.join_started(topic);
        }
        decoder
    }

    #[test]
    fn join_reply_surfaces_once_as_subscribed() {
        let mut decoder = joined(&["realtime:room_demo"]);
        let reply = r#"{"topic":"realtime:room_demo","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;

        match decoder.decode(reply).unwrap() {
            Some(RealtimeEvent::Subscribed { topic }) => assert_eq!(topic, "realtime:room_demo"),
            other => panic!("expected Subscribed, got {other:?}"),
        }
        // Replies to later pushes on the same topic are acks, not joins.
        assert!(decoder.decode(reply).unwrap().is_none());
    }

    #[test]
    fn frames_for_left_channels_are_dropped() {
        let mut decoder = joined(&["realtime:room_demo"]);
        decoder.left("realtime:room_demo");

        let frame = r#"{"topic":"realtime:room_demo","event":"broadcast","payload":{"event":"message","payload":{}},"ref":null}"#;
        assert!(decoder.decode(frame).unwrap().is_none());
    }

    #[test]
    fn presence_state_replaces_and_diff_folds() {
        let mut decoder = joined(&["realtime:room_demo"]);

        let state = r#"{"topic":"realtime:room_demo","event":"presence_state","payload":{
            "u1":{"metas":[{"phx_ref":"a","online_at":"t1"},{"phx_ref":"b","online_at":"t2"}]},
            "u2":{"metas":[{"phx_ref":"c","online_at":"t3"}]}
        },"ref":null}"#;
        let Some(RealtimeEvent::PresenceSynced { state: snapshot, .. }) =
            decoder.decode(state).unwrap()
        else {
            panic!("expected PresenceSynced");
        };
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["u1"].len(), 2);

        // u1 drops one connection, u2 drops its only one, u3 joins.
        let diff = r#"{"topic":"realtime:room_demo","event":"presence_diff","payload":{
            "joins":{"u3":{"metas":[{"phx_ref":"d","online_at":"t4"}]}},
            "leaves":{"u1":{"metas":[{"phx_ref":"a"}]},"u2":{"metas":[{"phx_ref":"c"}]}}
        },"ref":null}"#;
        let Some(RealtimeEvent::PresenceSynced { state: snapshot, .. }) =
            decoder.decode(diff).unwrap()
        else {
            panic!("expected PresenceSynced");
        };
        assert_eq!(snapshot["u1"].len(), 1);
        assert_eq!(snapshot["u1"][0].online_at, "t2");
        assert!(!snapshot.contains_key("u2"));
        assert_eq!(snapshot["u3"][0].online_at, "t4");
    }

    #[test]
    fn broadcast_and_insert_frames_decode() {
        let mut decoder = joined(&["realtime:room_demo", "realtime:db-messages"]);

        let broadcast = r#"{"topic":"realtime:room_demo","event":"broadcast","payload":{
            "type":"broadcast","event":"message",
            "payload":{"id":"m1","userId":"u1","email":"a@example.com","text":"hi","ts":1000}
        },"ref":null}"#;
        let Some(RealtimeEvent::Broadcast { event, payload, .. }) =
            decoder.decode(broadcast).unwrap()
        else {
            panic!("expected Broadcast");
        };
        assert_eq!(event, "message");
        assert_eq!(payload["id"], "m1");

        let insert = r#"{"topic":"realtime:db-messages","event":"postgres_changes","payload":{
            "ids":[1],
            "data":{"type":"INSERT","schema":"public","table":"messages",
                    "record":{"id":9,"user_id":"u1","email":null,"text":"hi","created_at":"2026-01-02T03:04:05Z"}}
        },"ref":null}"#;
        let Some(RealtimeEvent::RowInserted { row, .. }) = decoder.decode(insert).unwrap() else {
            panic!("expected RowInserted");
        };
        assert_eq!(row.id, "9");
        assert_eq!(row.text, "hi");
    }

    #[test]
    fn ws_endpoint_switches_scheme() {
        assert_eq!(
            ws_endpoint("https://xyz.supabase.co", "key"),
            "wss://xyz.supabase.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
        assert_eq!(
            ws_endpoint("http://localhost:54321", "key"),
            "ws://localhost:54321/realtime/v1/websocket?apikey=key&vsn=1.0.0"
        );
    }
}
