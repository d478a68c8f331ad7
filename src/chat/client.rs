use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::backend::realtime::{JoinConfig, PostgresChange, RealtimeConnection, RealtimeEvent};
use crate::backend::table::MessageStore;
use crate::chat::avatar::AvatarCache;
use crate::chat::room::RoomState;
use crate::common::types::{generate_message_id, now_ms};
use crate::common::{ChatCommand, ChatEvent, ChatMessage, MessageRow};
use crate::error::ChatError;

/// Broadcast event name shared by all clients of the room.
pub const BROADCAST_EVENT: &str = "message";

const HEARTBEAT_SECS: u64 = 25;

/// Broadcast half of the send path, split out so the send path can be
/// exercised without a socket.
#[async_trait]
pub trait RoomTransport: Send {
    async fn publish(&mut self, topic: &str, message: &ChatMessage) -> Result<(), ChatError>;
}

#[async_trait]
impl RoomTransport for RealtimeConnection {
    async fn publish(&mut self, topic: &str, message: &ChatMessage) -> Result<(), ChatError> {
        self.broadcast(topic, BROADCAST_EVENT, &serde_json::to_value(message)?)
            .await
    }
}

/// Send path: one broadcast publish, then one durable row insert (the table
/// assigns its own id and timestamp).
///
/// The outgoing message is NOT appended locally; one of the two channels
/// echoes it back, which is what gives every participant, sender included,
/// the same de-duplicated view.
pub async fn deliver_message<T, S>(
    transport: &mut T,
    store: &S,
    topic: &str,
    user_id: &str,
    email: Option<&str>,
    text: &str,
) -> Result<ChatMessage, ChatError>
where
    T: RoomTransport + ?Sized,
    S: MessageStore + ?Sized,
{
    let message = ChatMessage {
        id: generate_message_id(),
        user_id: user_id.to_string(),
        email: email.map(str::to_string),
        text: text.to_string(),
        ts: now_ms(),
        avatar_url: None,
    };

    transport.publish(topic, &message).await?;
    store.insert_message(user_id, email, text).await?;
    Ok(message)
}

/// Merge one incoming message from either channel: drop known ids, enrich
/// the rest with an avatar and surface them.
pub(crate) async fn merge_incoming(
    room: &mut RoomState,
    cache: &AvatarCache,
    events: &mpsc::Sender<ChatEvent>,
    mut message: ChatMessage,
) {
    if room.contains(&message.id) {
        return;
    }
    message.avatar_url = cache.resolve(&message.user_id).await;
    if room.push_unique(message.clone()) {
        let _ = events.send(ChatEvent::MessageReceived(message)).await;
    }
}

/// Load the most recent persisted messages: fetched newest-first, shown
/// oldest-first, avatars resolved in parallel so the load waits for the
/// slowest single lookup instead of the sum.
pub(crate) async fn load_history<S>(
    store: &S,
    cache: &AvatarCache,
    room: &mut RoomState,
    events: &mpsc::Sender<ChatEvent>,
    limit: usize,
) -> Result<(), ChatError>
where
    S: MessageStore + ?Sized,
{
    let rows = store.recent_messages(limit).await?;
    let mut messages: Vec<ChatMessage> = rows.into_iter().map(MessageRow::into_message).collect();
    messages.reverse();

    let avatars = join_all(
        messages
            .iter()
            .map(|message| cache.resolve(&message.user_id)),
    )
    .await;

    for (mut message, avatar_url) in messages.into_iter().zip(avatars) {
        message.avatar_url = avatar_url;
        if room.push_unique(message.clone()) {
            let _ = events.send(ChatEvent::MessageReceived(message)).await;
        }
    }
    Ok(())
}

/// Who is in the room and how much history to pull on entry.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub room: String,
    pub user_id: String,
    pub email: Option<String>,
    pub history_limit: usize,
}

/// Realtime client for one room: owns the socket, merges both delivery
/// channels into one de-duplicated list and feeds the front-end through the
/// event channel.
pub struct ChatClient {
    conn: RealtimeConnection,
    store: Arc<dyn MessageStore>,
    cache: AvatarCache,
    room: RoomState,
    room_topic: String,
    db_topic: String,
    settings: RoomSettings,
    connected: bool,
    events: mpsc::Sender<ChatEvent>,
    commands: mpsc::Receiver<ChatCommand>,
}

impl ChatClient {
    pub fn new(
        conn: RealtimeConnection,
        store: Arc<dyn MessageStore>,
        cache: AvatarCache,
        settings: RoomSettings,
        events: mpsc::Sender<ChatEvent>,
        commands: mpsc::Receiver<ChatCommand>,
    ) -> Self {
        Self {
            conn,
            store,
            cache,
            room: RoomState::new(),
            room_topic: format!("realtime:{}", settings.room),
            db_topic: "realtime:db-messages".to_string(),
            settings,
            connected: false,
            events,
            commands,
        }
    }

    pub async fn run(mut self) -> Result<(), ChatError> {
        load_history(
            self.store.as_ref(),
            &self.cache,
            &mut self.room,
            &self.events,
            self.settings.history_limit,
        )
        .await?;

        // Room channel carries broadcast + presence; a second channel carries
        // the durable-table insert notifications.
        self.conn
            .join(
                &self.room_topic,
                &JoinConfig {
                    presence_key: Some(self.settings.user_id.clone()),
                    postgres_changes: Vec::new(),
                },
            )
            .await?;
        self.conn
            .join(
                &self.db_topic,
                &JoinConfig {
                    presence_key: None,
                    postgres_changes: vec![PostgresChange::inserts("public", "messages")],
                },
            )
            .await?;

        let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));
        log::info!("Chat event loop started for {}", self.room_topic);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                event = self.conn.next_event() => {
                    match event {
                        Ok(RealtimeEvent::Closed) => {
                            let _ = self.events.send(ChatEvent::Disconnected).await;
                            return Ok(());
                        }
                        Ok(event) => self.handle_event(event).await,
                        Err(err) => log::warn!("Dropping undecodable frame: {err}"),
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.conn.heartbeat().await {
                        log::warn!("Heartbeat failed: {err}");
                    }
                }
            }
        }

        // Front-end went away: tear the subscriptions down. Frames still in
        // flight are dropped by the decoder.
        let _ = self.conn.leave(&self.room_topic).await;
        let _ = self.conn.leave(&self.db_topic).await;
        let _ = self.events.send(ChatEvent::Disconnected).await;
        Ok(())
    }

    async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::SendMessage(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                if !self.connected {
                    log::warn!("Not connected yet; message dropped");
                    return;
                }
                if let Err(err) = deliver_message(
                    &mut self.conn,
                    self.store.as_ref(),
                    &self.room_topic,
                    &self.settings.user_id,
                    self.settings.email.as_deref(),
                    text,
                )
                .await
                {
                    log::warn!("Send failed: {err}");
                }
            }
        }
    }

    async fn handle_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Subscribed { topic } if topic == self.room_topic => {
                self.connected = true;
                if let Err(err) = self
                    .conn
                    .track(&self.room_topic, &Utc::now().to_rfc3339())
                    .await
                {
                    log::warn!("Presence track failed: {err}");
                }
                let _ = self.events.send(ChatEvent::Connected).await;
            }
            RealtimeEvent::Subscribed { topic } => {
                log::info!("Subscribed to {topic}");
            }
            RealtimeEvent::Broadcast { event, payload, .. } => {
                if event != BROADCAST_EVENT {
                    return;
                }
                match serde_json::from_value::<ChatMessage>(payload) {
                    Ok(message) => {
                        merge_incoming(&mut self.room, &self.cache, &self.events, message).await;
                    }
                    Err(err) => log::warn!("Malformed broadcast payload: {err}"),
                }
            }
            RealtimeEvent::RowInserted { row, .. } => {
                merge_incoming(&mut self.room, &self.cache, &self.events, row.into_message())
                    .await;
            }
            RealtimeEvent::PresenceSynced { topic, state } if topic == self.room_topic => {
                self.room.replace_presence(state.clone());
                let _ = self.events.send(ChatEvent::PresenceSynced(state)).await;
            }
            RealtimeEvent::PresenceSynced { .. } | RealtimeEvent::Closed => {}
        }
    }
}
