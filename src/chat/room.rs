use crate::common::{ChatMessage, PresenceState};

/// Local state of one chat room: the merged message list and the latest
/// presence snapshot.
#[derive(Debug, Default)]
pub struct RoomState {
    messages: Vec<ChatMessage>,
    peers: PresenceState,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|message| message.id == id)
    }

    /// Append unless a message with the same id is already present.
    ///
    /// Both delivery channels (broadcast and table-insert notification) can
    /// carry the same logical message in either order; this membership check
    /// is the sole de-duplication mechanism.
    pub fn push_unique(&mut self, message: ChatMessage) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Wholesale replace: the server snapshot is the source of truth.
    pub fn replace_presence(&mut self, snapshot: PresenceState) {
        self.peers = snapshot;
    }

    /// Distinct users currently online.
    pub fn online_count(&self) -> usize {
        self.peers.len()
    }

    /// Open connections, counting a user once per tab.
    pub fn connection_count(&self) -> usize {
        self.peers.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PresenceEntry;

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            user_id: "u1".into(),
            email: Some("a@example.com".into()),
            text: text.into(),
            ts: 1000,
            avatar_url: None,
        }
    }

    #[test]
    fn duplicate_ids_are_appended_once() {
        let mut room = RoomState::new();
        assert!(room.push_unique(message("m1", "hi")));
        assert!(!room.push_unique(message("m1", "hi")));
        assert_eq!(room.messages().len(), 1);

        // Same property with the channels arriving in the other order.
        let mut room = RoomState::new();
        assert!(room.push_unique(message("m2", "yo")));
        assert!(room.push_unique(message("m1", "hi")));
        assert!(!room.push_unique(message("m2", "yo")));
        assert_eq!(room.messages().len(), 2);
    }

    #[test]
    fn presence_counts_distinguish_users_from_connections() {
        let mut room = RoomState::new();
        let mut snapshot = PresenceState::new();
        snapshot.insert(
            "u1".into(),
            vec![
                PresenceEntry { online_at: "t1".into() },
                PresenceEntry { online_at: "t2".into() },
            ],
        );
        snapshot.insert("u2".into(), vec![PresenceEntry { online_at: "t3".into() }]);

        room.replace_presence(snapshot);
        assert_eq!(room.online_count(), 2);
        assert_eq!(room.connection_count(), 3);

        // A later snapshot replaces, never merges.
        room.replace_presence(PresenceState::new());
        assert_eq!(room.online_count(), 0);
        assert_eq!(room.connection_count(), 0);
    }
}
