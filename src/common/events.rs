use crate::common::types::{ChatMessage, PresenceState};

/// Events from the realtime client up to the front-end.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Room channel subscribed and this connection's presence announced.
    Connected,
    /// A message passed the id de-duplication and was appended.
    MessageReceived(ChatMessage),
    /// Full presence snapshot (wholesale replace, never incremental).
    PresenceSynced(PresenceState),
    Disconnected,
}
