pub mod avatar;
pub mod client;
pub mod room;

pub use avatar::{AvatarCache, AvatarLookup};
pub use client::ChatClient;
pub use room::RoomState;
