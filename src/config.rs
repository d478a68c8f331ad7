use std::env;

use crate::error::ChatError;

pub const DEFAULT_UPLOAD_BUCKET: &str = "uploads";
pub const DEFAULT_AVATAR_BUCKET: &str = "avatars";
pub const DEFAULT_ROOM: &str = "room_demo";
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_SESSION_PATH: &str = "data/session.json";

/// Runtime configuration, read from the environment (a `.env` file is
/// loaded by `main` before this runs).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the hosted backend project, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    /// Publishable (anon) API key.
    pub anon_key: String,
    pub upload_bucket: String,
    pub avatar_bucket: String,
    /// Logical chat room name; becomes the realtime channel topic.
    pub room: String,
    /// How many persisted messages to load on entering the room.
    pub history_limit: usize,
    /// Where the signed-in session is persisted between invocations.
    pub session_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ChatError> {
        let base_url = required("SUPABASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let anon_key = required("SUPABASE_ANON_KEY")?;

        Ok(Self {
            base_url,
            anon_key,
            upload_bucket: env_or("SUPABASE_UPLOAD_BUCKET", DEFAULT_UPLOAD_BUCKET),
            avatar_bucket: env_or("SUPABASE_AVATAR_BUCKET", DEFAULT_AVATAR_BUCKET),
            room: env_or("CHAT_ROOM", DEFAULT_ROOM),
            history_limit: env_usize_or("CHAT_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            session_path: env_or("SESSION_FILE", DEFAULT_SESSION_PATH),
        })
    }
}

fn required(key: &str) -> Result<String, ChatError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ChatError::Config(format!("{key} is not set"))),
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_usize_or(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("Invalid {key}={value}: {err}; using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_keys_fall_back_to_defaults() {
        // Env-var tests share process state; use keys nothing else reads.
        unsafe { env::remove_var("TEST_BUCKET_FALLBACK") };
        assert_eq!(env_or("TEST_BUCKET_FALLBACK", "avatars"), "avatars");

        unsafe { env::set_var("TEST_BUCKET_FALLBACK", "custom") };
        assert_eq!(env_or("TEST_BUCKET_FALLBACK", "avatars"), "custom");
        unsafe { env::remove_var("TEST_BUCKET_FALLBACK") };
    }

    #[test]
    fn bad_numeric_value_falls_back() {
        unsafe { env::set_var("TEST_HISTORY_LIMIT", "lots") };
        assert_eq!(env_usize_or("TEST_HISTORY_LIMIT", 10), 10);

        unsafe { env::set_var("TEST_HISTORY_LIMIT", "5") };
        assert_eq!(env_usize_or("TEST_HISTORY_LIMIT", 10), 5);
        unsafe { env::remove_var("TEST_HISTORY_LIMIT") };
    }
}
