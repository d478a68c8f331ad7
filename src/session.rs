use std::fs;
use std::path::Path;

use crate::backend::Session;
use crate::error::ChatError;

/// Persist the signed-in session so later invocations stay authenticated
/// (the CLI counterpart of the browser's stored session).
pub fn save_session(path: &str, session: &Session) -> Result<(), ChatError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(session)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn load_session(path: &str) -> Option<Session> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Session>(&content) {
            Ok(session) => Some(session),
            Err(err) => {
                log::warn!("Failed to parse session file {path}: {err}");
                None
            }
        },
        Err(err) => {
            log::info!("Session file {path} not readable ({err}); not signed in");
            None
        }
    }
}

pub fn clear_session(path: &str) {
    if let Err(err) = fs::remove_file(path) {
        log::info!("No session file to remove at {path}: {err}");
    }
}

/// Gate for authenticated commands; absence of a session is the signal for
/// "go log in", never an error dump.
pub fn require_session(path: &str) -> Result<Session, ChatError> {
    load_session(path).ok_or(ChatError::NotAuthenticated)
}
