use std::fmt;

use thiserror::Error;

/// Structured failure reported by a backend service.
///
/// The hosted platform returns slightly different error bodies per service
/// (auth, storage, rest); this keeps whichever of message/name/status/code
/// were present so the user-facing text can include them all.
#[derive(Debug, Clone, Default)]
pub struct ServiceError {
    pub message: String,
    pub name: Option<String>,
    pub status: Option<u16>,
    pub code: Option<String>,
}

impl ServiceError {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// True when the error text indicates the target storage bucket is missing.
    pub fn is_bucket_missing(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("bucket") && text.contains("not found")
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Render as `message (name / status / code)`, keeping only the
        // parts the service actually provided.
        let extra: Vec<String> = [
            self.name.clone(),
            self.status.map(|status| status.to_string()),
            self.code.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();

        if extra.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} ({})", self.message, extra.join(" / "))
        }
    }
}

/// Error taxonomy for the whole client.
///
/// Validation failures are caught before any network call; collaborator
/// failures carry the composed service error; `NotAuthenticated` is the
/// CLI counterpart of the web app's redirect-to-login.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("config: {0}")]
    Config(String),
    #[error("auth: {0}")]
    Auth(ServiceError),
    #[error("storage: {0}")]
    Storage(ServiceError),
    #[error("table: {0}")]
    Table(ServiceError),
    #[error("realtime: {0}")]
    Realtime(String),
    #[error("{0}")]
    Validation(String),
    #[error("not signed in; run the `login` command first")]
    NotAuthenticated,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("bad payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_composes_present_parts_only() {
        let plain = ServiceError::from_message("upload failed");
        assert_eq!(plain.to_string(), "upload failed");

        let full = ServiceError {
            message: "upload failed".into(),
            name: Some("StorageApiError".into()),
            status: Some(404),
            code: Some("404".into()),
        };
        assert_eq!(
            full.to_string(),
            "upload failed (StorageApiError / 404 / 404)"
        );

        let partial = ServiceError {
            message: "upload failed".into(),
            name: None,
            status: Some(400),
            code: None,
        };
        assert_eq!(partial.to_string(), "upload failed (400)");
    }

    #[test]
    fn bucket_missing_is_detected_case_insensitively() {
        let err = ServiceError {
            message: "Bucket not found".into(),
            name: None,
            status: Some(404),
            code: None,
        };
        assert!(err.is_bucket_missing());

        let other = ServiceError::from_message("row level security violation");
        assert!(!other.is_bucket_missing());
    }
}
