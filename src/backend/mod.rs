pub mod auth;
pub mod realtime;
pub mod storage;
pub mod table;

pub use auth::{Session, User};
pub use realtime::RealtimeConnection;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;

use crate::error::{ChatError, ServiceError};

/// Shared REST entry point for the hosted backend.
///
/// One instance per process; the auth, storage and table calls hang off it
/// as methods so they all attach the same `apikey`/bearer headers.
#[derive(Debug, Clone)]
pub struct Backend {
    http: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

/// Which collaborator a failed call belongs to; picks the error variant.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Service {
    Auth,
    Storage,
    Table,
}

impl Backend {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            access_token: None,
        }
    }

    /// Authenticate subsequent calls with a user token instead of the anon key.
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    /// Pass a successful response through, or turn the error body into the
    /// service's `ChatError` variant.
    pub(crate) async fn check(
        &self,
        service: Service,
        response: Response,
    ) -> Result<Response, ChatError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(service.error(status, &body))
    }
}

impl Service {
    pub(crate) fn error(self, status: StatusCode, body: &str) -> ChatError {
        let err = parse_error_body(status, body);
        match self {
            Service::Auth => ChatError::Auth(err),
            Service::Storage => ChatError::Storage(err),
            Service::Table => ChatError::Table(err),
        }
    }
}

/// The services disagree on error body shape (`message` vs `msg` vs
/// `error_description`, `code` vs `statusCode`); normalize whatever is there.
fn parse_error_body(status: StatusCode, body: &str) -> ServiceError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let field = |keys: &[&str]| -> Option<String> {
        let value = parsed.as_ref()?;
        keys.iter().find_map(|key| match value.get(key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(num)) => Some(num.to_string()),
            _ => None,
        })
    };

    let message = field(&["message", "msg", "error_description", "error"])
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("request failed with status {status}")
            } else {
                body.trim().to_string()
            }
        });

    ServiceError {
        message,
        name: field(&["error", "name"]),
        status: Some(status.as_u16()),
        code: field(&["code", "statusCode"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_body_is_normalized() {
        let err = parse_error_body(
            StatusCode::NOT_FOUND,
            r#"{"statusCode":"404","error":"Bucket not found","message":"Bucket not found"}"#,
        );
        assert_eq!(err.message, "Bucket not found");
        assert_eq!(err.name.as_deref(), Some("Bucket not found"));
        assert_eq!(err.status, Some(404));
        assert_eq!(err.code.as_deref(), Some("404"));
        assert!(err.is_bucket_missing());
    }

    #[test]
    fn auth_error_body_is_normalized() {
        let err = parse_error_body(
            StatusCode::BAD_REQUEST,
            r#"{"code":400,"msg":"Invalid login credentials"}"#,
        );
        assert_eq!(err.message, "Invalid login credentials");
        assert_eq!(err.code.as_deref(), Some("400"));
    }

    #[test]
    fn non_json_body_falls_back_to_raw_text() {
        let err = parse_error_body(StatusCode::BAD_GATEWAY, "upstream offline");
        assert_eq!(err.message, "upstream offline");
        assert_eq!(err.status, Some(502));
    }
}
