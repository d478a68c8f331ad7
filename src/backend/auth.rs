use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Backend, Service};
use crate::chat::avatar::AvatarLookup;
use crate::error::ChatError;

/// Authenticated user as returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form profile metadata; `avatar_url` is the only key used here.
    #[serde(default)]
    pub user_metadata: Value,
}

impl User {
    pub fn avatar_url(&self) -> Option<String> {
        self.user_metadata
            .get("avatar_url")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Token pair plus its owner, persisted locally between invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub user: User,
}

impl Backend {
    /// Create an account. Returns the session when the project signs the
    /// user in immediately, `None` when email confirmation is pending.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, ChatError> {
        let response = self
            .authorize(self.http().post(self.endpoint("/auth/v1/signup")))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: Value = self.check(Service::Auth, response).await?.json().await?;

        if body.get("access_token").is_some() {
            Ok(Some(serde_json::from_value(body)?))
        } else {
            Ok(None)
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ChatError> {
        let response = self
            .authorize(
                self.http()
                    .post(self.endpoint("/auth/v1/token?grant_type=password")),
            )
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let session = self
            .check(Service::Auth, response)
            .await?
            .json::<Session>()
            .await?;
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), ChatError> {
        let response = self
            .authorize(self.http().post(self.endpoint("/auth/v1/logout")))
            .send()
            .await?;
        self.check(Service::Auth, response).await?;
        Ok(())
    }

    /// Fetch the current user for the active access token.
    pub async fn get_user(&self) -> Result<User, ChatError> {
        let response = self
            .authorize(self.http().get(self.endpoint("/auth/v1/user")))
            .send()
            .await?;
        let user = self
            .check(Service::Auth, response)
            .await?
            .json::<User>()
            .await?;
        Ok(user)
    }

    /// Persist a new avatar URL into the user's profile metadata, where every
    /// other client reading the profile picks it up.
    pub async fn update_avatar_url(&self, avatar_url: &str) -> Result<User, ChatError> {
        let response = self
            .authorize(self.http().put(self.endpoint("/auth/v1/user")))
            .json(&json!({ "data": { "avatar_url": avatar_url } }))
            .send()
            .await?;
        let user = self
            .check(Service::Auth, response)
            .await?
            .json::<User>()
            .await?;
        Ok(user)
    }

    /// `get_user_avatar` database function: resolve any user's avatar URL.
    pub async fn get_user_avatar(&self, user_id: &str) -> Result<Option<String>, ChatError> {
        let response = self
            .authorize(
                self.http()
                    .post(self.endpoint("/rest/v1/rpc/get_user_avatar")),
            )
            .json(&json!({ "user_id": user_id }))
            .send()
            .await?;
        let body: Value = self.check(Service::Table, response).await?.json().await?;
        Ok(body.as_str().map(str::to_string))
    }
}

#[async_trait]
impl AvatarLookup for Backend {
    async fn lookup_avatar(&self, user_id: &str) -> Result<Option<String>, ChatError> {
        self.get_user_avatar(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_url_reads_profile_metadata() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "email": "a@example.com",
            "user_metadata": { "avatar_url": "https://cdn/a.png" },
        }))
        .unwrap();
        assert_eq!(user.avatar_url().as_deref(), Some("https://cdn/a.png"));

        let bare: User = serde_json::from_value(json!({ "id": "u2" })).unwrap();
        assert!(bare.avatar_url().is_none());
        assert!(bare.email.is_none());
    }
}
