use async_trait::async_trait;
use serde_json::json;

use super::{Backend, Service};
use crate::common::MessageRow;
use crate::error::ChatError;

/// Durable-table contract for the `messages` table: recent history and row
/// insertion. The database assigns ids and `created_at`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent rows, newest first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<MessageRow>, ChatError>;

    async fn insert_message(
        &self,
        user_id: &str,
        email: Option<&str>,
        text: &str,
    ) -> Result<(), ChatError>;
}

#[async_trait]
impl MessageStore for Backend {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<MessageRow>, ChatError> {
        let response = self
            .authorize(self.http().get(self.endpoint(&format!(
                "/rest/v1/messages?select=*&order=created_at.desc&limit={limit}"
            ))))
            .send()
            .await?;
        let rows = self
            .check(Service::Table, response)
            .await?
            .json::<Vec<MessageRow>>()
            .await?;
        Ok(rows)
    }

    async fn insert_message(
        &self,
        user_id: &str,
        email: Option<&str>,
        text: &str,
    ) -> Result<(), ChatError> {
        let response = self
            .authorize(self.http().post(self.endpoint("/rest/v1/messages")))
            .header("prefer", "return=minimal")
            .json(&json!({
                "user_id": user_id,
                "email": email,
                "text": text,
            }))
            .send()
            .await?;
        self.check(Service::Table, response).await?;
        Ok(())
    }
}
