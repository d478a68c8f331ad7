use async_trait::async_trait;

use super::{Backend, Service};
use crate::error::ChatError;

/// Options forwarded with an object upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// `Cache-Control: max-age` seconds, as a string on the wire.
    pub cache_control: String,
    /// Whether an existing object under the same key is overwritten.
    pub upsert: bool,
    pub content_type: String,
}

/// The slice of the object-storage contract the client uses; the seam lets
/// tests count upload attempts without a network.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<(), ChatError>;

    /// Publicly resolvable URL for an object; pure string composition, no
    /// network call, matching the hosted SDK.
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

#[async_trait]
impl ObjectStore for Backend {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        options: &UploadOptions,
    ) -> Result<(), ChatError> {
        let response = self
            .authorize(
                self.http()
                    .post(self.endpoint(&format!("/storage/v1/object/{bucket}/{key}"))),
            )
            .header("cache-control", format!("max-age={}", options.cache_control))
            .header("content-type", &options.content_type)
            .header("x-upsert", options.upsert.to_string())
            .body(bytes)
            .send()
            .await?;
        self.check(Service::Storage, response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{key}", self.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_is_composed_without_a_network_call() {
        let backend = Backend::new("https://xyz.supabase.co", "anon");
        assert_eq!(
            backend.public_url("avatars", "u1/1700000000000.png"),
            "https://xyz.supabase.co/storage/v1/object/public/avatars/u1/1700000000000.png"
        );
    }
}
