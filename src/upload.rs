use async_trait::async_trait;
use regex::Regex;

use crate::backend::storage::{ObjectStore, UploadOptions};
use crate::backend::{Backend, User};
use crate::error::ChatError;

pub const AVATAR_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const GENERIC_MAX_BYTES: u64 = 50 * 1024 * 1024;

const ALLOWED_AVATAR_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];
const MAX_STEM_LEN: usize = 40;

/// The two upload variants differ in gating and overwrite policy: the
/// latest avatar replaces the previous one, generic uploads never clobber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Generic,
    Avatar,
}

/// Writing the avatar URL back into the user's profile metadata, split out
/// so the avatar flow is testable without the auth service.
#[async_trait]
pub trait ProfileWriter: Send + Sync {
    async fn persist_avatar_url(&self, avatar_url: &str) -> Result<(), ChatError>;
}

#[async_trait]
impl ProfileWriter for Backend {
    async fn persist_avatar_url(&self, avatar_url: &str) -> Result<(), ChatError> {
        let _: User = self.update_avatar_url(avatar_url).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub key: String,
    pub public_url: String,
}

/// Gate a locally-selected file before any network call.
pub fn validate(kind: UploadKind, content_type: &str, size: u64) -> Result<(), ChatError> {
    match kind {
        UploadKind::Avatar => {
            if !ALLOWED_AVATAR_TYPES.contains(&content_type) {
                return Err(ChatError::Validation(format!(
                    "avatars must be JPG, PNG or WebP, not {content_type}"
                )));
            }
            if size > AVATAR_MAX_BYTES {
                return Err(ChatError::Validation(
                    "avatar images are limited to 5 MiB".to_string(),
                ));
            }
        }
        UploadKind::Generic => {
            if size > GENERIC_MAX_BYTES {
                return Err(ChatError::Validation(
                    "uploads are limited to 50 MiB".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Guess a MIME type from the file extension (no browser to ask here).
pub fn content_type_for(file_name: &str) -> &'static str {
    match extension_of(file_name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn sanitize_stem(stem: &str) -> String {
    // Non-word characters become underscores; the stem is length-capped so
    // pathological names cannot blow up the storage key.
    let sanitized = Regex::new(r"\W+")
        .expect("static pattern")
        .replace_all(stem, "_")
        .into_owned();
    sanitized.chars().take(MAX_STEM_LEN).collect()
}

/// Collision-resistant storage key under the user's prefix.
pub fn storage_key(kind: UploadKind, user_id: &str, file_name: &str, now_ms: i64) -> String {
    match kind {
        UploadKind::Avatar => {
            let ext = extension_of(file_name).unwrap_or_else(|| "png".to_string());
            format!("{user_id}/{now_ms}.{ext}")
        }
        UploadKind::Generic => {
            let (stem, ext) = match file_name.rsplit_once('.') {
                Some((stem, ext)) => (stem, Some(ext.to_lowercase())),
                None => (file_name, None),
            };
            let stem = sanitize_stem(stem);
            match ext {
                Some(ext) => format!("{user_id}/{now_ms}_{stem}.{ext}"),
                None => format!("{user_id}/{now_ms}_{stem}"),
            }
        }
    }
}

/// Replace a bucket-not-found failure with the actionable hint; everything
/// else passes through with its composed message.
fn with_bucket_hint(err: ChatError, bucket: &str) -> ChatError {
    match err {
        ChatError::Storage(mut service) if service.is_bucket_missing() => {
            service.message = format!(
                "storage bucket `{bucket}` does not exist; create it in the project dashboard"
            );
            ChatError::Storage(service)
        }
        other => other,
    }
}

/// Generic upload: validate, write with `upsert=false` (a key collision is
/// an error), read back the public URL.
pub async fn upload_file<S>(
    store: &S,
    bucket: &str,
    user_id: &str,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<UploadOutcome, ChatError>
where
    S: ObjectStore + ?Sized,
{
    let content_type = content_type_for(file_name);
    validate(UploadKind::Generic, content_type, bytes.len() as u64)?;

    let key = storage_key(
        UploadKind::Generic,
        user_id,
        file_name,
        crate::common::types::now_ms(),
    );
    let options = UploadOptions {
        cache_control: "3600".to_string(),
        upsert: false,
        content_type: content_type.to_string(),
    };

    store
        .upload(bucket, &key, bytes, &options)
        .await
        .map_err(|err| with_bucket_hint(err, bucket))?;

    let public_url = store.public_url(bucket, &key);
    Ok(UploadOutcome { key, public_url })
}

/// Avatar upload: validate, write with `upsert=true` (latest avatar wins),
/// read back the public URL and persist it into the profile metadata so
/// every component reading the profile sees it.
pub async fn upload_avatar<S>(
    store: &S,
    bucket: &str,
    user_id: &str,
    file_name: &str,
    bytes: Vec<u8>,
) -> Result<UploadOutcome, ChatError>
where
    S: ObjectStore + ProfileWriter + ?Sized,
{
    let content_type = content_type_for(file_name);
    validate(UploadKind::Avatar, content_type, bytes.len() as u64)?;

    let key = storage_key(
        UploadKind::Avatar,
        user_id,
        file_name,
        crate::common::types::now_ms(),
    );
    let options = UploadOptions {
        cache_control: "3600".to_string(),
        upsert: true,
        content_type: content_type.to_string(),
    };

    store
        .upload(bucket, &key, bytes, &options)
        .await
        .map_err(|err| with_bucket_hint(err, bucket))?;

    let public_url = store.public_url(bucket, &key);
    store.persist_avatar_url(&public_url).await?;
    Ok(UploadOutcome { key, public_url })
}
