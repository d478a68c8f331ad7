use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::types::now_ms;
use crate::error::ChatError;

/// How long a resolved (or failed) avatar lookup stays fresh.
pub const AVATAR_TTL_MS: i64 = 10 * 60 * 1000;

/// Remote avatar resolution by user id; implemented by the backend's
/// `get_user_avatar` database function.
#[async_trait]
pub trait AvatarLookup: Send + Sync {
    async fn lookup_avatar(&self, user_id: &str) -> Result<Option<String>, ChatError>;
}

#[derive(Debug, Clone)]
struct CachedAvatar {
    url: Option<String>,
    expire_at: i64,
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Avatar lookups keyed by user id with a TTL.
///
/// A failed or empty lookup is cached as `None` for the same TTL (negative
/// caching), so a user without an avatar does not hit the network on every
/// message. There is no in-flight de-duplication: two concurrent misses for
/// the same user may both look up, and the second write wins.
pub struct AvatarCache {
    entries: Mutex<HashMap<String, CachedAvatar>>,
    lookup: Arc<dyn AvatarLookup>,
    clock: Clock,
    ttl_ms: i64,
}

impl AvatarCache {
    pub fn new(lookup: Arc<dyn AvatarLookup>) -> Self {
        Self::with_clock(lookup, AVATAR_TTL_MS, Box::new(now_ms))
    }

    /// Injected clock and TTL, so expiry is testable without real time.
    pub fn with_clock(lookup: Arc<dyn AvatarLookup>, ttl_ms: i64, clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            lookup,
            clock,
            ttl_ms,
        }
    }

    /// Cached URL when fresh, otherwise exactly one lookup whose result
    /// (even a failure) overwrites the entry.
    pub async fn resolve(&self, user_id: &str) -> Option<String> {
        let now = (self.clock)();
        {
            let entries = self.entries.lock().await;
            if let Some(cached) = entries.get(user_id) {
                if now < cached.expire_at {
                    return cached.url.clone();
                }
            }
        }
        // Lock released across the lookup: concurrent misses race and the
        // last write wins, an accepted limitation.
        let url = match self.lookup.lookup_avatar(user_id).await {
            Ok(url) => url,
            Err(err) => {
                log::warn!("Avatar lookup for {user_id} failed: {err}");
                None
            }
        };

        self.entries.lock().await.insert(
            user_id.to_string(),
            CachedAvatar {
                url: url.clone(),
                expire_at: now + self.ttl_ms,
            },
        );
        url
    }

    /// Seed an entry without a lookup (the session reader already knows the
    /// current user's avatar from the profile metadata).
    pub async fn prime(&self, user_id: &str, url: Option<String>) {
        let now = (self.clock)();
        self.entries.lock().await.insert(
            user_id.to_string(),
            CachedAvatar {
                url,
                expire_at: now + self.ttl_ms,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
        result: Option<String>,
        fail: bool,
    }

    impl CountingLookup {
        fn returning(result: Option<String>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: None,
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AvatarLookup for CountingLookup {
        async fn lookup_avatar(&self, _user_id: &str) -> Result<Option<String>, ChatError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ChatError::Realtime("lookup down".into()));
            }
            Ok(self.result.clone())
        }
    }

    fn manual_clock() -> (Arc<AtomicI64>, Clock) {
        let time = Arc::new(AtomicI64::new(0));
        let handle = Arc::clone(&time);
        (time, Box::new(move || handle.load(Ordering::SeqCst)))
    }

    #[tokio::test]
    async fn fresh_entry_skips_the_lookup() {
        let lookup = CountingLookup::returning(Some("https://cdn/a.png".into()));
        let (_, clock) = manual_clock();
        let cache = AvatarCache::with_clock(lookup.clone(), AVATAR_TTL_MS, clock);

        assert_eq!(cache.resolve("u1").await.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(cache.resolve("u1").await.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched_exactly_once() {
        let lookup = CountingLookup::returning(Some("https://cdn/a.png".into()));
        let (time, clock) = manual_clock();
        let cache = AvatarCache::with_clock(lookup.clone(), AVATAR_TTL_MS, clock);

        cache.resolve("u1").await;
        time.store(AVATAR_TTL_MS, Ordering::SeqCst); // now == expire_at: stale
        cache.resolve("u1").await;
        assert_eq!(lookup.calls(), 2);

        // Overwritten entry is fresh again at the new time.
        cache.resolve("u1").await;
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn failed_lookup_is_negatively_cached() {
        let lookup = CountingLookup::failing();
        let (_, clock) = manual_clock();
        let cache = AvatarCache::with_clock(lookup.clone(), AVATAR_TTL_MS, clock);

        assert!(cache.resolve("u1").await.is_none());
        assert!(cache.resolve("u1").await.is_none());
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn primed_entry_is_served_without_a_lookup() {
        let lookup = CountingLookup::returning(None);
        let (_, clock) = manual_clock();
        let cache = AvatarCache::with_clock(lookup.clone(), AVATAR_TTL_MS, clock);

        cache.prime("me", Some("https://cdn/me.png".into())).await;
        assert_eq!(cache.resolve("me").await.as_deref(), Some("https://cdn/me.png"));
        assert_eq!(lookup.calls(), 0);
    }
}
