use crate::constants::{KV_TTL_SECS, SHORT_CODE_ALPHABET, SHORT_CODE_LEN, SHORT_CODE_MAX_ATTEMPTS};
use crate::db::{PersistentStorage, StorageError};
use crate::model::SessionId;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    session_id: SessionId,
    cached_at: Instant,
}

/// In-memory directory mapping short codes to session ids, backed by the
/// durable store. Reads are served from the cache whenever the entry is
/// fresh; misses and stale entries fall through to the caller-supplied
/// loader and are written back into the cache.
#[derive(Clone)]
pub struct ShortCodeDirectory {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for ShortCodeDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortCodeDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::from_secs(KV_TTL_SECS),
        }
    }

    /// Returns a cached session id for `short_code` if present and not
    /// stale. A stale hit is still useful to callers who only need the
    /// mapping to exist (short codes never get reassigned to a different
    /// session), but we report it as a miss so the caller can refresh.
    pub async fn get_fresh(&self, short_code: &str) -> Option<SessionId> {
        let guard = self.inner.read().await;
        let entry = guard.get(short_code)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.session_id.clone())
        } else {
            None
        }
    }

    /// Returns a cached session id regardless of staleness. Short codes are
    /// immutable once minted, so a stale entry is still correct, just not
    /// guaranteed to reflect a concurrent deletion.
    pub async fn get_stale(&self, short_code: &str) -> Option<SessionId> {
        let guard = self.inner.read().await;
        guard.get(short_code).map(|entry| entry.session_id.clone())
    }

    pub async fn insert(&self, short_code: String, session_id: SessionId) {
        let mut guard = self.inner.write().await;
        guard.insert(
            short_code,
            Entry {
                session_id,
                cached_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, short_code: &str) {
        let mut guard = self.inner.write().await;
        guard.remove(short_code);
    }
}

#[derive(Debug, Error)]
pub enum ShortCodeError {
    #[error("exhausted attempts generating a unique short code")]
    Exhausted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn random_short_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SHORT_CODE_ALPHABET.len());
            SHORT_CODE_ALPHABET[idx] as char
        })
        .collect()
}

/// Mints a short code not already present in durable storage, by rejection
/// sampling from the alphabet up to `SHORT_CODE_MAX_ATTEMPTS` times.
pub async fn generate_unique_short_code(storage: &PersistentStorage) -> Result<String, ShortCodeError> {
    for _ in 0..SHORT_CODE_MAX_ATTEMPTS {
        let candidate = random_short_code();
        if !storage.short_code_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(ShortCodeError::Exhausted)
}
