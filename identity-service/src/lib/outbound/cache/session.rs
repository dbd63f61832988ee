use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use auth::TokenHash;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::identity::models::Identity;
use crate::domain::identity::models::UserId;
use crate::domain::identity::ports::SessionCache;

/// Default interval between sweeps of expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct CacheEntry {
    identity: Identity,
    expires_at: Instant,
}

/// Resolved identities keyed by access-token digest.
///
/// Expired entries are never returned; `spawn_sweeper` reclaims their memory.
#[derive(Debug, Default)]
pub struct InMemorySessionCache {
    entries: DashMap<TokenHash, CacheEntry>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry.
    ///
    /// # Returns
    /// Number of entries removed
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep periodically until `shutdown` flips to true or its sender is dropped.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Session cache swept");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Session cache sweeper stopped");
        })
    }
}

impl SessionCache for InMemorySessionCache {
    fn get(&self, key: &TokenHash) -> Option<Identity> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.identity.clone());
        }
        drop(entry);

        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        None
    }

    fn set(&self, key: TokenHash, identity: Identity, ttl: Duration) {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return;
        };

        self.entries.insert(
            key,
            CacheEntry {
                identity,
                expires_at,
            },
        );
    }

    fn remove_user(&self, user_id: &UserId) {
        self.entries
            .retain(|_, entry| &entry.identity.user_id != user_id);
    }

    fn flush(&self) {
        self.entries.clear();
    }
}
