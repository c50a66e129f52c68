//! Request-scoped mapping from in-flight requests to their acting user.
//!
//! The authentication stage registers the resolved user with
//! [`RequestContextMap::register`] and stores the returned [`RequestKey`] in the
//! request extensions. Later stages (authorization, the current-user route
//! filter) look the user up by key. The entry lives exactly as long as the
//! [`RequestContextGuard`] the authentication stage holds while the rest of
//! the chain runs, so completed, failed and cancelled requests all release
//! their entry.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::user::UserInfo;

/// Identity of one in-flight request inside a [`RequestContextMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(u64);

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Concurrency-safe map from in-flight request to acting user.
///
/// Constructed once during server assembly and shared by reference with every
/// middleware stage that needs it.
#[derive(Debug, Default)]
pub struct RequestContextMap {
    next_key: AtomicU64,
    entries: DashMap<RequestKey, UserInfo>,
}

impl RequestContextMap {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `user` for a new in-flight request.
    ///
    /// The entry is removed when the returned guard is dropped.
    #[must_use = "dropping the guard immediately removes the entry"]
    pub fn register(self: &Arc<Self>, user: UserInfo) -> RequestContextGuard {
        let key = RequestKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(key, user);
        RequestContextGuard {
            map: Arc::clone(self),
            key,
        }
    }

    /// Look up the acting user of an in-flight request.
    #[must_use]
    pub fn get(&self, key: RequestKey) -> Option<UserInfo> {
        self.entries.get(&key).map(|e| e.value().clone())
    }

    /// Number of in-flight requests currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&self, key: RequestKey) {
        if self.entries.remove(&key).is_none() {
            tracing::warn!(request = %key, "request context entry already removed");
        }
    }
}

/// Owns one [`RequestContextMap`] entry; removes it on drop.
#[derive(Debug)]
pub struct RequestContextGuard {
    map: Arc<RequestContextMap>,
    key: RequestKey,
}

impl RequestContextGuard {
    #[must_use]
    pub fn key(&self) -> RequestKey {
        self.key
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        self.map.remove(self.key);
    }
}
