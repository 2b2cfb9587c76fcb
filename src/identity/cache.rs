use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheBackend {
    Memory,
    Null,
}

impl CacheBackend {
    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "null" | "none" => Some(Self::Null),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheLookup {
    Hit(Option<String>),
    Miss,
}

struct CacheEntry {
    username: Option<String>,
    expires_at: Instant,
}

pub struct IdentityCache {
    backend: CacheBackend,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl IdentityCache {
    pub fn new(backend: CacheBackend, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, email: &str) -> CacheLookup {
        self.get_at(email, Instant::now())
    }

    pub fn insert(&self, email: &str, username: Option<String>) {
        self.insert_at(email, username, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn get_at(&self, email: &str, now: Instant) -> CacheLookup {
        if self.backend == CacheBackend::Null {
            return CacheLookup::Miss;
        }

        let mut entries = self.entries.lock();
        match entries.get(email) {
            Some(entry) if entry.expires_at > now => CacheLookup::Hit(entry.username.clone()),
            Some(_) => {
                entries.remove(email);
                CacheLookup::Miss
            }
            None => CacheLookup::Miss,
        }
    }

    fn insert_at(&self, email: &str, username: Option<String>, now: Instant) {
        if self.backend == CacheBackend::Null {
            return;
        }

        let mut entries = self.entries.lock();
        // Addresses that are never looked up again would otherwise stay forever.
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            email.to_owned(),
            CacheEntry {
                username,
                expires_at: now + self.ttl,
            },
        );
    }
}
