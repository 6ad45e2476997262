//! InMemoryKv - 開発用の期限付き KV ストア
//!
//! 期限切れは Clock で判定します（ManualClock で TTL を再現可能）。
//! 期限切れエントリは読み出し時に遅延削除し、書き込み時にも
//! `SWEEP_INTERVAL_SECS` ごとに全体を掃除します（読まれない key も残らない）。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::Result;
use crate::ports::{Clock, KeyValueStore};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Minimum clock time between full sweeps of expired entries.
const SWEEP_INTERVAL_SECS: i64 = 60;

struct Store {
    entries: HashMap<String, Entry>,
    last_sweep: Option<DateTime<Utc>>,
}

impl Store {
    fn sweep_if_due(&mut self, now: DateTime<Utc>) {
        if self
            .last_sweep
            .is_some_and(|at| now.signed_duration_since(at).num_seconds() < SWEEP_INTERVAL_SECS)
        {
            return;
        }
        self.entries.retain(|_, e| e.is_live(now));
        self.last_sweep = Some(now);
    }
}

pub struct InMemoryKv<C> {
    clock: C,
    store: Mutex<Store>,
}

impl<C: Clock> InMemoryKv<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            store: Mutex::new(Store {
                entries: HashMap::new(),
                last_sweep: None,
            }),
        }
    }

    fn deadline(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl?).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.store.lock().await.entries.len()
    }
}

/// Drop `key` if it has expired, then return the live entry.
fn live<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: DateTime<Utc>,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

#[async_trait]
impl<C: Clock> KeyValueStore for InMemoryKv<C> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        Ok(live(&mut store.entries, key, now).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl);
        let mut store = self.store.lock().await;
        store.sweep_if_due(now);
        store
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.deadline(ttl);
        let mut store = self.store.lock().await;
        store.sweep_if_due(now);
        if live(&mut store.entries, key, now).is_some() {
            return Ok(false);
        }
        store
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.deadline(Some(ttl));
        let mut store = self.store.lock().await;
        Ok(match live(&mut store.entries, key, now) {
            Some(entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        let existed = live(&mut store.entries, key, now).is_some();
        store.entries.remove(key);
        Ok(existed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let now = self.clock.now();
        let mut store = self.store.lock().await;
        let matches = live(&mut store.entries, key, now).is_some_and(|e| e.value == expected);
        if matches {
            store.entries.remove(key);
        }
        Ok(matches)
    }
}
