// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Idle-connection pooling, keyed by remote endpoint and server name

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Key of one pooled connection: remote address, port and SNI
pub(crate) type PoolKey = (SocketAddr, String);

/// A bounded pool of idle connections with LRU eviction.
///
/// A connection is taken out of the pool while in use; only healthy
/// connections are returned. Entries idle past the timeout are dropped on
/// the next touch.
pub struct ConnectionPool<T> {
    entries: Mutex<HashMap<PoolKey, (T, Instant)>>,
    max_entries: usize,
    idle_timeout: Duration,
}

impl<T> ConnectionPool<T> {
    /// Create a pool bounded to `max_entries` descriptors
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            idle_timeout,
        }
    }

    /// Take the idle connection for `key`, when one is present and fresh
    pub(crate) fn take(&self, key: &PoolKey) -> Option<T> {
        let mut entries = self.entries.lock();
        let (conn, stored_at) = entries.remove(key)?;
        if stored_at.elapsed() > self.idle_timeout {
            return None;
        }
        Some(conn)
    }

    /// Return a healthy connection to the pool
    pub(crate) fn put(&self, key: PoolKey, conn: T) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            // evict the stalest entry to stay under the descriptor bound
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (conn, Instant::now()));
    }

    /// Number of idle connections held
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when no idle connections are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port: u16) -> PoolKey {
        (
            SocketAddr::new("192.0.2.1".parse().unwrap(), port),
            "ns.example.net".to_string(),
        )
    }

    #[test]
    fn test_take_removes() {
        let pool = ConnectionPool::new(4, Duration::from_secs(10));
        pool.put(key(853), 1u8);
        assert_eq!(pool.take(&key(853)), Some(1));
        assert_eq!(pool.take(&key(853)), None);
    }

    #[test]
    fn test_lru_eviction_keeps_bound() {
        let pool = ConnectionPool::new(2, Duration::from_secs(10));
        pool.put(key(1), 1u8);
        pool.put(key(2), 2u8);
        pool.put(key(3), 3u8);
        assert_eq!(pool.len(), 2);
        // the first stored entry was the stalest
        assert_eq!(pool.take(&key(1)), None);
    }

    #[test]
    fn test_idle_timeout_drops() {
        let pool = ConnectionPool::new(2, Duration::from_secs(0));
        pool.put(key(1), 1u8);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.take(&key(1)), None);
    }
}
