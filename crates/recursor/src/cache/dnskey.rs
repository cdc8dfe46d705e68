// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The DNSKEY and trust-anchor cache, keyed by owner and key tag

use std::collections::HashMap;
use std::sync::Arc;

use ironwood_proto::rr::rdata::DNSKEY;
use ironwood_proto::rr::Name;

use crate::cache::ShardedMap;
use crate::clock::Clock;

/// One cached public key
#[derive(Clone, Debug)]
pub struct DnskeyCacheEntry {
    name: Name,
    key_tag: u16,
    dnskey: DNSKEY,
    validated: bool,
    trust_anchor: bool,
    /// Absolute expiry, seconds past the epoch; anchors never expire
    expiration: u64,
}

impl DnskeyCacheEntry {
    /// Owner of the key
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// RFC 4034 key tag
    pub fn key_tag(&self) -> u16 {
        self.key_tag
    }

    /// The key material
    pub fn dnskey(&self) -> &DNSKEY {
        &self.dnskey
    }

    /// True once chain verification to an anchor succeeded
    pub fn validated(&self) -> bool {
        self.validated
    }

    /// True for configured anchors; these are trusted a priori
    pub fn trust_anchor(&self) -> bool {
        self.trust_anchor
    }

    /// Absolute expiry, seconds past the epoch
    pub fn expiration(&self) -> u64 {
        self.expiration
    }
}

/// The trust-anchor / DNSKEY cache
///
/// Anchors are seeded at startup and never expire by TTL. Learned keys are
/// admitted by the validator only after their covering RRSIG verified
/// against an anchor-connected key; they expire at the smaller of their TTL
/// and the signature expiration that vouched for them.
pub struct DnskeyCache {
    map: ShardedMap<(String, u16), DnskeyCacheEntry>,
    clock: Arc<dyn Clock>,
}

impl DnskeyCache {
    /// An empty cache; anchors are seeded separately
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: ShardedMap::new(),
            clock,
        }
    }

    fn key(name: &Name, key_tag: u16) -> (String, u16) {
        (name.to_lowercase().to_string(), key_tag)
    }

    /// Seed a configured trust anchor
    pub fn insert_trust_anchor(&self, name: Name, key_tag: u16, dnskey: DNSKEY) {
        let entry = DnskeyCacheEntry {
            name: name.clone(),
            key_tag,
            dnskey,
            validated: true,
            trust_anchor: true,
            expiration: u64::MAX,
        };
        self.map.insert(Self::key(&name, key_tag), entry);
    }

    /// Admit a learned key whose covering signature has been verified
    pub fn insert_validated(
        &self,
        name: Name,
        key_tag: u16,
        dnskey: DNSKEY,
        ttl: u32,
        sig_expiration: u32,
    ) {
        let now = self.clock.unix_secs();
        let expiration = (now + u64::from(ttl)).min(u64::from(sig_expiration));
        let entry = DnskeyCacheEntry {
            name: name.clone(),
            key_tag,
            dnskey,
            validated: true,
            trust_anchor: false,
            expiration,
        };

        // never clobber a configured anchor with a learned key
        let key = Self::key(&name, key_tag);
        self.map.upsert(
            key,
            || entry.clone(),
            |stored| {
                if !stored.trust_anchor {
                    *stored = entry.clone();
                }
            },
        );
    }

    /// The key for `(name, key_tag)`, evicting it when expired
    pub fn get(&self, name: &Name, key_tag: u16) -> Option<DnskeyCacheEntry> {
        let now = self.clock.unix_secs();
        let (hit, _) = self
            .map
            .get_or_evict(&Self::key(name, key_tag), |e| e.expiration <= now);
        hit
    }

    /// All live keys of `name`
    pub fn keys_for(&self, name: &Name) -> Vec<DnskeyCacheEntry> {
        let now = self.clock.unix_secs();
        let owner = name.to_lowercase().to_string();
        self.map
            .snapshot()
            .into_iter()
            .filter(|((entry_owner, _), entry)| {
                *entry_owner == owner && entry.expiration > now
            })
            .map(|(_, entry)| entry)
            .collect()
    }

    /// True when `name` has a configured anchor
    pub fn has_trust_anchor(&self, name: &Name) -> bool {
        self.keys_for(name).iter().any(|e| e.trust_anchor)
    }

    /// Snapshot for the dump surface, grouped by owner
    pub fn iter_snapshot(&self) -> Vec<(String, Vec<DnskeyCacheEntry>)> {
        let mut grouped: HashMap<String, Vec<DnskeyCacheEntry>> = HashMap::new();
        for ((owner, _), entry) in self.map.snapshot() {
            grouped.entry(owner).or_default().push(entry);
        }
        let mut snapshot: Vec<_> = grouped.into_iter().collect();
        snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));
        snapshot
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no keys are cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
