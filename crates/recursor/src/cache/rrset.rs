// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The RRset cache: positive, referral, glue, hint, priming and negative
//! entries keyed by owner and type

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use ironwood_proto::dnssec::ValidationState;
use ironwood_proto::rr::rdata::RData;
use ironwood_proto::rr::{Name, RecordSet, RecordType};

use crate::cache::ShardedMap;
use crate::clock::Clock;

/// Key reserved for "this name does not exist at all" entries; type 0 is
/// never a real query type
const NXDOMAIN_TYPE_KEY: u16 = 0;

/// Provenance and purpose of a cached RRset
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Context {
    /// Part of the answer section of an authoritative reply
    Answer,
    /// Address record carried in a referral's additional section
    Glue,
    /// Seeded from the configured hints file
    Hint,
    /// Learned while priming the root
    Priming,
    /// NS set carried in a referral's authority section
    Referral,
    /// The name does not exist; holds the proving SOA
    NxDomain,
    /// The name exists but not with this type; holds the proving SOA
    NoErrNoAns,
}

impl Context {
    /// True for the two negative contexts
    pub fn is_negative(self) -> bool {
        matches!(self, Self::NxDomain | Self::NoErrNoAns)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer => write!(f, "Answer"),
            Self::Glue => write!(f, "Glue"),
            Self::Hint => write!(f, "Hint"),
            Self::Priming => write!(f, "Priming"),
            Self::Referral => write!(f, "Referral"),
            Self::NxDomain => write!(f, "NXDOMAIN"),
            Self::NoErrNoAns => write!(f, "NoErrNoAns"),
        }
    }
}

/// One cache entry: an RRset with verdict, provenance and expiry
#[derive(Clone, Debug)]
pub struct CachedRRset {
    rrset: RecordSet,
    context: Context,
    state: ValidationState,
    /// Absolute expiry, seconds past the epoch
    expiration: u64,
    /// The zone whose keys signed this set, when signatures were present
    signer: Option<Name>,
}

impl CachedRRset {
    /// Build an entry, deriving the expiry from the TTL, the configured
    /// cap, and the earliest covering signature expiration
    pub fn new(
        rrset: RecordSet,
        context: Context,
        state: ValidationState,
        signer: Option<Name>,
        now: u64,
        max_ttl: u32,
    ) -> Self {
        let mut ttl = rrset.ttl().min(max_ttl);

        // a signature cannot vouch for data past its own validity
        for rrsig in rrset.rrsigs() {
            if let RData::RRSIG(rrsig) = rrsig.data() {
                let sig_remaining = u64::from(rrsig.sig_expiration).saturating_sub(now);
                ttl = ttl.min(sig_remaining.min(u64::from(u32::MAX)) as u32);
            }
        }

        Self {
            rrset,
            context,
            state,
            expiration: now + u64::from(ttl),
            signer,
        }
    }

    /// The records of the entry
    pub fn rrset(&self) -> &RecordSet {
        &self.rrset
    }

    /// Provenance of the entry
    pub fn context(&self) -> Context {
        self.context
    }

    /// The DNSSEC verdict of this specific entry
    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// Absolute expiry, seconds past the epoch
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// The signing zone, when known
    pub fn signer(&self) -> Option<&Name> {
        self.signer.as_ref()
    }

    /// True once the entry may no longer be served
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration <= now
    }

    /// Seconds of validity left at `now`
    pub fn ttl_remaining(&self, now: u64) -> u32 {
        self.expiration
            .saturating_sub(now)
            .min(u64::from(u32::MAX)) as u32
    }
}

type NsEvictHook = Box<dyn Fn(&Name) + Send + Sync>;

/// The RRset cache
///
/// Entries are evicted lazily on access once expired, and eagerly when a
/// superseding response is admitted. Eviction of an NS entry also drops
/// the nameserver-cache entry of that zone, through a hook wired at
/// startup; the two caches never reference each other's entries.
pub struct RRsetCache {
    map: ShardedMap<(String, u16), CachedRRset>,
    clock: Arc<dyn Clock>,
    max_ttl: u32,
    bogus_ttl_cap: u32,
    on_ns_evict: RwLock<Option<NsEvictHook>>,
}

impl RRsetCache {
    /// A cache capping positive TTLs at `max_ttl` and Bogus entries at
    /// `bogus_ttl_cap`
    pub fn new(clock: Arc<dyn Clock>, max_ttl: u32, bogus_ttl_cap: u32) -> Self {
        Self {
            map: ShardedMap::new(),
            clock,
            max_ttl,
            bogus_ttl_cap,
            on_ns_evict: RwLock::new(None),
        }
    }

    /// Wire the nameserver-cache invalidation hook
    pub fn set_ns_evict_hook(&self, hook: impl Fn(&Name) + Send + Sync + 'static) {
        *self.on_ns_evict.write() = Some(Box::new(hook));
    }

    fn key(name: &Name, record_type: RecordType) -> (String, u16) {
        (name.to_lowercase().to_string(), record_type.into())
    }

    fn notify_ns_evicted(&self, name: &Name) {
        if let Some(hook) = self.on_ns_evict.read().as_ref() {
            hook(name);
        }
    }

    /// Fetch the entry for `(name, record_type)`; expired entries are
    /// evicted in place and `None` is returned
    pub fn get(&self, name: &Name, record_type: RecordType) -> Option<CachedRRset> {
        let now = self.clock.unix_secs();
        let key = Self::key(name, record_type);

        let (hit, evicted) = self.map.get_or_evict(&key, |cached| cached.is_expired(now));

        if evicted {
            debug!("evicted expired {} {}", name, record_type);
            if record_type == RecordType::NS {
                self.notify_ns_evicted(name);
            }
        }
        hit
    }

    /// Fetch the "name does not exist" entry covering every type at `name`
    pub fn get_nxdomain(&self, name: &Name) -> Option<CachedRRset> {
        let now = self.clock.unix_secs();
        let key = (name.to_lowercase().to_string(), NXDOMAIN_TYPE_KEY);
        let (hit, _) = self.map.get_or_evict(&key, |cached| cached.is_expired(now));
        hit
    }

    /// Admit an RRset.
    ///
    /// The stored entry is overwritten when it has expired or when the new
    /// entry's verdict is at least as strong. A Bogus entry is admitted
    /// only over nothing or another Bogus entry, with its TTL capped, so a
    /// failing name does not hammer the network.
    ///
    /// TTL-zero sets are not cached; the caller serves them once.
    pub fn put(&self, entry: CachedRRset) -> bool {
        let now = self.clock.unix_secs();
        let mut entry = entry;

        if entry.state == ValidationState::Bogus {
            let cap = now + u64::from(self.bogus_ttl_cap);
            entry.expiration = entry.expiration.min(cap);
        }

        if entry.expiration <= now {
            return false;
        }

        let key = Self::key(entry.rrset.name(), entry.rrset.record_type());
        self.map.insert_if(key, entry, |stored, new| {
            stored.is_expired(now) || new.state.strength() >= stored.state.strength()
        })
    }

    /// Admit a negative entry, holding the proving SOA of the nearest
    /// authoritative ancestor. Its lifetime is the minimum of the SOA TTL
    /// and the SOA MINIMUM field.
    pub fn put_negative(
        &self,
        name: &Name,
        query_type: RecordType,
        soa: RecordSet,
        context: Context,
        state: ValidationState,
        signer: Option<Name>,
    ) -> bool {
        debug_assert!(context.is_negative());
        let now = self.clock.unix_secs();

        let minimum = soa
            .records()
            .find_map(|r| match r.data() {
                RData::SOA(soa) => Some(soa.minimum),
                _ => None,
            })
            .unwrap_or(0);
        let ttl = soa.ttl().min(minimum).min(self.max_ttl);
        if ttl == 0 {
            return false;
        }

        let mut soa = soa;
        soa.set_ttl(ttl);

        let type_key = match context {
            Context::NxDomain => NXDOMAIN_TYPE_KEY,
            _ => query_type.into(),
        };
        let key = (name.to_lowercase().to_string(), type_key);

        let mut entry = CachedRRset::new(soa, context, state, signer, now, self.max_ttl);
        if state == ValidationState::Bogus {
            entry.expiration = entry
                .expiration
                .min(now + u64::from(self.bogus_ttl_cap));
        }

        self.map.insert(key, entry);
        true
    }

    /// Drop the entry for `(name, record_type)`
    pub fn remove(&self, name: &Name, record_type: RecordType) -> Option<CachedRRset> {
        let removed = self.map.remove(&Self::key(name, record_type));
        if removed.is_some() && record_type == RecordType::NS {
            self.notify_ns_evicted(name);
        }
        removed
    }

    /// Snapshot for the dump surface: `("{owner}::{rrtype}", entry)` pairs
    pub fn iter_snapshot(&self) -> Vec<(String, CachedRRset)> {
        self.map
            .snapshot()
            .into_iter()
            .map(|((owner, rrtype), entry)| (format!("{owner}::{rrtype}"), entry))
            .collect()
    }

    /// Snapshot of the keys
    pub fn keys(&self) -> Vec<(String, u16)> {
        self.map.keys()
    }

    /// Number of live and not-yet-collected entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ironwood_proto::rr::rdata::{A, SOA};
    use ironwood_proto::rr::Record;

    use super::*;
    use crate::clock::FixedClock;

    const T0: u64 = 1_700_000_000;

    fn cache() -> (RRsetCache, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at(T0));
        (RRsetCache::new(clock.clone(), 86400, 60), clock)
    }

    fn a_rrset(name: &str, ttl: u32) -> RecordSet {
        let name = Name::from_str(name).unwrap();
        let mut rrset = RecordSet::new(name.clone(), RecordType::A);
        rrset.insert(Record::from_rdata(
            name,
            ttl,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        ));
        rrset
    }

    fn soa_rrset(zone: &str, ttl: u32, minimum: u32) -> RecordSet {
        let name = Name::from_str(zone).unwrap();
        let mut rrset = RecordSet::new(name.clone(), RecordType::SOA);
        rrset.insert(Record::from_rdata(
            name.clone(),
            ttl,
            RData::SOA(SOA {
                mname: Name::from_str("ns1.example.com.").unwrap(),
                rname: Name::from_str("hostmaster.example.com.").unwrap(),
                serial: 1,
                refresh: 7200,
                retry: 3600,
                expire: 1209600,
                minimum,
            }),
        ));
        rrset
    }

    #[test]
    fn test_put_get_round_trip() {
        let (cache, _clock) = cache();
        let rrset = a_rrset("www.example.com.", 3600);
        let entry = CachedRRset::new(
            rrset.clone(),
            Context::Answer,
            ValidationState::Insecure,
            None,
            T0,
            86400,
        );
        assert!(cache.put(entry));

        let name = Name::from_str("www.example.com.").unwrap();
        let hit = cache.get(&name, RecordType::A).unwrap();
        assert_eq!(hit.rrset(), &rrset);
        assert_eq!(hit.state(), ValidationState::Insecure);
    }

    #[test]
    fn test_expired_is_evicted_on_get() {
        let (cache, clock) = cache();
        let entry = CachedRRset::new(
            a_rrset("www.example.com.", 60),
            Context::Answer,
            ValidationState::Insecure,
            None,
            T0,
            86400,
        );
        cache.put(entry);

        clock.advance(61);
        let name = Name::from_str("www.example.com.").unwrap();
        assert!(cache.get(&name, RecordType::A).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_ttl_zero_not_cached() {
        let (cache, _clock) = cache();
        let entry = CachedRRset::new(
            a_rrset("www.example.com.", 0),
            Context::Answer,
            ValidationState::Insecure,
            None,
            T0,
            86400,
        );
        assert!(!cache.put(entry));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_ttl_capped_at_max() {
        let (cache, _clock) = cache();
        let entry = CachedRRset::new(
            a_rrset("www.example.com.", 1_000_000),
            Context::Answer,
            ValidationState::Insecure,
            None,
            T0,
            86400,
        );
        assert_eq!(entry.expiration(), T0 + 86400);
        cache.put(entry);
    }

    #[test]
    fn test_weaker_does_not_overwrite_secure() {
        let (cache, _clock) = cache();
        let secure = CachedRRset::new(
            a_rrset("www.example.com.", 3600),
            Context::Answer,
            ValidationState::Secure,
            Some(Name::from_str("example.com.").unwrap()),
            T0,
            86400,
        );
        cache.put(secure);

        let bogus = CachedRRset::new(
            a_rrset("www.example.com.", 3600),
            Context::Answer,
            ValidationState::Bogus,
            None,
            T0,
            86400,
        );
        assert!(!cache.put(bogus));

        let name = Name::from_str("www.example.com.").unwrap();
        assert_eq!(
            cache.get(&name, RecordType::A).unwrap().state(),
            ValidationState::Secure
        );
    }

    #[test]
    fn test_bogus_ttl_capped() {
        let (cache, _clock) = cache();
        let bogus = CachedRRset::new(
            a_rrset("bad.example.com.", 3600),
            Context::Answer,
            ValidationState::Bogus,
            None,
            T0,
            86400,
        );
        cache.put(bogus);

        let name = Name::from_str("bad.example.com.").unwrap();
        let hit = cache.get(&name, RecordType::A).unwrap();
        assert!(hit.expiration() <= T0 + 60);
    }

    #[test]
    fn test_negative_ttl_is_min_of_soa_ttl_and_minimum() {
        let (cache, _clock) = cache();
        let name = Name::from_str("nx.example.com.").unwrap();
        cache.put_negative(
            &name,
            RecordType::A,
            soa_rrset("example.com.", 3600, 300),
            Context::NxDomain,
            ValidationState::Secure,
            None,
        );

        let hit = cache.get_nxdomain(&name).unwrap();
        assert_eq!(hit.expiration(), T0 + 300);
        assert_eq!(hit.context(), Context::NxDomain);
    }

    #[test]
    fn test_nxdomain_covers_all_types() {
        let (cache, _clock) = cache();
        let name = Name::from_str("nx.example.com.").unwrap();
        cache.put_negative(
            &name,
            RecordType::A,
            soa_rrset("example.com.", 3600, 300),
            Context::NxDomain,
            ValidationState::Secure,
            None,
        );

        // no positive entry for any type, but the nxdomain marker hits
        assert!(cache.get(&name, RecordType::AAAA).is_none());
        assert!(cache.get_nxdomain(&name).is_some());
    }

    #[test]
    fn test_ns_eviction_fires_hook() {
        let (cache, clock) = cache();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_hook = fired.clone();
        cache.set_ns_evict_hook(move |_zone| {
            fired_in_hook.fetch_add(1, Ordering::SeqCst);
        });

        let zone = Name::from_str("example.com.").unwrap();
        let mut ns = RecordSet::new(zone.clone(), RecordType::NS);
        ns.insert(Record::from_rdata(
            zone.clone(),
            60,
            RData::NS(ironwood_proto::rr::rdata::NS(
                Name::from_str("ns1.example.com.").unwrap(),
            )),
        ));
        cache.put(CachedRRset::new(
            ns,
            Context::Referral,
            ValidationState::Insecure,
            None,
            T0,
            86400,
        ));

        clock.advance(120);
        assert!(cache.get(&zone, RecordType::NS).is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signature_bound_narrows_expiry() {
        use ironwood_proto::dnssec::Algorithm;
        use ironwood_proto::rr::rdata::RRSIG;

        let (_cache, _clock) = cache();
        let mut rrset = a_rrset("www.example.com.", 86400);
        rrset.insert_rrsig(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            86400,
            RData::RRSIG(RRSIG {
                type_covered: RecordType::A,
                algorithm: Algorithm::ECDSAP256SHA256,
                num_labels: 3,
                original_ttl: 86400,
                sig_expiration: (T0 + 600) as u32,
                sig_inception: (T0 - 600) as u32,
                key_tag: 1,
                signer_name: Name::from_str("example.com.").unwrap(),
                sig: vec![0; 64],
            }),
        ));

        let entry = CachedRRset::new(
            rrset,
            Context::Answer,
            ValidationState::Secure,
            Some(Name::from_str("example.com.").unwrap()),
            T0,
            86400,
        );
        assert_eq!(entry.expiration(), T0 + 600);
    }
}
