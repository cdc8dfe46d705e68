// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The authoritative-server cache: per-zone nameserver sets with learned
//! transport preferences, per-address failure backoff and counters

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use ironwood_proto::rr::rdata::TLSA;
use ironwood_proto::rr::Name;
use ironwood_proto::xfer::Transport;

use crate::cache::ShardedMap;
use crate::clock::Clock;

/// How a nameserver record was learned
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerSource {
    /// From the configured hints file
    Hint,
    /// From priming the root
    Priming,
    /// From a referral's authority section
    Referral,
    /// From an authoritative answer to an explicit NS query
    Authoritative,
}

/// Failure backoff state of one server address
#[derive(Clone, Debug, Default)]
pub struct AddressBackoff {
    /// Earliest instant the address may be contacted again, unix seconds
    pub next_try: u64,
    /// Consecutive failures
    pub failure_count: u32,
    /// The last failure, for the dump surface
    pub last_error: Option<String>,
}

/// One authoritative nameserver as the recursor knows it
#[derive(Clone, Debug)]
pub struct AuthServer {
    name: Name,
    source: ServerSource,
    addrs: Vec<IpAddr>,
    alpn: Vec<String>,
    transport_weights: HashMap<Transport, u8>,
    transport_signal_raw: Option<String>,
    tlsa_records: HashMap<String, Vec<TLSA>>,
    address_backoff: HashMap<IpAddr, AddressBackoff>,
    counters: HashMap<Transport, u64>,
    last_success_at: HashMap<Transport, u64>,
    srtt_micros: Option<u64>,
    port_override: Option<u16>,
}

impl AuthServer {
    /// A freshly learned server with no signals observed yet
    pub fn new(name: Name, source: ServerSource) -> Self {
        Self {
            name,
            source,
            addrs: Vec::new(),
            alpn: Vec::new(),
            transport_weights: HashMap::new(),
            transport_signal_raw: None,
            tlsa_records: HashMap::new(),
            address_backoff: HashMap::new(),
            counters: HashMap::new(),
            last_success_at: HashMap::new(),
            srtt_micros: None,
            port_override: None,
        }
    }

    /// The hostname of the server
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// How this server was learned
    pub fn source(&self) -> ServerSource {
        self.source
    }

    /// Known addresses, glue or resolved
    pub fn addrs(&self) -> &[IpAddr] {
        &self.addrs
    }

    /// Add an address, keeping the list duplicate-free
    pub fn add_addr(&mut self, addr: IpAddr) {
        if !self.addrs.contains(&addr) {
            self.addrs.push(addr);
        }
    }

    /// The raw ALPN tokens last signalled
    pub fn alpn(&self) -> &[String] {
        &self.alpn
    }

    /// Transports with any signalled weight
    pub fn transports(&self) -> Vec<Transport> {
        let mut transports: Vec<Transport> = self
            .transport_weights
            .iter()
            .filter(|(_, &w)| w > 0)
            .map(|(&t, _)| t)
            .collect();
        transports.sort_by_key(|t| u8::from(*t != Transport::Do53));
        transports
    }

    /// The signalled weight vector; empty means "Do53 = 100"
    pub fn transport_weights(&self) -> &HashMap<Transport, u8> {
        &self.transport_weights
    }

    /// The raw signal that produced the weights, for the dump surface
    pub fn transport_signal_raw(&self) -> Option<&str> {
        self.transport_signal_raw.as_deref()
    }

    /// Signalled alternative port, when any
    pub fn port_override(&self) -> Option<u16> {
        self.port_override
    }

    /// Cached DANE associations for `owner`
    pub fn tlsa_for(&self, owner: &Name) -> &[TLSA] {
        self.tlsa_records
            .get(&owner.to_lowercase().to_string())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Store a DANE association
    pub fn add_tlsa(&mut self, owner: &Name, tlsa: TLSA) {
        self.tlsa_records
            .entry(owner.to_lowercase().to_string())
            .or_default()
            .push(tlsa);
    }

    /// The backoff state of `addr`, when any failures were seen
    pub fn backoff(&self, addr: &IpAddr) -> Option<&AddressBackoff> {
        self.address_backoff.get(addr)
    }

    /// Per-transport query counters
    pub fn counters(&self) -> &HashMap<Transport, u64> {
        &self.counters
    }

    /// Smoothed round-trip time, used to order servers
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt_micros.map(Duration::from_micros)
    }

    /// True when `addr` is out of backoff at `now`
    pub fn should_try(&self, addr: &IpAddr, now: u64) -> bool {
        self.address_backoff
            .get(addr)
            .map(|b| b.next_try <= now)
            .unwrap_or(true)
    }

    /// Pick the transport for the next query, deterministically:
    /// the highest-weighted transport that is neither excluded for this
    /// request nor disabled, ties broken by the most recent success, then
    /// by Do53 first. An empty weight vector behaves as `Do53 = 100`.
    pub fn select_transport(
        &self,
        excluded: &HashSet<Transport>,
        enabled: &HashSet<Transport>,
    ) -> Transport {
        let weight_of = |t: Transport| -> u8 {
            if self.transport_weights.is_empty() {
                return if t == Transport::Do53 { 100 } else { 0 };
            }
            self.transport_weights.get(&t).copied().unwrap_or(0)
        };

        let mut best = Transport::Do53;
        let mut best_rank = (0u8, 0u64, 1u8);
        for t in Transport::all() {
            if excluded.contains(&t) || !enabled.contains(&t) {
                continue;
            }
            let rank = (
                weight_of(t),
                self.last_success_at.get(&t).copied().unwrap_or(0),
                u8::from(t == Transport::Do53),
            );
            if rank > best_rank {
                best = t;
                best_rank = rank;
            }
        }
        best
    }
}

/// Backoff schedule parameters
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// First retry delay
    pub base: Duration,
    /// Upper bound of the schedule
    pub cap: Duration,
    /// Jitter applied to each delay, plus or minus this percentage
    pub jitter_pct: u8,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(15 * 60),
            jitter_pct: 25,
        }
    }
}

impl BackoffPolicy {
    /// The delay before retry number `failure_count`, jittered
    fn delay_secs(&self, failure_count: u32) -> u64 {
        let base = self.base.as_secs().max(1);
        let exp = base.saturating_mul(1u64 << (failure_count.saturating_sub(1)).min(32));
        let capped = exp.min(self.cap.as_secs());

        if self.jitter_pct == 0 {
            return capped;
        }
        let spread = capped * u64::from(self.jitter_pct) / 100;
        if spread == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..=spread * 2);
        capped - spread + jitter
    }
}

/// The per-zone authoritative-server cache
pub struct NameServerCache {
    map: ShardedMap<String, HashMap<String, AuthServer>>,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
}

impl NameServerCache {
    /// A cache applying `backoff` to failing addresses
    pub fn new(clock: Arc<dyn Clock>, backoff: BackoffPolicy) -> Self {
        Self {
            map: ShardedMap::new(),
            clock,
            backoff,
        }
    }

    fn zone_key(zone: &Name) -> String {
        zone.to_lowercase().to_string()
    }

    fn server_key(server: &Name) -> String {
        server.to_lowercase().to_string()
    }

    /// The server set of `zone`, as a snapshot
    pub fn get_servers(&self, zone: &Name) -> Option<HashMap<String, AuthServer>> {
        self.map.get(&Self::zone_key(zone))
    }

    /// Admit or refresh a server of `zone`; addresses accumulate
    pub fn upsert_server(
        &self,
        zone: &Name,
        server: &Name,
        source: ServerSource,
        addrs: &[IpAddr],
    ) {
        let server_key = Self::server_key(server);
        let server_name = server.clone();
        self.map.upsert(Self::zone_key(zone), HashMap::new, |servers| {
            let entry = servers
                .entry(server_key.clone())
                .or_insert_with(|| AuthServer::new(server_name.clone(), source));
            for addr in addrs {
                entry.add_addr(*addr);
            }
        });
    }

    /// Record the outcome of one exchange: counters, backoff, srtt
    pub fn note_response(
        &self,
        zone: &Name,
        server: &Name,
        addr: IpAddr,
        transport: Transport,
        rtt: Option<Duration>,
        ok: bool,
    ) {
        let now = self.clock.unix_secs();
        self.with_server(zone, server, |entry| {
            *entry.counters.entry(transport).or_insert(0) += 1;
            if ok {
                entry.last_success_at.insert(transport, now);
                if let Some(rtt) = rtt {
                    let sample = rtt.as_micros().min(u128::from(u64::MAX)) as u64;
                    entry.srtt_micros = Some(match entry.srtt_micros {
                        // standard smoothed estimator, 7/8 old 1/8 new
                        Some(srtt) => (srtt * 7 + sample) / 8,
                        None => sample,
                    });
                }
                entry.address_backoff.remove(&addr);
            }
        });
    }

    /// Merge an SVCB-derived transport signal for `server`.
    ///
    /// Weights are percentages; each is clamped to 100 and the vector is
    /// scaled down when it sums past 100. Unsignalled mass falls through
    /// to Do53 at selection time.
    pub fn record_signal(
        &self,
        zone: &Name,
        server: &Name,
        weights: HashMap<Transport, u8>,
        alpn: Vec<String>,
        port: Option<u16>,
        raw: String,
    ) {
        let mut weights = weights;
        for w in weights.values_mut() {
            *w = (*w).min(100);
        }
        let total: u32 = weights.values().map(|&w| u32::from(w)).sum();
        if total > 100 {
            for w in weights.values_mut() {
                *w = ((u32::from(*w) * 100) / total) as u8;
            }
        }

        debug!("transport signal for {server}: {raw}");
        self.with_server(zone, server, |entry| {
            entry.transport_weights = weights;
            entry.alpn = alpn;
            entry.port_override = port;
            entry.transport_signal_raw = Some(raw);
        });
    }

    /// Store a DANE association for `server`
    pub fn record_tlsa(&self, zone: &Name, server: &Name, owner: &Name, tlsa: TLSA) {
        self.with_server(zone, server, |entry| entry.add_tlsa(owner, tlsa));
    }

    /// True when `addr` of `server` is out of backoff
    pub fn should_try(&self, zone: &Name, server: &Name, addr: &IpAddr) -> bool {
        let now = self.clock.unix_secs();
        self.map
            .get(&Self::zone_key(zone))
            .and_then(|servers| {
                servers
                    .get(&Self::server_key(server))
                    .map(|s| s.should_try(addr, now))
            })
            .unwrap_or(true)
    }

    /// Advance the failure backoff of `addr`
    pub fn on_failure(&self, zone: &Name, server: &Name, addr: IpAddr, error: &str) {
        let now = self.clock.unix_secs();
        let policy = self.backoff;
        self.with_server(zone, server, |entry| {
            let backoff = entry.address_backoff.entry(addr).or_default();
            backoff.failure_count += 1;
            backoff.next_try = now + policy.delay_secs(backoff.failure_count);
            backoff.last_error = Some(error.to_string());
        });
    }

    /// Clear the backoff of `addr` after a success
    pub fn on_success(&self, zone: &Name, server: &Name, addr: IpAddr) {
        self.with_server(zone, server, |entry| {
            entry.address_backoff.remove(&addr);
        });
    }

    /// Drop the whole server set of `zone`; wired to NS-entry eviction in
    /// the RRset cache
    pub fn remove_zone(&self, zone: &Name) {
        self.map.remove(&Self::zone_key(zone));
    }

    /// Snapshot for the dump surface
    pub fn iter_snapshot(&self) -> Vec<(String, HashMap<String, AuthServer>)> {
        self.map.snapshot()
    }

    /// Number of zones with a cached server set
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no server sets are cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_server(&self, zone: &Name, server: &Name, f: impl FnOnce(&mut AuthServer)) {
        let server_key = Self::server_key(server);
        let server_name = server.clone();
        self.map.upsert(Self::zone_key(zone), HashMap::new, |servers| {
            let entry = servers
                .entry(server_key)
                .or_insert_with(|| AuthServer::new(server_name, ServerSource::Referral));
            f(entry);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::clock::FixedClock;

    const T0: u64 = 1_700_000_000;

    fn cache() -> (NameServerCache, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::at(T0));
        let cache = NameServerCache::new(
            clock.clone(),
            BackoffPolicy {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(900),
                jitter_pct: 0,
            },
        );
        (cache, clock)
    }

    fn names() -> (Name, Name) {
        (
            Name::from_str("example.com.").unwrap(),
            Name::from_str("ns1.example.com.").unwrap(),
        )
    }

    fn addr() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    fn enabled_all() -> HashSet<Transport> {
        Transport::all().into_iter().collect()
    }

    #[test]
    fn test_upsert_and_get() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        let servers = cache.get_servers(&zone).unwrap();
        let entry = servers.get("ns1.example.com.").unwrap();
        assert_eq!(entry.addrs(), &[addr()]);
        assert_eq!(entry.source(), ServerSource::Referral);
    }

    #[test]
    fn test_backoff_schedule_is_exponential() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        cache.on_failure(&zone, &server, addr(), "timeout");
        let servers = cache.get_servers(&zone).unwrap();
        let b1 = servers["ns1.example.com."].backoff(&addr()).unwrap().clone();
        assert_eq!(b1.failure_count, 1);
        assert_eq!(b1.next_try, T0 + 1);

        cache.on_failure(&zone, &server, addr(), "timeout");
        cache.on_failure(&zone, &server, addr(), "timeout");
        let servers = cache.get_servers(&zone).unwrap();
        let b3 = servers["ns1.example.com."].backoff(&addr()).unwrap().clone();
        assert_eq!(b3.failure_count, 3);
        assert_eq!(b3.next_try, T0 + 4);
        assert_eq!(b3.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_backoff_gates_should_try() {
        let (cache, clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        assert!(cache.should_try(&zone, &server, &addr()));
        cache.on_failure(&zone, &server, addr(), "timeout");
        assert!(!cache.should_try(&zone, &server, &addr()));

        clock.advance(2);
        assert!(cache.should_try(&zone, &server, &addr()));
    }

    #[test]
    fn test_success_resets_backoff() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        cache.on_failure(&zone, &server, addr(), "timeout");
        cache.on_success(&zone, &server, addr());
        assert!(cache.should_try(&zone, &server, &addr()));

        let servers = cache.get_servers(&zone).unwrap();
        assert!(servers["ns1.example.com."].backoff(&addr()).is_none());
    }

    #[test]
    fn test_backoff_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(900),
            jitter_pct: 0,
        };
        assert_eq!(policy.delay_secs(1), 1);
        assert_eq!(policy.delay_secs(5), 16);
        assert_eq!(policy.delay_secs(30), 900);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(4),
            cap: Duration::from_secs(900),
            jitter_pct: 25,
        };
        for _ in 0..100 {
            let d = policy.delay_secs(1);
            assert!((3..=5).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[test]
    fn test_no_signal_selects_do53() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        let servers = cache.get_servers(&zone).unwrap();
        let selected =
            servers["ns1.example.com."].select_transport(&HashSet::new(), &enabled_all());
        assert_eq!(selected, Transport::Do53);
    }

    #[test]
    fn test_signal_drives_selection_and_exclusion_falls_back() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        let mut weights = HashMap::new();
        weights.insert(Transport::Dot, 100);
        cache.record_signal(
            &zone,
            &server,
            weights,
            vec!["dot".to_string()],
            Some(853),
            "alpn=dot port=853".to_string(),
        );

        let servers = cache.get_servers(&zone).unwrap();
        let entry = &servers["ns1.example.com."];
        assert_eq!(entry.transport_weights()[&Transport::Dot], 100);
        assert_eq!(
            entry.select_transport(&HashSet::new(), &enabled_all()),
            Transport::Dot
        );

        // a DoT failure within a request excludes it, falling back to Do53
        let excluded: HashSet<Transport> = [Transport::Dot].into_iter().collect();
        assert_eq!(
            entry.select_transport(&excluded, &enabled_all()),
            Transport::Do53
        );
    }

    #[test]
    fn test_overweight_vector_is_scaled() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        let mut weights = HashMap::new();
        weights.insert(Transport::Dot, 90);
        weights.insert(Transport::Doq, 90);
        cache.record_signal(&zone, &server, weights, vec![], None, "raw".to_string());

        let servers = cache.get_servers(&zone).unwrap();
        let stored = servers["ns1.example.com."].transport_weights();
        let total: u32 = stored.values().map(|&w| u32::from(w)).sum();
        assert!(total <= 100, "weights sum {total} over 100");
        assert!(stored.values().all(|&w| w <= 100));
    }

    #[test]
    fn test_counters_accumulate() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);

        cache.note_response(
            &zone,
            &server,
            addr(),
            Transport::Do53,
            Some(Duration::from_millis(12)),
            true,
        );
        cache.note_response(&zone, &server, addr(), Transport::Do53, None, false);

        let servers = cache.get_servers(&zone).unwrap();
        let entry = &servers["ns1.example.com."];
        assert_eq!(entry.counters()[&Transport::Do53], 2);
        assert!(entry.srtt().is_some());
    }

    #[test]
    fn test_remove_zone() {
        let (cache, _clock) = cache();
        let (zone, server) = names();
        cache.upsert_server(&zone, &server, ServerSource::Referral, &[addr()]);
        cache.remove_zone(&zone);
        assert!(cache.get_servers(&zone).is_none());
    }
}
