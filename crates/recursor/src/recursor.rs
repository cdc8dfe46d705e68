// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The recursion engine: iterative resolution from the root with cache
//! consultation, transport selection, failure backoff and DNSSEC
//! validation on admission

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_recursion::async_recursion;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ironwood_proto::dnssec::ValidationState;
use ironwood_proto::op::{Edns, Message, Query, ResponseCode};
use ironwood_proto::rr::rdata::RData;
use ironwood_proto::rr::{Name, Record, RecordSet, RecordType};
use ironwood_proto::xfer::{self, ExchangeOpts, Transport};
use ironwood_proto::ProtoErrorKind;

use crate::cache::{
    CachedRRset, Context, DnskeyCache, NameServerCache, RRsetCache, ServerSource, ZoneCache,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{RecursorConfig, RootHints};
use crate::error::{Error, ErrorKind, Result};
use crate::validator::{proof, Validator};

/// One request entering the engine over the in-process channel
#[derive(Debug)]
pub struct Request {
    /// Name to resolve, presentation format
    pub qname: String,
    /// Query class, normally 1 (IN)
    pub qclass: u16,
    /// Query type code
    pub qtype: u16,
    /// Where the response is delivered
    pub response: oneshot::Sender<Response>,
}

/// The response delivered for a [`Request`]
#[derive(Clone, Debug)]
pub struct Response {
    /// The resolved records, absent on negative answers and errors
    pub rrset: Option<RecordSet>,
    /// Provenance of the answer
    pub context: Option<Context>,
    /// True when the answer chain validated Secure
    pub validated: bool,
    /// True when resolution failed
    pub error: bool,
    /// The failure, when `error`
    pub error_msg: String,
    /// Human-oriented detail
    pub msg: String,
}

/// Outcome of one resolution
#[derive(Clone, Debug)]
pub struct Lookup {
    /// The records answering the question; the proving SOA for negatives
    pub rrset: Option<RecordSet>,
    /// Provenance of the answer
    pub context: Context,
    /// The DNSSEC verdict for the answer
    pub state: ValidationState,
}

/// The wire dependency of the engine; the real implementation sends
/// queries, tests script replies
#[async_trait]
pub trait DnsExchanger: Send + Sync + 'static {
    /// One query over one transport, as [`xfer::exchange`]
    async fn exchange(
        &self,
        message: &Message,
        server: IpAddr,
        transport: Transport,
        port: u16,
        opts: &ExchangeOpts,
    ) -> ironwood_proto::ProtoResult<(Message, Duration)>;
}

/// The production exchanger, dispatching over the real transports
#[derive(Clone, Copy, Debug, Default)]
pub struct WireExchanger;

#[async_trait]
impl DnsExchanger for WireExchanger {
    async fn exchange(
        &self,
        message: &Message,
        server: IpAddr,
        transport: Transport,
        port: u16,
        opts: &ExchangeOpts,
    ) -> ironwood_proto::ProtoResult<(Message, Duration)> {
        xfer::exchange(message, server, transport, port, opts).await
    }
}

/// Builder for a [`Recursor`]
pub struct RecursorBuilder {
    config: RecursorConfig,
    hints: Option<RootHints>,
    clock: Option<Arc<dyn Clock>>,
}

impl RecursorBuilder {
    /// Use the given configuration
    pub fn config(mut self, config: RecursorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use pre-parsed hints instead of reading the configured file
    pub fn hints(mut self, hints: RootHints) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Inject a clock; tests use a virtual one
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build with the production wire client
    pub fn build(self) -> Result<Recursor<WireExchanger>> {
        self.build_with_exchanger(WireExchanger)
    }

    /// Build with a custom exchanger
    pub fn build_with_exchanger<E: DnsExchanger>(self, exchanger: E) -> Result<Recursor<E>> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let config = self.config;

        let hints = match self.hints {
            Some(hints) => hints,
            None => config.read_roots(None)?,
        };

        let enabled_transports = config.transports.enabled()?;

        let rrsets = Arc::new(RRsetCache::new(
            clock.clone(),
            config.max_ttl,
            config.bogus_ttl_cap,
        ));
        let nameservers = Arc::new(NameServerCache::new(clock.clone(), config.backoff.into()));
        let dnskeys = Arc::new(DnskeyCache::new(clock.clone()));
        let zones = Arc::new(ZoneCache::new(clock.clone()));

        // evicting an NS entry invalidates the zone's server set
        let ns_cache = nameservers.clone();
        rrsets.set_ns_evict_hook(move |zone| ns_cache.remove_zone(zone));

        for line in &config.trust_anchors {
            let (owner, _ttl, dnskey) = crate::config::parse_dnskey_rr(line)?;
            let tag = ironwood_proto::dnssec::key_tag(&dnskey)
                .map_err(|e| Error::from(ErrorKind::Config(format!("bad anchor: {e}"))))?;
            info!("seeding trust anchor for {owner} tag {tag}");
            dnskeys.insert_trust_anchor(owner, tag, dnskey);
        }

        let validator = Validator::new(
            dnskeys.clone(),
            zones.clone(),
            clock.clone(),
            config.clock_skew,
        );

        Ok(Recursor {
            config,
            enabled_transports,
            hints,
            rrsets,
            nameservers,
            dnskeys,
            zones,
            validator,
            clock,
            exchanger,
        })
    }
}

/// Per-request mutable state threaded through the recursion
struct RequestState {
    deadline: Instant,
    depth: u8,
    cname_hops: u8,
    visited_zones: HashSet<String>,
    excluded_transports: HashMap<String, HashSet<Transport>>,
}

impl RequestState {
    fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            depth: 0,
            cname_hops: 0,
            visited_zones: HashSet::new(),
            excluded_transports: HashMap::new(),
        }
    }

    fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(ErrorKind::DeadlineExceeded.into());
        }
        Ok(())
    }

    fn exclusions(&mut self, server: &Name) -> &mut HashSet<Transport> {
        self.excluded_transports
            .entry(server.to_lowercase().to_string())
            .or_default()
    }

    /// A sub-lookup shares the deadline but starts its own zone walk
    fn sub_state(&self) -> Self {
        Self {
            deadline: self.deadline,
            depth: self.depth.saturating_add(1),
            cname_hops: 0,
            visited_zones: HashSet::new(),
            excluded_transports: HashMap::new(),
        }
    }
}

/// How one reply answers the outstanding question
#[derive(Clone, Debug, Eq, PartialEq)]
enum ReplyKind {
    /// The answer section holds the queried type at the queried name
    Answer,
    /// The answer rewrites the question to a new name
    Cname(Name),
    /// Delegation toward a descendant zone
    Referral(Name),
    /// The name does not exist
    NxDomain,
    /// The name exists without the queried type
    NoData,
    /// A response that helps nothing; try elsewhere
    Failed(ResponseCode),
}

/// The Iterative Mode Resolver: owns the caches and drives resolution
/// from the deepest cached delegation toward the authoritative answer
pub struct Recursor<E: DnsExchanger = WireExchanger> {
    config: RecursorConfig,
    enabled_transports: HashSet<Transport>,
    hints: RootHints,
    rrsets: Arc<RRsetCache>,
    nameservers: Arc<NameServerCache>,
    dnskeys: Arc<DnskeyCache>,
    zones: Arc<ZoneCache>,
    validator: Validator,
    clock: Arc<dyn Clock>,
    exchanger: E,
}

impl Recursor<WireExchanger> {
    /// Start building a recursor
    pub fn builder() -> RecursorBuilder {
        RecursorBuilder {
            config: RecursorConfig::default(),
            hints: None,
            clock: None,
        }
    }
}

impl<E: DnsExchanger> Recursor<E> {
    /// Resolve one question, consulting the caches first and recursing
    /// from the deepest cached delegation otherwise
    pub async fn resolve(&self, qname: &Name, qtype: RecordType) -> Result<Lookup> {
        let deadline = Instant::now() + self.config.request_timeout();
        let mut state = RequestState::new(deadline);

        match tokio::time::timeout_at(deadline, self.resolve_inner(qname, qtype, &mut state))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::DeadlineExceeded.into()),
        }
    }

    /// Serve requests arriving over the in-process channel until it closes
    pub async fn serve(self: Arc<Self>, mut requests: mpsc::Receiver<Request>) {
        while let Some(request) = requests.recv().await {
            let engine = self.clone();
            tokio::spawn(async move {
                let response = engine.handle_request(&request).await;
                if request.response.send(response).is_err() {
                    debug!("requester went away for {}", request.qname);
                }
            });
        }
    }

    async fn handle_request(&self, request: &Request) -> Response {
        let qname = match request.qname.parse::<Name>() {
            Ok(name) => name,
            Err(e) => {
                return Response {
                    rrset: None,
                    context: None,
                    validated: false,
                    error: true,
                    error_msg: format!("bad qname: {e}"),
                    msg: String::new(),
                };
            }
        };
        if request.qclass != 1 {
            return Response {
                rrset: None,
                context: None,
                validated: false,
                error: true,
                error_msg: format!("unsupported qclass: {}", request.qclass),
                msg: String::new(),
            };
        }
        let qtype = RecordType::from(request.qtype);

        match self.resolve(&qname, qtype).await {
            Ok(lookup) => Response {
                validated: lookup.state == ValidationState::Secure,
                msg: format!("{} {} {}", qname, qtype, lookup.state),
                rrset: lookup.rrset,
                context: Some(lookup.context),
                error: false,
                error_msg: String::new(),
            },
            Err(e) => Response {
                rrset: None,
                context: None,
                validated: false,
                error: true,
                error_msg: e.to_string(),
                msg: format!("{} {} SERVFAIL", qname, qtype),
            },
        }
    }

    #[async_recursion]
    async fn resolve_inner(
        &self,
        qname: &Name,
        qtype: RecordType,
        state: &mut RequestState,
    ) -> Result<Lookup> {
        state.check_deadline()?;
        let qname = qname.to_lowercase();

        if let Some(lookup) = self.lookup_cache(&qname, qtype) {
            debug!("cache hit {} {}", qname, qtype);
            return self.follow_cname(lookup, &qname, qtype, state).await;
        }

        let mut current_zone = self.deepest_zone_cut(&qname, state).await?;
        debug!("resolving {} {} from zone {}", qname, qtype, current_zone);

        let mut referrals = 0u8;
        loop {
            state.check_deadline()?;

            if !state
                .visited_zones
                .insert(current_zone.to_lowercase().to_string())
            {
                warn!("delegation loop through {current_zone} for {qname}");
                return Err(ErrorKind::CycleDetected(current_zone.to_string()).into());
            }
            referrals += 1;
            if referrals > self.config.max_depth {
                return Err(ErrorKind::DepthExceeded(self.config.max_depth).into());
            }

            let reply = self.query_zone(&current_zone, &qname, qtype, state).await?;

            self.learn_signals(&current_zone, &reply);

            match self.classify(&reply, &qname, qtype, &current_zone) {
                ReplyKind::Answer => {
                    let lookup = self
                        .admit_answer(&reply, &qname, qtype, &current_zone, state)
                        .await?;
                    return Ok(lookup);
                }
                ReplyKind::Cname(target) => {
                    let lookup = self
                        .admit_answer(&reply, &qname, RecordType::CNAME, &current_zone, state)
                        .await?;
                    if qtype == RecordType::CNAME {
                        return Ok(lookup);
                    }
                    state.cname_hops += 1;
                    if state.cname_hops > self.config.max_cname_chain {
                        return Err(
                            ErrorKind::CnameChainExceeded(self.config.max_cname_chain).into()
                        );
                    }
                    debug!("following CNAME {} -> {}", qname, target);
                    // the target is a fresh walk; zones visited for the
                    // old name do not make a loop
                    state.visited_zones.clear();
                    return self.resolve_inner(&target, qtype, state).await;
                }
                ReplyKind::Referral(child_zone) => {
                    self.admit_referral(&reply, &child_zone, &current_zone, state)
                        .await?;
                    debug!("referral {} -> {}", current_zone, child_zone);
                    current_zone = child_zone;
                }
                ReplyKind::NxDomain => {
                    return self
                        .admit_negative(&reply, &qname, qtype, Context::NxDomain, state)
                        .await;
                }
                ReplyKind::NoData => {
                    return self
                        .admit_negative(&reply, &qname, qtype, Context::NoErrNoAns, state)
                        .await;
                }
                ReplyKind::Failed(rcode) => {
                    // treated as no answer from this zone; a different
                    // server may have answered, query_zone already rotated
                    return Err(ErrorKind::Protocol(format!(
                        "rcode {rcode} from servers of {current_zone}"
                    ))
                    .into());
                }
            }
        }
    }

    /// Serve from cache: NXDOMAIN marker first, the exact type, then CNAME
    fn lookup_cache(&self, qname: &Name, qtype: RecordType) -> Option<Lookup> {
        if let Some(entry) = self.rrsets.get_nxdomain(qname) {
            return Some(Lookup {
                rrset: Some(entry.rrset().clone()),
                context: Context::NxDomain,
                state: entry.state(),
            });
        }

        if let Some(entry) = self.rrsets.get(qname, qtype) {
            return Some(Lookup {
                rrset: (!entry.context().is_negative()).then(|| entry.rrset().clone()),
                context: entry.context(),
                state: entry.state(),
            });
        }

        if qtype != RecordType::CNAME {
            if let Some(entry) = self.rrsets.get(qname, RecordType::CNAME) {
                return Some(Lookup {
                    rrset: Some(entry.rrset().clone()),
                    context: entry.context(),
                    state: entry.state(),
                });
            }
        }
        None
    }

    /// A cache hit on a CNAME still needs the chain followed
    async fn follow_cname(
        &self,
        lookup: Lookup,
        qname: &Name,
        qtype: RecordType,
        state: &mut RequestState,
    ) -> Result<Lookup> {
        if qtype == RecordType::CNAME || lookup.rrset.is_none() {
            return Ok(lookup);
        }
        let rrset = lookup.rrset.as_ref().expect("checked above");
        if rrset.record_type() != RecordType::CNAME {
            return Ok(lookup);
        }

        let Some(target) = rrset.records().find_map(|r| match r.data() {
            RData::CNAME(cname) => Some(cname.0.clone()),
            _ => None,
        }) else {
            return Ok(lookup);
        };

        state.cname_hops += 1;
        if state.cname_hops > self.config.max_cname_chain {
            return Err(ErrorKind::CnameChainExceeded(self.config.max_cname_chain).into());
        }
        debug!("cached CNAME {} -> {}", qname, target);
        state.visited_zones.clear();
        self.resolve_inner(&target, qtype, state).await
    }

    /// The deepest zone with a cached NS entry at or above `qname`,
    /// priming the root when nothing at all is cached
    async fn deepest_zone_cut(&self, qname: &Name, state: &mut RequestState) -> Result<Name> {
        let mut candidate = qname.clone();
        loop {
            if !candidate.is_root() {
                if self.rrsets.get(&candidate, RecordType::NS).is_some() {
                    return Ok(candidate);
                }
                candidate = candidate.base_name();
                continue;
            }

            if self.rrsets.get(&Name::root(), RecordType::NS).is_none() {
                self.prime_root(state).await?;
            }
            return Ok(Name::root());
        }
    }

    /// Seed the root NS set from the hints, then refresh it with a real
    /// priming query so the cached set is the authoritative one
    async fn prime_root(&self, state: &mut RequestState) -> Result<()> {
        info!("priming root from hints");
        let now = self.clock.unix_secs();

        let mut ns_set = RecordSet::new(Name::root(), RecordType::NS);
        for record in &self.hints.ns_records {
            ns_set.insert(record.clone());
        }
        self.rrsets.put(CachedRRset::new(
            ns_set.clone(),
            Context::Hint,
            ValidationState::Indeterminate,
            None,
            now,
            self.config.max_ttl,
        ));

        for record in &self.hints.ns_records {
            if let RData::NS(ns) = record.data() {
                let addrs = self.hints.addrs_of(&ns.0);
                self.nameservers
                    .upsert_server(&Name::root(), &ns.0, ServerSource::Hint, &addrs);
            }
        }
        for record in &self.hints.addr_records {
            let mut glue = RecordSet::new(record.name().clone(), record.record_type());
            glue.insert(record.clone());
            self.rrsets.put(CachedRRset::new(
                glue,
                Context::Hint,
                ValidationState::Indeterminate,
                None,
                now,
                self.config.max_ttl,
            ));
        }

        // the actual priming query; on failure the hints still stand
        match self
            .query_zone(&Name::root(), &Name::root(), RecordType::NS, state)
            .await
        {
            Ok(reply) => {
                let sets = group_rrsets(reply.answers());
                for rrset in sets {
                    if rrset.record_type() != RecordType::NS {
                        continue;
                    }
                    let verdict = self
                        .ensure_validated(&rrset, &Name::root(), state)
                        .await;
                    self.rrsets.put(CachedRRset::new(
                        rrset.clone(),
                        Context::Priming,
                        verdict,
                        signer_of(&rrset),
                        self.clock.unix_secs(),
                        self.config.max_ttl,
                    ));
                    for record in rrset.records() {
                        if let RData::NS(ns) = record.data() {
                            self.nameservers.upsert_server(
                                &Name::root(),
                                &ns.0,
                                ServerSource::Priming,
                                &[],
                            );
                        }
                    }
                }
                self.admit_glue(&reply, &Name::root());
            }
            Err(e) => warn!("priming query failed, serving from hints: {e}"),
        }
        Ok(())
    }

    /// Query the servers of `zone` for `(qname, qtype)`, rotating through
    /// servers, addresses and transports until one answers
    async fn query_zone(
        &self,
        zone: &Name,
        qname: &Name,
        qtype: RecordType,
        state: &mut RequestState,
    ) -> Result<Message> {
        let servers = self.servers_for_zone(zone, state).await?;
        if servers.is_empty() {
            return Err(ErrorKind::ServersExhausted(zone.to_string()).into());
        }

        let now = self.clock.unix_secs();
        let mut attempted = false;
        let mut last_error: Option<Error> = None;

        for server in &servers {
            for addr in server.addrs() {
                if !server.should_try(addr, now) {
                    continue;
                }
                attempted = true;
                match self
                    .query_one_server(zone, server.name(), *addr, qname, qtype, state)
                    .await
                {
                    // a bad rcode is no answer from this server; rotate
                    Ok(reply) if bad_rcode(&reply) => {
                        debug!(
                            "rcode {} from {} for {qname}, trying next server",
                            reply.response_code(),
                            server.name()
                        );
                        last_error = Some(
                            ErrorKind::Protocol(format!(
                                "rcode {} from {}",
                                reply.response_code(),
                                server.name()
                            ))
                            .into(),
                        );
                    }
                    Ok(reply) => return Ok(reply),
                    Err(e) => last_error = Some(e),
                }
                state.check_deadline()?;
            }
        }

        // floor-opening: with every address in backoff and nowhere deeper
        // to go, one attempt is still made rather than stalling the request
        if !attempted && state.depth == 0 {
            if let Some((server, addr)) = servers
                .iter()
                .find_map(|s| s.addrs().first().map(|a| (s, *a)))
            {
                debug!("all addresses of {zone} in backoff, opening the floor");
                match self
                    .query_one_server(zone, server.name(), addr, qname, qtype, state)
                    .await
                {
                    Ok(reply) => return Ok(reply),
                    Err(e) => last_error = Some(e),
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ErrorKind::ServersExhausted(zone.to_string()).into()))
    }

    /// One server, one address: transport selection with in-request
    /// fallback toward Do53
    async fn query_one_server(
        &self,
        zone: &Name,
        server: &Name,
        addr: IpAddr,
        qname: &Name,
        qtype: RecordType,
        state: &mut RequestState,
    ) -> Result<Message> {
        loop {
            state.check_deadline()?;

            let excluded = state.exclusions(server).clone();
            let entry = self
                .nameservers
                .get_servers(zone)
                .and_then(|servers| servers.get(&server.to_lowercase().to_string()).cloned());

            let (transport, port, opts) = match &entry {
                Some(entry) => {
                    let transport = entry.select_transport(&excluded, &self.enabled_transports);
                    let port = entry
                        .port_override()
                        .filter(|_| transport != Transport::Do53)
                        .unwrap_or_else(|| transport.default_port());
                    let opts = ExchangeOpts {
                        udp_timeout: Duration::from_secs(2).min(self.config.query_timeout()),
                        tcp_timeout: self.config.query_timeout(),
                        udp_payload_size: self.config.udp_buffer_size,
                        server_name: Some(entry.name().to_string().trim_end_matches('.').to_string()),
                        tlsa_records: entry.tlsa_for(server).to_vec(),
                        doh_path: "/dns-query".to_string(),
                    };
                    (transport, port, opts)
                }
                None => (
                    Transport::Do53,
                    Transport::Do53.default_port(),
                    ExchangeOpts {
                        udp_timeout: Duration::from_secs(2).min(self.config.query_timeout()),
                        tcp_timeout: self.config.query_timeout(),
                        udp_payload_size: self.config.udp_buffer_size,
                        ..ExchangeOpts::default()
                    },
                ),
            };

            let message = self.build_query(qname, qtype);
            debug!("query {} {} via {} at {} ({})", qname, qtype, transport, addr, server);

            match self
                .exchanger
                .exchange(&message, addr, transport, port, &opts)
                .await
            {
                Ok((reply, rtt)) => {
                    self.nameservers
                        .note_response(zone, server, addr, transport, Some(rtt), true);
                    return Ok(reply);
                }
                Err(e) => {
                    self.nameservers
                        .note_response(zone, server, addr, transport, None, false);
                    match e.kind() {
                        ProtoErrorKind::TlsHandshake(_) | ProtoErrorKind::Protocol(_)
                            if transport != Transport::Do53 =>
                        {
                            // downgrade for this server within this request
                            debug!("{transport} to {server} failed, downgrading: {e}");
                            state.exclusions(server).insert(transport);
                            continue;
                        }
                        _ => {
                            self.nameservers
                                .on_failure(zone, server, addr, &e.to_string());
                            state.exclusions(server).insert(transport);
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    /// The server set of `zone`, resolving missing addresses where needed
    async fn servers_for_zone(
        &self,
        zone: &Name,
        state: &mut RequestState,
    ) -> Result<Vec<crate::cache::AuthServer>> {
        if self.nameservers.get_servers(zone).is_none() {
            // rebuild from the cached NS entry, e.g. after an eviction
            if let Some(entry) = self.rrsets.get(zone, RecordType::NS) {
                for record in entry.rrset().records() {
                    if let RData::NS(ns) = record.data() {
                        let mut addrs = Vec::new();
                        for rtype in [RecordType::A, RecordType::AAAA] {
                            if let Some(glue) = self.rrsets.get(&ns.0, rtype) {
                                addrs.extend(
                                    glue.rrset().records().filter_map(|r| r.data().ip_addr()),
                                );
                            }
                        }
                        self.nameservers.upsert_server(
                            zone,
                            &ns.0,
                            ServerSource::Referral,
                            &addrs,
                        );
                    }
                }
            }
        }

        let Some(servers) = self.nameservers.get_servers(zone) else {
            return Err(ErrorKind::ServersExhausted(zone.to_string()).into());
        };

        let mut servers: Vec<crate::cache::AuthServer> = servers.into_values().collect();

        // resolve addresses for a couple of glueless servers, depth-bounded
        let mut resolved_budget = 2u8;
        if servers.iter().all(|s| s.addrs().is_empty()) {
            let names: Vec<Name> = servers.iter().map(|s| s.name().clone()).collect();
            for name in names {
                if resolved_budget == 0 || state.depth >= self.config.max_depth {
                    break;
                }
                resolved_budget -= 1;
                let mut sub = state.sub_state();
                match self.resolve_inner(&name, RecordType::A, &mut sub).await {
                    Ok(lookup) => {
                        if let Some(rrset) = lookup.rrset {
                            let addrs: Vec<IpAddr> =
                                rrset.records().filter_map(|r| r.data().ip_addr()).collect();
                            self.nameservers.upsert_server(
                                zone,
                                &name,
                                ServerSource::Referral,
                                &addrs,
                            );
                        }
                    }
                    Err(e) => debug!("glueless server {name} did not resolve: {e}"),
                }
            }
            servers = self
                .nameservers
                .get_servers(zone)
                .map(|s| s.into_values().collect())
                .unwrap_or_default();
        }

        // deterministic order: measured RTT first, name order as tie-break
        servers.sort_by(|a, b| {
            let a_rtt = a.srtt().unwrap_or(Duration::MAX);
            let b_rtt = b.srtt().unwrap_or(Duration::MAX);
            a_rtt
                .cmp(&b_rtt)
                .then_with(|| a.name().cmp(b.name()))
        });
        Ok(servers)
    }

    fn build_query(&self, qname: &Name, qtype: RecordType) -> Message {
        let mut message = Message::query();
        message.add_query(Query::query(qname.clone(), qtype));
        message.set_recursion_desired(false);
        let mut edns = Edns::default();
        edns.max_payload = self.config.udp_buffer_size;
        edns.dnssec_ok = true;
        message.set_edns(edns);
        message
    }

    /// Classify a reply against the outstanding question
    fn classify(
        &self,
        reply: &Message,
        qname: &Name,
        qtype: RecordType,
        current_zone: &Name,
    ) -> ReplyKind {
        match reply.response_code() {
            ResponseCode::NXDomain => return ReplyKind::NxDomain,
            ResponseCode::NoError => {}
            rcode => return ReplyKind::Failed(rcode),
        }

        let direct = reply
            .answers()
            .iter()
            .any(|r| r.name() == qname && r.record_type() == qtype);
        if direct {
            return ReplyKind::Answer;
        }

        if let Some(target) = reply.answers().iter().find_map(|r| match r.data() {
            RData::CNAME(cname) if r.name() == qname => Some(cname.0.clone()),
            _ => None,
        }) {
            return ReplyKind::Cname(target);
        }

        // a referral delegates strictly deeper than the zone we asked
        if !reply.authoritative() {
            let ns_owner = reply
                .authorities()
                .iter()
                .find(|r| {
                    r.record_type() == RecordType::NS
                        && r.name().zone_of(qname)
                        && r.name().num_labels() > current_zone.num_labels()
                })
                .map(|r| r.name().clone());
            if let Some(child) = ns_owner {
                return ReplyKind::Referral(child);
            }
        }

        let has_soa = reply
            .authorities()
            .iter()
            .any(|r| r.record_type() == RecordType::SOA);
        if has_soa || reply.authoritative() {
            return ReplyKind::NoData;
        }

        ReplyKind::Failed(ResponseCode::NoError)
    }

    /// Admit the answer sections of a reply, validate, and build the lookup
    async fn admit_answer(
        &self,
        reply: &Message,
        qname: &Name,
        qtype: RecordType,
        zone: &Name,
        state: &mut RequestState,
    ) -> Result<Lookup> {
        let now = self.clock.unix_secs();
        let sets = group_rrsets(reply.answers());

        let mut result: Option<(RecordSet, ValidationState)> = None;
        for rrset in sets {
            let verdict = self.ensure_validated(&rrset, zone, state).await;
            if verdict == ValidationState::Bogus {
                // cached briefly to suppress re-query storms
                self.rrsets.put(CachedRRset::new(
                    rrset.clone(),
                    Context::Answer,
                    ValidationState::Bogus,
                    signer_of(&rrset),
                    now,
                    self.config.max_ttl,
                ));
                return Err(ErrorKind::ValidationBogus(format!(
                    "{} {}",
                    rrset.name(),
                    rrset.record_type()
                ))
                .into());
            }

            let matches_question =
                rrset.name() == qname && rrset.record_type() == qtype;
            if rrset.ttl() > 0 {
                self.rrsets.put(CachedRRset::new(
                    rrset.clone(),
                    Context::Answer,
                    verdict,
                    signer_of(&rrset),
                    now,
                    self.config.max_ttl,
                ));
            }
            if matches_question {
                result = Some((rrset, verdict));
            }
        }

        self.admit_glue(reply, zone);

        let (rrset, verdict) = result.ok_or_else(|| {
            Error::from(ErrorKind::Protocol(
                "answer section lost the queried set".to_string(),
            ))
        })?;
        Ok(Lookup {
            rrset: Some(rrset),
            context: Context::Answer,
            state: verdict,
        })
    }

    /// Record a referral: the child NS set, its glue, and the server map
    async fn admit_referral(
        &self,
        reply: &Message,
        child_zone: &Name,
        parent_zone: &Name,
        state: &mut RequestState,
    ) -> Result<()> {
        let now = self.clock.unix_secs();
        let sets = group_rrsets(reply.authorities());

        for rrset in sets {
            if rrset.record_type() != RecordType::NS || rrset.name() != child_zone {
                continue;
            }
            // the delegation NS set is served from the parent side and is
            // legitimately unsigned; it validates only when signed
            let verdict = if rrset.rrsigs().is_empty() {
                ValidationState::Indeterminate
            } else {
                self.ensure_validated(&rrset, parent_zone, state).await
            };

            self.rrsets.put(CachedRRset::new(
                rrset.clone(),
                Context::Referral,
                verdict,
                signer_of(&rrset),
                now,
                self.config.max_ttl,
            ));

            for record in rrset.records() {
                if let RData::NS(ns) = record.data() {
                    self.nameservers.upsert_server(
                        child_zone,
                        &ns.0,
                        ServerSource::Referral,
                        &[],
                    );
                }
            }
        }

        self.admit_glue(reply, child_zone);

        // a referral into a signed parent carries DS or proves its absence
        let ds_sets = group_rrsets(reply.authorities());
        for rrset in ds_sets {
            if rrset.record_type() == RecordType::DS && rrset.name() == child_zone {
                let verdict = self.ensure_validated(&rrset, parent_zone, state).await;
                if verdict == ValidationState::Secure {
                    self.zones.set_ds(child_zone, Some(rrset.clone()));
                }
                self.rrsets.put(CachedRRset::new(
                    rrset,
                    Context::Referral,
                    verdict,
                    Some(parent_zone.clone()),
                    now,
                    self.config.max_ttl,
                ));
            }
        }

        Ok(())
    }

    /// Glue from the additional section, admitted under Glue context and
    /// attached to the zone's server entries
    fn admit_glue(&self, reply: &Message, zone: &Name) {
        let now = self.clock.unix_secs();
        let sets = group_rrsets(reply.additionals());
        let servers = self.nameservers.get_servers(zone);

        for rrset in sets {
            if !matches!(rrset.record_type(), RecordType::A | RecordType::AAAA) {
                continue;
            }
            // only in-bailiwick glue is trusted enough to cache
            if !zone.zone_of(rrset.name()) {
                continue;
            }
            if rrset.ttl() > 0 {
                self.rrsets.put(CachedRRset::new(
                    rrset.clone(),
                    Context::Glue,
                    ValidationState::Indeterminate,
                    None,
                    now,
                    self.config.max_ttl,
                ));
            }

            if let Some(servers) = &servers {
                if servers.contains_key(&rrset.name().to_lowercase().to_string()) {
                    let addrs: Vec<IpAddr> = rrset
                        .records()
                        .filter_map(|r| r.data().ip_addr())
                        .collect();
                    self.nameservers.upsert_server(
                        zone,
                        rrset.name(),
                        ServerSource::Referral,
                        &addrs,
                    );
                }
            } else {
                let addrs: Vec<IpAddr> =
                    rrset.records().filter_map(|r| r.data().ip_addr()).collect();
                self.nameservers
                    .upsert_server(zone, rrset.name(), ServerSource::Referral, &addrs);
            }
        }
    }

    /// The SVCB/TLSA transport-learning side channel: signals in the
    /// additional section apply to the signalled server only
    fn learn_signals(&self, zone: &Name, reply: &Message) {
        for record in reply.additionals() {
            match record.data() {
                RData::SVCB(svcb) => {
                    let server = if svcb.target_name.is_root() {
                        record.name().clone()
                    } else {
                        svcb.target_name.clone()
                    };

                    let alpn: Vec<String> = svcb.alpn().unwrap_or(&[]).to_vec();
                    let transports: Vec<Transport> = alpn
                        .iter()
                        .filter_map(|token| Transport::from_alpn(token))
                        .collect();
                    if transports.is_empty() {
                        continue;
                    }

                    // signalled mass is split evenly over the ALPN set
                    let share = 100 / transports.len() as u32;
                    let mut weights = HashMap::new();
                    for transport in &transports {
                        weights.insert(*transport, share as u8);
                    }

                    self.nameservers.record_signal(
                        zone,
                        &server,
                        weights,
                        alpn,
                        svcb.port(),
                        svcb.to_string(),
                    );

                    for addr in svcb.ipv4_hints() {
                        self.nameservers.upsert_server(
                            zone,
                            &server,
                            ServerSource::Referral,
                            &[IpAddr::V4(*addr)],
                        );
                    }
                    for addr in svcb.ipv6_hints() {
                        self.nameservers.upsert_server(
                            zone,
                            &server,
                            ServerSource::Referral,
                            &[IpAddr::V6(*addr)],
                        );
                    }
                }
                RData::TLSA(tlsa) => {
                    // _853._tcp.<server> ties the association to the host
                    let mut owner = record.name().clone();
                    while owner
                        .first_label()
                        .map(|l| l.starts_with(b"_"))
                        .unwrap_or(false)
                    {
                        owner = owner.base_name();
                    }
                    self.nameservers
                        .record_tlsa(zone, &owner, record.name(), tlsa.clone());
                }
                _ => {}
            }
        }
    }

    /// Negative answers: authenticate the denial where the zone is signed,
    /// cache the SOA under the negative context, and report it
    async fn admit_negative(
        &self,
        reply: &Message,
        qname: &Name,
        qtype: RecordType,
        context: Context,
        state: &mut RequestState,
    ) -> Result<Lookup> {
        let authority_sets = group_rrsets(reply.authorities());

        let soa = authority_sets
            .iter()
            .find(|s| s.record_type() == RecordType::SOA)
            .cloned();

        let signer_zone = soa
            .as_ref()
            .map(|s| s.name().clone())
            .unwrap_or_else(Name::root);
        let zone_state = self.zone_state(&signer_zone, state).await;

        let mut state_out = ValidationState::Indeterminate;
        if zone_state == ValidationState::Secure {
            // every proof-bearing set must itself validate
            let mut proof_state = ValidationState::Secure;
            for rrset in &authority_sets {
                if matches!(
                    rrset.record_type(),
                    RecordType::SOA | RecordType::NSEC | RecordType::NSEC3
                ) {
                    let verdict = self.ensure_validated(rrset, &signer_zone, state).await;
                    if verdict != ValidationState::Secure {
                        proof_state = ValidationState::Bogus;
                    }
                }
            }

            let nsecs: Vec<proof::OwnedNsec> = authority_sets
                .iter()
                .flat_map(|s| s.records())
                .filter_map(|r| match r.data() {
                    RData::NSEC(nsec) => Some((r.name().clone(), nsec.clone())),
                    _ => None,
                })
                .collect();
            let nsec3s: Vec<proof::OwnedNsec3> = authority_sets
                .iter()
                .flat_map(|s| s.records())
                .filter_map(|r| match r.data() {
                    RData::NSEC3(nsec3) => Some((r.name().clone(), nsec3.clone())),
                    _ => None,
                })
                .collect();

            let proven = if proof_state != ValidationState::Secure {
                false
            } else {
                match context {
                    Context::NxDomain => {
                        proof::nsec_proves_nxdomain(qname, &nsecs)
                            || proof::nsec3_proves_nxdomain(qname, &nsec3s)
                    }
                    _ => {
                        proof::nsec_proves_nodata(qname, qtype, &nsecs)
                            || proof::nsec3_proves_nodata(qname, qtype, &nsec3s)
                    }
                }
            };

            // in a Secure zone a denial without proof is an attack, not a
            // gap in knowledge
            state_out = if proven {
                ValidationState::Secure
            } else {
                ValidationState::Bogus
            };
        } else if zone_state == ValidationState::Insecure {
            state_out = ValidationState::Insecure;
        }

        if state_out == ValidationState::Bogus {
            return Err(ErrorKind::ValidationBogus(format!(
                "unauthenticated denial for {qname}"
            ))
            .into());
        }

        if let Some(soa) = &soa {
            self.rrsets.put_negative(
                qname,
                qtype,
                soa.clone(),
                context,
                state_out,
                Some(signer_zone.clone()),
            );
        }

        Ok(Lookup {
            rrset: soa,
            context,
            state: state_out,
        })
    }

    /// Validate an RRset, establishing the signer's key chain when the
    /// verdict is still Indeterminate and signatures are present
    async fn ensure_validated(
        &self,
        rrset: &RecordSet,
        zone: &Name,
        state: &mut RequestState,
    ) -> ValidationState {
        let signer = signer_of(rrset).unwrap_or_else(|| zone.clone());

        match self.zones.state(&signer) {
            ValidationState::Insecure => return ValidationState::Insecure,
            ValidationState::Bogus => return ValidationState::Bogus,
            _ => {}
        }

        if rrset.rrsigs().is_empty() {
            // unsigned data is fine below an insecure cut, an attack below
            // a secure one
            return match self.establish_zone_keys(&signer, state).await {
                Ok(ValidationState::Secure) => ValidationState::Bogus,
                Ok(ValidationState::Insecure) => ValidationState::Insecure,
                Ok(other) => other,
                Err(_) => ValidationState::Indeterminate,
            };
        }

        let verdict = self.validator.validate_rrset(rrset, &signer);
        if verdict != ValidationState::Indeterminate {
            return verdict;
        }

        // missing key: build the chain to the signer, then retry once
        if self.establish_zone_keys(&signer, state).await.is_err() {
            return ValidationState::Indeterminate;
        }
        self.validator.validate_rrset(rrset, &signer)
    }

    /// Make sure `zone`'s verdict is computed and, when Secure, its keys
    /// are admitted to the key cache
    async fn establish_zone_keys(
        &self,
        zone: &Name,
        state: &mut RequestState,
    ) -> Result<ValidationState> {
        let zone_state = self.zone_state(zone, state).await;
        if zone_state == ValidationState::Secure && self.dnskeys.keys_for(zone).is_empty() {
            return self.fetch_and_admit_dnskey(zone, state).await;
        }
        Ok(zone_state)
    }

    /// The zone's validation state, computing it through the DS chain when
    /// unknown
    #[async_recursion]
    async fn zone_state(&self, zone: &Name, state: &mut RequestState) -> ValidationState {
        let cached = self.zones.state(zone);
        if cached != ValidationState::Indeterminate {
            return cached;
        }

        if zone.is_root() {
            let verdict = if self.dnskeys.has_trust_anchor(&Name::root()) {
                ValidationState::Secure
            } else {
                ValidationState::Insecure
            };
            self.zones.set_state(
                &Name::root(),
                verdict,
                None,
                self.clock.unix_secs() + u64::from(self.config.max_ttl),
            );
            return verdict;
        }

        // the parent cut decides whether a DS can exist at all
        let parent = self.enclosing_cut(zone);
        let parent_state = self.zone_state(&parent, state).await;
        if parent_state != ValidationState::Secure {
            self.zones.set_state(
                zone,
                parent_state,
                Some(parent),
                self.clock.unix_secs() + u64::from(self.config.max_ttl),
            );
            return parent_state;
        }

        match self.fetch_ds(zone, &parent, state).await {
            Ok(Some(_ds)) => match self.fetch_and_admit_dnskey(zone, state).await {
                Ok(verdict) => verdict,
                Err(e) if e.is_bogus() => ValidationState::Bogus,
                Err(_) => ValidationState::Indeterminate,
            },
            // authenticated absence of DS: an insecure island begins here
            Ok(None) => {
                self.zones.set_state(
                    zone,
                    ValidationState::Insecure,
                    Some(parent),
                    self.clock.unix_secs() + u64::from(self.config.max_ttl),
                );
                ValidationState::Insecure
            }
            Err(e) => {
                debug!("DS fetch for {zone} failed: {e}");
                ValidationState::Indeterminate
            }
        }
    }

    /// The nearest ancestor of `zone` with a cached NS cut, else the root
    fn enclosing_cut(&self, zone: &Name) -> Name {
        let mut candidate = zone.base_name();
        loop {
            if candidate.is_root() {
                return candidate;
            }
            if self.rrsets.get(&candidate, RecordType::NS).is_some() {
                return candidate;
            }
            candidate = candidate.base_name();
        }
    }

    /// Fetch and validate the DS set for `zone` from its parent's servers.
    /// `Ok(None)` means authenticated absence.
    async fn fetch_ds(
        &self,
        zone: &Name,
        parent: &Name,
        state: &mut RequestState,
    ) -> Result<Option<RecordSet>> {
        if let Some(entry) = self.zones.get(zone) {
            if let Some(ds) = entry.ds_rrset() {
                return Ok(Some(ds.clone()));
            }
        }
        if let Some(cached) = self.rrsets.get(zone, RecordType::DS) {
            if cached.state() == ValidationState::Secure {
                self.zones.set_ds(zone, Some(cached.rrset().clone()));
                return Ok(Some(cached.rrset().clone()));
            }
        }

        let mut sub = state.sub_state();
        let reply = self.query_zone(parent, zone, RecordType::DS, &mut sub).await?;

        let answer_sets = group_rrsets(reply.answers());
        if let Some(ds_set) = answer_sets
            .into_iter()
            .find(|s| s.record_type() == RecordType::DS && s.name() == zone)
        {
            let verdict = self.ensure_validated(&ds_set, parent, state).await;
            if verdict == ValidationState::Bogus {
                self.zones.set_state(
                    zone,
                    ValidationState::Bogus,
                    Some(parent.clone()),
                    self.clock.unix_secs() + u64::from(self.config.bogus_ttl_cap),
                );
                return Err(ErrorKind::ValidationBogus(format!("DS of {zone}")).into());
            }
            self.rrsets.put(CachedRRset::new(
                ds_set.clone(),
                Context::Answer,
                verdict,
                Some(parent.clone()),
                self.clock.unix_secs(),
                self.config.max_ttl,
            ));
            self.zones.set_ds(zone, Some(ds_set.clone()));
            return Ok(Some(ds_set));
        }

        // no DS in the answer: the denial must be authenticated for the
        // zone to become a provable insecure island
        let authority_sets = group_rrsets(reply.authorities());
        let mut denial_validated = true;
        for rrset in &authority_sets {
            if matches!(
                rrset.record_type(),
                RecordType::SOA | RecordType::NSEC | RecordType::NSEC3
            ) {
                let verdict = self.ensure_validated(rrset, parent, state).await;
                if verdict != ValidationState::Secure {
                    denial_validated = false;
                }
            }
        }

        let nsecs: Vec<proof::OwnedNsec> = authority_sets
            .iter()
            .flat_map(|s| s.records())
            .filter_map(|r| match r.data() {
                RData::NSEC(nsec) => Some((r.name().clone(), nsec.clone())),
                _ => None,
            })
            .collect();
        let nsec3s: Vec<proof::OwnedNsec3> = authority_sets
            .iter()
            .flat_map(|s| s.records())
            .filter_map(|r| match r.data() {
                RData::NSEC3(nsec3) => Some((r.name().clone(), nsec3.clone())),
                _ => None,
            })
            .collect();

        let proven = denial_validated
            && (proof::nsec_proves_no_ds(zone, &nsecs)
                || proof::nsec3_proves_no_ds(zone, &nsec3s));

        if proven {
            Ok(None)
        } else {
            Err(ErrorKind::ValidationBogus(format!(
                "DS absence for {zone} not proven"
            ))
            .into())
        }
    }

    /// Fetch `zone`'s DNSKEY RRset from its own servers and run it through
    /// the validator; the DS evidence must already be in place. Never
    /// consults [`Self::zone_state`], the caller drives that walk.
    async fn fetch_and_admit_dnskey(
        &self,
        zone: &Name,
        state: &mut RequestState,
    ) -> Result<ValidationState> {
        // already chained?
        if !self.dnskeys.keys_for(zone).is_empty() {
            return Ok(ValidationState::Secure);
        }

        let mut sub = state.sub_state();
        let reply = self
            .query_zone(zone, zone, RecordType::DNSKEY, &mut sub)
            .await?;

        let answer_sets = group_rrsets(reply.answers());
        let Some(dnskey_set) = answer_sets
            .into_iter()
            .find(|s| s.record_type() == RecordType::DNSKEY && s.name() == zone)
        else {
            return Err(ErrorKind::Protocol(format!("no DNSKEY served for {zone}")).into());
        };

        self.zones.set_dnskey(zone, Some(dnskey_set.clone()));
        let verdict = self.validator.validate_dnskey_rrset(zone, &dnskey_set);

        let now = self.clock.unix_secs();
        self.rrsets.put(CachedRRset::new(
            dnskey_set.clone(),
            Context::Answer,
            verdict,
            Some(zone.clone()),
            now,
            self.config.max_ttl,
        ));

        let evidence_expiration = now + u64::from(dnskey_set.ttl().min(self.config.max_ttl));
        match verdict {
            ValidationState::Secure => {
                self.zones.set_state(
                    zone,
                    ValidationState::Secure,
                    None,
                    evidence_expiration,
                );
                Ok(ValidationState::Secure)
            }
            ValidationState::Bogus => {
                self.zones.set_state(
                    zone,
                    ValidationState::Bogus,
                    None,
                    now + u64::from(self.config.bogus_ttl_cap),
                );
                Err(ErrorKind::ValidationBogus(format!("DNSKEY chain of {zone}")).into())
            }
            other => Ok(other),
        }
    }

    /// Snapshot of the RRset cache for the dump surface
    pub fn rrset_snapshot(&self) -> Vec<(String, CachedRRset)> {
        self.rrsets.iter_snapshot()
    }

    /// Snapshot of the per-zone server map for the dump surface
    pub fn nameserver_snapshot(
        &self,
    ) -> Vec<(String, HashMap<String, crate::cache::AuthServer>)> {
        self.nameservers.iter_snapshot()
    }

    /// Snapshot of the zone validation states for the dump surface
    pub fn zone_snapshot(&self) -> Vec<(String, ValidationState)> {
        self.zones.iter_snapshot()
    }

    /// Snapshot of the key cache for the dump surface
    pub fn dnskey_snapshot(&self) -> Vec<(String, Vec<crate::cache::DnskeyCacheEntry>)> {
        self.dnskeys.iter_snapshot()
    }

    /// The validator, shared with tests and tooling
    pub fn validator(&self) -> &Validator {
        &self.validator
    }
}

/// A response code that helps nothing; the server is rotated out
fn bad_rcode(reply: &Message) -> bool {
    !matches!(
        reply.response_code(),
        ResponseCode::NoError | ResponseCode::NXDomain
    )
}

/// Group a message section into RRsets, folding RRSIGs onto the set they
/// cover; admission is then atomic per returned set
fn group_rrsets(records: &[Record]) -> Vec<RecordSet> {
    let mut sets: Vec<RecordSet> = Vec::new();
    let mut sigs: Vec<Record> = Vec::new();

    for record in records {
        match record.data() {
            RData::RRSIG(_) => sigs.push(record.clone()),
            _ => {
                let existing = sets.iter_mut().find(|s| {
                    s.name() == record.name() && s.record_type() == record.record_type()
                });
                match existing {
                    Some(set) => {
                        set.insert(record.clone());
                    }
                    None => sets.push(RecordSet::from(record.clone())),
                }
            }
        }
    }

    for sig in sigs {
        let covered = match sig.data() {
            RData::RRSIG(rrsig) => rrsig.type_covered,
            _ => continue,
        };
        if let Some(set) = sets
            .iter_mut()
            .find(|s| s.name() == sig.name() && s.record_type() == covered)
        {
            set.insert_rrsig(sig);
        }
    }

    sets
}

/// The signer named by the first covering signature of the set
fn signer_of(rrset: &RecordSet) -> Option<Name> {
    rrset.rrsigs().iter().find_map(|r| match r.data() {
        RData::RRSIG(rrsig) => Some(rrsig.signer_name.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use ironwood_proto::op::{MessageType, OpCode};
    use ironwood_proto::rr::rdata::{A, CNAME, NS, SOA};

    use super::*;

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn engine() -> Recursor<NullExchanger> {
        let mut hints = RootHints::default();
        hints.ns_records.push(Record::from_rdata(
            Name::root(),
            518400,
            RData::NS(NS(name("a.root-servers.net."))),
        ));
        hints.addr_records.push(Record::from_rdata(
            name("a.root-servers.net."),
            518400,
            RData::A(A(Ipv4Addr::new(198, 41, 0, 4))),
        ));

        Recursor::builder()
            .hints(hints)
            .build_with_exchanger(NullExchanger)
            .unwrap()
    }

    struct NullExchanger;

    #[async_trait]
    impl DnsExchanger for NullExchanger {
        async fn exchange(
            &self,
            _message: &Message,
            _server: IpAddr,
            _transport: Transport,
            _port: u16,
            _opts: &ExchangeOpts,
        ) -> ironwood_proto::ProtoResult<(Message, Duration)> {
            Err(ProtoErrorKind::Timeout.into())
        }
    }

    fn reply_for(qname: &str, qtype: RecordType) -> Message {
        let mut reply = Message::new(1, MessageType::Response, OpCode::Query);
        reply.add_query(Query::query(name(qname), qtype));
        reply
    }

    #[test]
    fn test_classify_answer() {
        let engine = engine();
        let mut reply = reply_for("www.example.com.", RecordType::A);
        reply.add_answer(Record::from_rdata(
            name("www.example.com."),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        ));

        assert_eq!(
            engine.classify(&reply, &name("www.example.com."), RecordType::A, &name("com.")),
            ReplyKind::Answer
        );
    }

    #[test]
    fn test_classify_cname() {
        let engine = engine();
        let mut reply = reply_for("www.example.com.", RecordType::A);
        reply.add_answer(Record::from_rdata(
            name("www.example.com."),
            300,
            RData::CNAME(CNAME(name("web.example.net."))),
        ));

        assert_eq!(
            engine.classify(&reply, &name("www.example.com."), RecordType::A, &name("com.")),
            ReplyKind::Cname(name("web.example.net."))
        );
    }

    #[test]
    fn test_classify_referral() {
        let engine = engine();
        let mut reply = reply_for("www.example.com.", RecordType::A);
        reply.add_authority(Record::from_rdata(
            name("example.com."),
            172800,
            RData::NS(NS(name("ns1.example.com."))),
        ));

        assert_eq!(
            engine.classify(&reply, &name("www.example.com."), RecordType::A, &name("com.")),
            ReplyKind::Referral(name("example.com."))
        );
    }

    #[test]
    fn test_classify_sideways_ns_is_not_referral() {
        let engine = engine();
        let mut reply = reply_for("www.example.com.", RecordType::A);
        // NS for the zone we already queried is no referral
        reply.add_authority(Record::from_rdata(
            name("com."),
            172800,
            RData::NS(NS(name("a.gtld-servers.net."))),
        ));

        assert!(matches!(
            engine.classify(&reply, &name("www.example.com."), RecordType::A, &name("com.")),
            ReplyKind::Failed(_)
        ));
    }

    #[test]
    fn test_classify_nxdomain_and_nodata() {
        let engine = engine();
        let mut reply = reply_for("nx.example.com.", RecordType::A);
        reply.set_response_code(ResponseCode::NXDomain);
        assert_eq!(
            engine.classify(&reply, &name("nx.example.com."), RecordType::A, &name("example.com.")),
            ReplyKind::NxDomain
        );

        let mut reply = reply_for("www.example.com.", RecordType::AAAA);
        reply.add_authority(Record::from_rdata(
            name("example.com."),
            3600,
            RData::SOA(SOA {
                mname: name("ns1.example.com."),
                rname: name("hostmaster.example.com."),
                serial: 1,
                refresh: 7200,
                retry: 3600,
                expire: 1209600,
                minimum: 300,
            }),
        ));
        assert_eq!(
            engine.classify(
                &reply,
                &name("www.example.com."),
                RecordType::AAAA,
                &name("example.com.")
            ),
            ReplyKind::NoData
        );
    }

    #[test]
    fn test_group_rrsets_folds_sigs() {
        use ironwood_proto::dnssec::Algorithm;
        use ironwood_proto::rr::rdata::RRSIG;

        let records = vec![
            Record::from_rdata(
                name("www.example.com."),
                300,
                RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
            ),
            Record::from_rdata(
                name("www.example.com."),
                300,
                RData::A(A(Ipv4Addr::new(192, 0, 2, 2))),
            ),
            Record::from_rdata(
                name("www.example.com."),
                300,
                RData::RRSIG(RRSIG {
                    type_covered: RecordType::A,
                    algorithm: Algorithm::ECDSAP256SHA256,
                    num_labels: 3,
                    original_ttl: 300,
                    sig_expiration: 1_700_086_400,
                    sig_inception: 1_700_000_000,
                    key_tag: 7,
                    signer_name: name("example.com."),
                    sig: vec![0; 64],
                }),
            ),
        ];

        let sets = group_rrsets(&records);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 2);
        assert_eq!(sets[0].rrsigs().len(), 1);
        assert_eq!(signer_of(&sets[0]), Some(name("example.com.")));
    }

    #[tokio::test]
    async fn test_unreachable_servers_is_an_error_not_a_hang() {
        let engine = engine();
        let result = engine.resolve(&name("www.example.com."), RecordType::A).await;
        assert!(result.is_err());
    }
}
