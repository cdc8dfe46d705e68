// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Validation end to end: a signed universe served by a scripted wire

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use data_encoding::BASE64;
use parking_lot::Mutex;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

use ironwood_proto::dnssec::{ds_digest, key_tag, rrsig_sign_data, Algorithm, DigestType, ValidationState};
use ironwood_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use ironwood_proto::rr::rdata::{RData, A, DNSKEY, DS, NS, NSEC, RRSIG, SOA};
use ironwood_proto::rr::{Name, Record, RecordType};
use ironwood_proto::xfer::{ExchangeOpts, Transport};
use ironwood_proto::{ProtoErrorKind, ProtoResult};

use ironwood_recursor::cache::Context;
use ironwood_recursor::recursor::DnsExchanger;
use ironwood_recursor::{FixedClock, Recursor, RecursorConfig, RootHints};

const T0: u64 = 1_700_000_000;

const ROOT_ADDR: Ipv4Addr = Ipv4Addr::new(198, 41, 0, 4);
const EXAMPLE_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 20);
const LEGACY_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 30);
const WWW_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 80);

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

/// A zone key that signs RRsets for the scripted universe
struct ZoneSigner {
    zone: Name,
    key: Ed25519KeyPair,
    dnskey: DNSKEY,
    tag: u16,
}

impl ZoneSigner {
    fn new(zone: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let key = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let dnskey = DNSKEY {
            flags: 0x0101,
            protocol: 3,
            algorithm: Algorithm::ED25519,
            public_key: key.public_key().as_ref().to_vec(),
        };
        let tag = key_tag(&dnskey).unwrap();
        Self {
            zone: name(zone),
            key,
            dnskey,
            tag,
        }
    }

    /// Sign one RRset, returning the records followed by their RRSIG
    fn signed(&self, records: Vec<Record>) -> Vec<Record> {
        let first = records.first().expect("non-empty set");
        let mut rrsig = RRSIG {
            type_covered: first.record_type(),
            algorithm: Algorithm::ED25519,
            num_labels: first.name().num_labels(),
            original_ttl: first.ttl(),
            sig_expiration: (T0 + 86400) as u32,
            sig_inception: (T0 - 3600) as u32,
            key_tag: self.tag,
            signer_name: self.zone.clone(),
            sig: Vec::new(),
        };
        let sign_data = rrsig_sign_data(&records, &rrsig).unwrap();
        rrsig.sig = self.key.sign(&sign_data).as_ref().to_vec();

        let mut out = records;
        let owner = out[0].name().clone();
        let ttl = out[0].ttl();
        out.push(Record::from_rdata(owner, ttl, RData::RRSIG(rrsig)));
        out
    }

    /// The zone's DNSKEY RRset, self-signed
    fn dnskey_answer(&self) -> Vec<Record> {
        self.signed(vec![Record::from_rdata(
            self.zone.clone(),
            3600,
            RData::DNSKEY(self.dnskey.clone()),
        )])
    }

    /// The DS record a parent publishes for this zone
    fn ds(&self) -> Record {
        let digest = ds_digest(&self.zone, &self.dnskey, DigestType::SHA256).unwrap();
        Record::from_rdata(
            self.zone.clone(),
            3600,
            RData::DS(DS {
                key_tag: self.tag,
                algorithm: Algorithm::ED25519,
                digest_type: DigestType::SHA256,
                digest,
            }),
        )
    }

    /// The trust-anchor configuration line for this key
    fn anchor_line(&self) -> String {
        format!(
            "{} 172800 IN DNSKEY 257 3 {} {}",
            self.zone,
            u8::from(Algorithm::ED25519),
            BASE64.encode(&self.dnskey.public_key)
        )
    }
}

#[derive(Clone, Default)]
struct Scripted {
    rcode: Option<ResponseCode>,
    aa: bool,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
}

#[derive(Default)]
struct MockWire {
    scripts: HashMap<(IpAddr, String, u16), Scripted>,
    log: Mutex<Vec<(IpAddr, String, u16)>>,
}

impl MockWire {
    fn script(&mut self, addr: Ipv4Addr, qname: &str, qtype: RecordType, reply: Scripted) {
        self.scripts
            .insert((IpAddr::V4(addr), qname.to_string(), qtype.into()), reply);
    }

    fn total_queries(&self) -> usize {
        self.log.lock().len()
    }
}

#[derive(Clone)]
struct SharedWire(Arc<MockWire>);

impl std::ops::Deref for SharedWire {
    type Target = MockWire;
    fn deref(&self) -> &MockWire {
        &self.0
    }
}

#[async_trait]
impl DnsExchanger for SharedWire {
    async fn exchange(
        &self,
        message: &Message,
        server: IpAddr,
        _transport: Transport,
        _port: u16,
        _opts: &ExchangeOpts,
    ) -> ProtoResult<(Message, Duration)> {
        let query = message.queries().first().expect("query always present");
        let qname = query.name().to_lowercase().to_string();
        self.log
            .lock()
            .push((server, qname.clone(), query.query_type().into()));

        let key = (server, qname, query.query_type().into());
        let Some(scripted) = self.scripts.get(&key) else {
            return Err(ProtoErrorKind::Refused.into());
        };

        let mut reply = Message::new(message.id(), MessageType::Response, OpCode::Query);
        reply.add_query(Query::query(query.name().clone(), query.query_type()));
        reply.set_authoritative(scripted.aa);
        if let Some(rcode) = scripted.rcode {
            reply.set_response_code(rcode);
        }
        for record in &scripted.answers {
            reply.add_answer(record.clone());
        }
        for record in &scripted.authorities {
            reply.add_authority(record.clone());
        }
        for record in &scripted.additionals {
            reply.add_additional(record.clone());
        }
        Ok((reply, Duration::from_millis(5)))
    }
}

fn a(owner: &str, ttl: u32, addr: Ipv4Addr) -> Record {
    Record::from_rdata(name(owner), ttl, RData::A(A(addr)))
}

fn ns(owner: &str, ttl: u32, target: &str) -> Record {
    Record::from_rdata(name(owner), ttl, RData::NS(NS(name(target))))
}

fn soa(zone: &str, minimum: u32) -> Record {
    Record::from_rdata(
        name(zone),
        3600,
        RData::SOA(SOA {
            mname: name("ns1.example."),
            rname: name("hostmaster.example."),
            serial: 2024010101,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum,
        }),
    )
}

fn nsec(owner: &str, next: &str, types: &[RecordType]) -> Record {
    Record::from_rdata(
        name(owner),
        3600,
        RData::NSEC(NSEC {
            next_domain_name: name(next),
            type_bit_maps: types.to_vec(),
        }),
    )
}

/// A signed root delegating a signed `example.` and an unsigned `legacy.`
struct Universe {
    wire: Arc<MockWire>,
    root: ZoneSigner,
}

fn signed_universe() -> Universe {
    let root = ZoneSigner::new(".");
    let example = ZoneSigner::new("example.");

    let mut wire = MockWire::default();

    // priming
    let mut priming = Scripted {
        aa: true,
        answers: root.signed(vec![ns(".", 518400, "a.root-servers.net.")]),
        ..Scripted::default()
    };
    priming.additionals = vec![a("a.root-servers.net.", 518400, ROOT_ADDR)];
    wire.script(ROOT_ADDR, ".", RecordType::NS, priming);

    wire.script(
        ROOT_ADDR,
        ".",
        RecordType::DNSKEY,
        Scripted {
            aa: true,
            answers: root.dnskey_answer(),
            ..Scripted::default()
        },
    );

    // referral to the signed child, the DS travels with it
    for qname in ["www.example.", "nx.example."] {
        let mut referral = Scripted::default();
        referral.authorities = vec![ns("example.", 172800, "ns1.example.")];
        referral
            .authorities
            .extend(root.signed(vec![example.ds()]));
        referral.additionals = vec![a("ns1.example.", 172800, EXAMPLE_ADDR)];
        wire.script(ROOT_ADDR, qname, RecordType::A, referral);
    }

    wire.script(
        ROOT_ADDR,
        "example.",
        RecordType::DS,
        Scripted {
            aa: true,
            answers: root.signed(vec![example.ds()]),
            ..Scripted::default()
        },
    );

    wire.script(
        EXAMPLE_ADDR,
        "example.",
        RecordType::DNSKEY,
        Scripted {
            aa: true,
            answers: example.dnskey_answer(),
            ..Scripted::default()
        },
    );

    wire.script(
        EXAMPLE_ADDR,
        "www.example.",
        RecordType::A,
        Scripted {
            aa: true,
            answers: example.signed(vec![a("www.example.", 300, WWW_ADDR)]),
            ..Scripted::default()
        },
    );

    // authenticated denial: one NSEC spans nx.example. and the wildcard
    let mut nx = Scripted {
        rcode: Some(ResponseCode::NXDomain),
        aa: true,
        ..Scripted::default()
    };
    nx.authorities = example.signed(vec![soa("example.", 300)]);
    nx.authorities.extend(example.signed(vec![nsec(
        "example.",
        "zzz.example.",
        &[RecordType::NS, RecordType::SOA, RecordType::DNSKEY],
    )]));
    wire.script(EXAMPLE_ADDR, "nx.example.", RecordType::A, nx);

    // the unsigned island: referral without DS
    let mut legacy_referral = Scripted::default();
    legacy_referral.authorities = vec![ns("legacy.", 172800, "ns1.legacy.")];
    legacy_referral.additionals = vec![a("ns1.legacy.", 172800, LEGACY_ADDR)];
    wire.script(ROOT_ADDR, "www.legacy.", RecordType::A, legacy_referral);

    // DS absence, proven by a signed NSEC at the delegation
    let mut no_ds = Scripted {
        aa: true,
        ..Scripted::default()
    };
    no_ds.authorities = root.signed(vec![Record::from_rdata(
        Name::root(),
        3600,
        RData::SOA(SOA {
            mname: name("a.root-servers.net."),
            rname: name("nstld.verisign-grs.com."),
            serial: 2024010101,
            refresh: 1800,
            retry: 900,
            expire: 604800,
            minimum: 86400,
        }),
    )]);
    no_ds
        .authorities
        .extend(root.signed(vec![nsec("legacy.", "zzz.", &[RecordType::NS])]));
    wire.script(ROOT_ADDR, "legacy.", RecordType::DS, no_ds);

    wire.script(
        LEGACY_ADDR,
        "www.legacy.",
        RecordType::A,
        Scripted {
            aa: true,
            answers: vec![a("www.legacy.", 300, Ipv4Addr::new(192, 0, 2, 99))],
            ..Scripted::default()
        },
    );

    Universe {
        wire: Arc::new(wire),
        root,
    }
}

fn engine(universe: &Universe) -> Recursor<SharedWire> {
    let mut hints = RootHints::default();
    hints
        .ns_records
        .push(ns(".", 518400, "a.root-servers.net."));
    hints
        .addr_records
        .push(a("a.root-servers.net.", 518400, ROOT_ADDR));

    let mut config = RecursorConfig::default();
    config.trust_anchors = vec![universe.root.anchor_line()];
    config.request_timeout = 30;

    Recursor::builder()
        .config(config)
        .hints(hints)
        .clock(Arc::new(FixedClock::at(T0)))
        .build_with_exchanger(SharedWire(universe.wire.clone()))
        .unwrap()
}

#[tokio::test]
async fn cold_resolve_builds_a_secure_chain() {
    let universe = signed_universe();
    let engine = engine(&universe);

    let lookup = engine
        .resolve(&name("www.example."), RecordType::A)
        .await
        .unwrap();

    assert_eq!(lookup.state, ValidationState::Secure);
    let rrset = lookup.rrset.expect("positive answer");
    assert!(rrset
        .records()
        .any(|r| r.data().ip_addr() == Some(IpAddr::V4(WWW_ADDR))));

    // the zone states reflect the walk
    let zones: HashMap<String, ValidationState> =
        engine.zone_snapshot().into_iter().collect();
    assert_eq!(zones.get("."), Some(&ValidationState::Secure));
    assert_eq!(zones.get("example."), Some(&ValidationState::Secure));

    // and the secure entries name their signer
    let secure_www = engine
        .rrset_snapshot()
        .into_iter()
        .find(|(key, _)| key == &format!("www.example.::{}", u16::from(RecordType::A)))
        .map(|(_, entry)| entry)
        .expect("www entry cached");
    assert_eq!(secure_www.state(), ValidationState::Secure);
    assert_eq!(secure_www.signer(), Some(&name("example.")));
}

#[tokio::test]
async fn dnskey_cache_holds_the_chain() {
    let universe = signed_universe();
    let engine = engine(&universe);

    engine
        .resolve(&name("www.example."), RecordType::A)
        .await
        .unwrap();

    let keys: HashMap<String, usize> = engine
        .dnskey_snapshot()
        .into_iter()
        .map(|(owner, entries)| (owner, entries.len()))
        .collect();
    assert!(keys.get(".").copied().unwrap_or(0) >= 1);
    assert!(keys.get("example.").copied().unwrap_or(0) >= 1);

    // every key on the chain is validated
    for (_, entries) in engine.dnskey_snapshot() {
        for entry in entries {
            assert!(entry.validated());
        }
    }
}

#[tokio::test]
async fn unsigned_island_is_insecure_not_bogus() {
    let universe = signed_universe();
    let engine = engine(&universe);

    let lookup = engine
        .resolve(&name("www.legacy."), RecordType::A)
        .await
        .unwrap();

    assert_eq!(lookup.state, ValidationState::Insecure);
    assert!(lookup.rrset.is_some());

    let zones: HashMap<String, ValidationState> =
        engine.zone_snapshot().into_iter().collect();
    assert_eq!(zones.get("legacy."), Some(&ValidationState::Insecure));
}

#[tokio::test]
async fn nxdomain_with_authenticated_denial_is_secure_and_cached() {
    let universe = signed_universe();
    let engine = engine(&universe);

    let lookup = engine
        .resolve(&name("nx.example."), RecordType::A)
        .await
        .unwrap();
    assert_eq!(lookup.context, Context::NxDomain);
    assert_eq!(lookup.state, ValidationState::Secure);

    // any type at the denied name is now served without a wire exchange
    let wire_queries = universe.wire.total_queries();
    let again = engine
        .resolve(&name("nx.example."), RecordType::AAAA)
        .await
        .unwrap();
    assert_eq!(again.context, Context::NxDomain);
    assert_eq!(universe.wire.total_queries(), wire_queries);
}

#[tokio::test]
async fn tampered_answer_is_bogus_and_servfails() {
    let universe = signed_universe();

    // re-script the answer with an address the signature does not cover
    let mut wire = MockWire::default();
    for (key, value) in universe.wire.scripts.iter() {
        wire.scripts.insert(key.clone(), value.clone());
    }
    let tampered_key = (
        IpAddr::V4(EXAMPLE_ADDR),
        "www.example.".to_string(),
        u16::from(RecordType::A),
    );
    if let Some(scripted) = wire.scripts.get_mut(&tampered_key) {
        scripted.answers = scripted
            .answers
            .iter()
            .map(|record| {
                if record.record_type() == RecordType::A {
                    a("www.example.", 300, Ipv4Addr::new(203, 0, 113, 66))
                } else {
                    record.clone()
                }
            })
            .collect();
    }

    let tampered = Universe {
        wire: Arc::new(wire),
        root: universe.root,
    };
    let engine = engine(&tampered);

    let result = engine.resolve(&name("www.example."), RecordType::A).await;
    let err = result.expect_err("tampered data must not resolve");
    assert!(err.is_bogus(), "expected a bogus verdict, got: {err}");
}
