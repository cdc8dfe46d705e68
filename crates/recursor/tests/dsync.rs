// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DSYNC discovery against a scripted universe

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use ironwood_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use ironwood_proto::rr::rdata::{DsyncScheme, RData, A, DSYNC, NS, SOA};
use ironwood_proto::rr::{Name, Record, RecordType};
use ironwood_proto::xfer::{ExchangeOpts, Transport};
use ironwood_proto::{ProtoErrorKind, ProtoResult};

use ironwood_recursor::recursor::DnsExchanger;
use ironwood_recursor::{dsync, FixedClock, Recursor, RecursorConfig, RootHints};

const T0: u64 = 1_700_000_000;

const ROOT_ADDR: Ipv4Addr = Ipv4Addr::new(198, 41, 0, 4);
const EXAMPLE_ADDR: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 20);

fn name(s: &str) -> Name {
    Name::from_str(s).unwrap()
}

fn a(owner: &str, ttl: u32, addr: Ipv4Addr) -> Record {
    Record::from_rdata(name(owner), ttl, RData::A(A(addr)))
}

fn ns(owner: &str, ttl: u32, target: &str) -> Record {
    Record::from_rdata(name(owner), ttl, RData::NS(NS(name(target))))
}

fn soa(zone: &str) -> Record {
    Record::from_rdata(
        name(zone),
        3600,
        RData::SOA(SOA {
            mname: name("ns1.example."),
            rname: name("hostmaster.example."),
            serial: 1,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
        }),
    )
}

fn dsync_record(owner: &str, scheme: DsyncScheme, port: u16, target: &str) -> Record {
    Record::from_rdata(
        name(owner),
        3600,
        RData::DSYNC(DSYNC {
            scheme,
            rrtype: RecordType::CNAME,
            port,
            target: name(target),
        }),
    )
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
    log: Mutex<Vec<String>>,
}

impl MockWire {
    fn script(&mut self, addr: Ipv4Addr, qname: &str, qtype: RecordType, reply: Scripted) {
        self.scripts
            .insert((IpAddr::V4(addr), qname.to_string(), qtype.into()), reply);
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
        self.log.lock().push(qname.clone());

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

/// Root delegates `example.`; the example servers answer the DSYNC probes
fn universe() -> MockWire {
    let mut wire = MockWire::default();

    wire.script(
        ROOT_ADDR,
        ".",
        RecordType::NS,
        Scripted {
            aa: true,
            answers: vec![ns(".", 518400, "a.root-servers.net.")],
            additionals: vec![a("a.root-servers.net.", 518400, ROOT_ADDR)],
            ..Scripted::default()
        },
    );

    for qname in [
        "child._dsync.example.",
        "_dsync.example.",
        "sub._dsync.deep.example.",
        "sub._dsync.example.",
        "orphan._dsync.example.",
    ] {
        wire.script(
            ROOT_ADDR,
            qname,
            RecordType::DSYNC,
            Scripted {
                authorities: vec![ns("example.", 172800, "ns1.example.")],
                additionals: vec![a("ns1.example.", 172800, EXAMPLE_ADDR)],
                ..Scripted::default()
            },
        );
    }

    wire
}

fn engine(wire: Arc<MockWire>) -> Recursor<SharedWire> {
    let mut hints = RootHints::default();
    hints
        .ns_records
        .push(ns(".", 518400, "a.root-servers.net."));
    hints
        .addr_records
        .push(a("a.root-servers.net.", 518400, ROOT_ADDR));

    Recursor::builder()
        .config(RecursorConfig::default())
        .hints(hints)
        .clock(Arc::new(FixedClock::at(T0)))
        .build_with_exchanger(SharedWire(wire))
        .unwrap()
}

#[tokio::test]
async fn one_level_up_probe_finds_the_endpoint() {
    let mut wire = universe();
    wire.script(
        EXAMPLE_ADDR,
        "child._dsync.example.",
        RecordType::DSYNC,
        Scripted {
            aa: true,
            answers: vec![dsync_record(
                "child._dsync.example.",
                DsyncScheme::Notify,
                5300,
                "dsync.example.",
            )],
            ..Scripted::default()
        },
    );

    let engine = engine(Arc::new(wire));
    let target = dsync::discover(&engine, &name("child.example."), DsyncScheme::Notify)
        .await
        .unwrap();

    assert_eq!(target.qname, name("child._dsync.example."));
    assert_eq!(target.parent, name("example."));
    assert_eq!(target.rdata.len(), 1);
    assert_eq!(target.rdata[0].port, 5300);
    assert_eq!(target.rdata[0].target, name("dsync.example."));
}

#[tokio::test]
async fn soa_in_authority_reveals_the_true_parent() {
    let mut wire = universe();
    // the guessed parent deep.example. does not exist as a zone; the
    // authority SOA names example. as the true parent
    wire.script(
        EXAMPLE_ADDR,
        "sub._dsync.deep.example.",
        RecordType::DSYNC,
        Scripted {
            rcode: Some(ResponseCode::NXDomain),
            aa: true,
            authorities: vec![soa("example.")],
            ..Scripted::default()
        },
    );
    wire.script(
        EXAMPLE_ADDR,
        "sub._dsync.example.",
        RecordType::DSYNC,
        Scripted {
            aa: true,
            answers: vec![dsync_record(
                "sub._dsync.example.",
                DsyncScheme::Update,
                5301,
                "update.example.",
            )],
            ..Scripted::default()
        },
    );

    let engine = engine(Arc::new(wire));
    let target = dsync::discover(&engine, &name("sub.deep.example."), DsyncScheme::Update)
        .await
        .unwrap();

    assert_eq!(target.parent, name("example."));
    assert_eq!(target.qname, name("sub._dsync.example."));
    assert_eq!(target.rdata.len(), 1);
    assert_eq!(target.rdata[0].port, 5301);
}

#[tokio::test]
async fn apex_probe_is_the_last_resort() {
    let mut wire = universe();
    wire.script(
        EXAMPLE_ADDR,
        "child._dsync.example.",
        RecordType::DSYNC,
        Scripted {
            rcode: Some(ResponseCode::NXDomain),
            aa: true,
            authorities: vec![soa("example.")],
            ..Scripted::default()
        },
    );
    wire.script(
        EXAMPLE_ADDR,
        "_dsync.example.",
        RecordType::DSYNC,
        Scripted {
            aa: true,
            answers: vec![dsync_record(
                "_dsync.example.",
                DsyncScheme::Notify,
                5300,
                "apex.example.",
            )],
            ..Scripted::default()
        },
    );

    let engine = engine(Arc::new(wire));
    let target = dsync::discover(&engine, &name("child.example."), DsyncScheme::Notify)
        .await
        .unwrap();

    assert_eq!(target.qname, name("_dsync.example."));
    assert_eq!(target.rdata.len(), 1);
    assert_eq!(target.rdata[0].target, name("apex.example."));
}

#[tokio::test]
async fn empty_rdata_means_nothing_is_published() {
    let mut wire = universe();
    for qname in ["orphan._dsync.example.", "_dsync.example."] {
        wire.script(
            EXAMPLE_ADDR,
            qname,
            RecordType::DSYNC,
            Scripted {
                rcode: Some(ResponseCode::NXDomain),
                aa: true,
                authorities: vec![soa("example.")],
                ..Scripted::default()
            },
        );
    }

    let engine = engine(Arc::new(wire));
    let target = dsync::discover(&engine, &name("orphan.example."), DsyncScheme::Report)
        .await
        .unwrap();

    assert!(target.rdata.is_empty(), "no endpoint is published");
}

#[tokio::test]
async fn scheme_filter_drops_other_schemes() {
    let mut wire = universe();
    wire.script(
        EXAMPLE_ADDR,
        "child._dsync.example.",
        RecordType::DSYNC,
        Scripted {
            aa: true,
            answers: vec![
                dsync_record(
                    "child._dsync.example.",
                    DsyncScheme::Notify,
                    5300,
                    "notify.example.",
                ),
                dsync_record(
                    "child._dsync.example.",
                    DsyncScheme::Report,
                    5302,
                    "report.example.",
                ),
            ],
            ..Scripted::default()
        },
    );

    let engine = engine(Arc::new(wire));
    let target = dsync::discover(&engine, &name("child.example."), DsyncScheme::Report)
        .await
        .unwrap();

    assert_eq!(target.rdata.len(), 1);
    assert_eq!(target.rdata[0].target, name("report.example."));
}
