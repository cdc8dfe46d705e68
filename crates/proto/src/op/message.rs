// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Basic protocol message for DNS

use std::fmt;

use tracing::warn;

use crate::error::ProtoResult;
use crate::op::{Edns, Header, MessageType, OpCode, Query, ResponseCode};
use crate::rr::{Record, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// The basic request and response data structure, used for all DNS protocols.
///
/// [RFC 1035, DOMAIN NAMES - IMPLEMENTATION AND SPECIFICATION, November 1987](https://tools.ietf.org/html/rfc1035)
///
/// ```text
/// 4.1. Format
///
/// All communications inside of the domain protocol are carried in a single
/// format called a message.  The top level format of message is divided
/// into 5 sections (some of which are empty in certain cases) shown below:
///
///     +--------------------------+
///     |        Header            |
///     +--------------------------+
///     |        Question          | the question for the name server
///     +--------------------------+
///     |         Answer           | RRs answering the question
///     +--------------------------+
///     |        Authority         | RRs pointing toward an authority
///     +--------------------------+
///     |      Additional          | RRs holding additional information
///     +--------------------------+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    header: Header,
    queries: Vec<Query>,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
    edns: Option<Edns>,
}

impl Message {
    /// Create a new [`Message`] with the given header contents
    pub fn new(id: u16, message_type: MessageType, op_code: OpCode) -> Self {
        Self {
            header: Header::new(id, message_type, op_code),
            queries: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
            edns: None,
        }
    }

    /// Returns a new "empty" query Message with a random id
    pub fn query() -> Self {
        Self::new(rand::random(), MessageType::Query, OpCode::Query)
    }

    /// Returns a new `Message` with `MessageType::Response` and the given id
    pub fn response(id: u16, op_code: OpCode) -> Self {
        Self::new(id, MessageType::Response, op_code)
    }

    /// Returns a Message constructed with error details to return to a client
    pub fn error_msg(id: u16, op_code: OpCode, response_code: ResponseCode) -> Self {
        let mut message = Self::response(id, op_code);
        message.set_response_code(response_code);
        message
    }

    /// The [`Header`] of the message
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// See [`Header::id()`]
    pub fn id(&self) -> u16 {
        self.header.id()
    }

    /// See [`Header::set_id()`]
    pub fn set_id(&mut self, id: u16) -> &mut Self {
        self.header.set_id(id);
        self
    }

    /// See [`Header::message_type()`]
    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    /// See [`Header::op_code()`]
    pub fn op_code(&self) -> OpCode {
        self.header.op_code()
    }

    /// See [`Header::authoritative()`]
    pub fn authoritative(&self) -> bool {
        self.header.authoritative()
    }

    /// See [`Header::set_authoritative()`]
    pub fn set_authoritative(&mut self, authoritative: bool) -> &mut Self {
        self.header.set_authoritative(authoritative);
        self
    }

    /// See [`Header::truncated()`]
    pub fn truncated(&self) -> bool {
        self.header.truncated()
    }

    /// See [`Header::set_truncated()`]
    pub fn set_truncated(&mut self, truncated: bool) -> &mut Self {
        self.header.set_truncated(truncated);
        self
    }

    /// See [`Header::set_recursion_desired()`]
    pub fn set_recursion_desired(&mut self, recursion_desired: bool) -> &mut Self {
        self.header.set_recursion_desired(recursion_desired);
        self
    }

    /// See [`Header::set_recursion_available()`]
    pub fn set_recursion_available(&mut self, recursion_available: bool) -> &mut Self {
        self.header.set_recursion_available(recursion_available);
        self
    }

    /// See [`Header::authentic_data()`]
    pub fn authentic_data(&self) -> bool {
        self.header.authentic_data()
    }

    /// See [`Header::set_checking_disabled()`]
    pub fn set_checking_disabled(&mut self, checking_disabled: bool) -> &mut Self {
        self.header.set_checking_disabled(checking_disabled);
        self
    }

    /// See [`Header::response_code()`]
    pub fn response_code(&self) -> ResponseCode {
        self.header.response_code()
    }

    /// See [`Header::set_response_code()`]
    pub fn set_response_code(&mut self, response_code: ResponseCode) -> &mut Self {
        self.header.set_response_code(response_code);
        self
    }

    /// Add a query to the Message, either the query response from the server, or the request Query
    pub fn add_query(&mut self, query: Query) -> &mut Self {
        self.queries.push(query);
        self
    }

    /// The question section
    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// Add a record to the Answer section
    pub fn add_answer(&mut self, record: Record) -> &mut Self {
        self.answers.push(record);
        self
    }

    /// The answer section
    pub fn answers(&self) -> &[Record] {
        &self.answers
    }

    /// Add a record to the Authority section
    pub fn add_authority(&mut self, record: Record) -> &mut Self {
        self.authorities.push(record);
        self
    }

    /// The authority section
    pub fn authorities(&self) -> &[Record] {
        &self.authorities
    }

    /// Add a record to the Additional section
    pub fn add_additional(&mut self, record: Record) -> &mut Self {
        self.additionals.push(record);
        self
    }

    /// The additional section, sans the OPT pseudo-record
    pub fn additionals(&self) -> &[Record] {
        &self.additionals
    }

    /// The EDNS state of the message, when present
    pub fn extensions(&self) -> Option<&Edns> {
        self.edns.as_ref()
    }

    /// Set the EDNS state of the message
    pub fn set_edns(&mut self, edns: Edns) -> &mut Self {
        self.edns = Some(edns);
        self
    }

    /// True when any section carries a record of `record_type`
    pub fn contains_answer(&self, record_type: RecordType) -> bool {
        self.answers.iter().any(|r| r.record_type() == record_type)
    }

    /// Serialize to the wire format
    pub fn to_vec(&self) -> ProtoResult<Vec<u8>> {
        self.to_bytes()
    }

    /// Parse from the wire format
    pub fn from_vec(buffer: &[u8]) -> ProtoResult<Self> {
        Self::from_bytes(buffer)
    }
}

impl BinEncodable for Message {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        // counts are derived from the actual section lengths
        let mut header = self.header;
        header
            .set_query_count(self.queries.len() as u16)
            .set_answer_count(self.answers.len() as u16)
            .set_authority_count(self.authorities.len() as u16)
            .set_additional_count(
                (self.additionals.len() + usize::from(self.edns.is_some())) as u16,
            );
        header.emit(encoder)?;

        for query in &self.queries {
            query.emit(encoder)?;
        }
        for record in self
            .answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
        {
            record.emit(encoder)?;
        }
        if let Some(edns) = &self.edns {
            edns.emit(encoder)?;
        }
        Ok(())
    }
}

impl<'r> BinDecodable<'r> for Message {
    fn read(decoder: &mut BinDecoder<'r>) -> ProtoResult<Self> {
        let header = Header::read(decoder)?;

        let mut queries = Vec::with_capacity(header.query_count() as usize);
        for _ in 0..header.query_count() {
            queries.push(Query::read(decoder)?);
        }

        let mut read_records = |decoder: &mut BinDecoder<'r>, count: u16| -> ProtoResult<Vec<Record>> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                records.push(Record::read(decoder)?);
            }
            Ok(records)
        };

        let answers = read_records(decoder, header.answer_count())?;
        let authorities = read_records(decoder, header.authority_count())?;
        let mut additionals = read_records(decoder, header.additional_count())?;

        // lift the OPT pseudo-record out of the additional section
        let mut edns = None;
        additionals.retain(|record| {
            if record.record_type() != RecordType::OPT {
                return true;
            }
            if edns.is_some() {
                warn!("more than one OPT record, dropping");
                return false;
            }
            if let crate::rr::RData::Unknown { rdata, .. } = record.data() {
                match Edns::from_opt(record.dns_class().into(), record.ttl(), rdata) {
                    Ok(parsed) => edns = Some(parsed),
                    Err(e) => warn!("malformed OPT record dropped: {e}"),
                }
            }
            false
        });

        Ok(Self {
            header,
            queries,
            answers,
            authorities,
            additionals,
            edns,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "; id {} {:?} {:?} rcode {}",
            self.id(),
            self.message_type(),
            self.op_code(),
            self.response_code()
        )?;
        for query in &self.queries {
            writeln!(f, ";; {query}")?;
        }
        for record in &self.answers {
            writeln!(f, "{record}")?;
        }
        for record in &self.authorities {
            writeln!(f, "{record}")?;
        }
        for record in &self.additionals {
            writeln!(f, "{record}")?;
        }
        Ok(())
    }
}
