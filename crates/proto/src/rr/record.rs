// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Resource record implementation

use std::cmp::Ordering;
use std::fmt;

use crate::error::ProtoResult;
use crate::rr::{DNSClass, Name, RData, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// A DNS resource record
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Record {
    name: Name,
    dns_class: DNSClass,
    ttl: u32,
    rdata: RData,
}

impl Record {
    /// Create a record from its parts; the type is carried by the rdata
    pub fn from_rdata(name: Name, ttl: u32, rdata: RData) -> Self {
        Self {
            name,
            dns_class: DNSClass::IN,
            ttl,
            rdata,
        }
    }

    /// The owner name of the record
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The type of the record, taken from the data
    pub fn record_type(&self) -> RecordType {
        self.rdata.record_type()
    }

    /// The class of the record
    pub fn dns_class(&self) -> DNSClass {
        self.dns_class
    }

    /// Set the class of the record
    pub fn set_dns_class(&mut self, dns_class: DNSClass) -> &mut Self {
        self.dns_class = dns_class;
        self
    }

    /// Time-to-live in seconds
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Set the time-to-live
    pub fn set_ttl(&mut self, ttl: u32) -> &mut Self {
        self.ttl = ttl;
        self
    }

    /// The record data
    pub fn data(&self) -> &RData {
        &self.rdata
    }

    /// Consume the record, returning the data
    pub fn into_data(self) -> RData {
        self.rdata
    }

    /// Consume the record, returning owner and data
    pub fn into_parts(self) -> (Name, u32, RData) {
        (self.name, self.ttl, self.rdata)
    }
}

impl BinEncodable for Record {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        self.name.emit(encoder)?;
        encoder.emit_u16(self.record_type().into());
        encoder.emit_u16(self.dns_class.into());
        encoder.emit_u32(self.ttl);

        // RDLENGTH is patched in once the rdata has been written
        let len_at = encoder.len();
        encoder.emit_u16(0);
        self.rdata.emit(encoder)?;
        let rdata_len = encoder.len() - len_at - 2;
        encoder.patch_u16(len_at, rdata_len as u16);
        Ok(())
    }
}

impl<'r> BinDecodable<'r> for Record {
    fn read(decoder: &mut BinDecoder<'r>) -> ProtoResult<Self> {
        let name = Name::read(decoder)?;
        let record_type = RecordType::from(decoder.read_u16()?);
        let dns_class = DNSClass::from(decoder.read_u16()?);
        let ttl = decoder.read_u32()?;
        let rdlength = decoder.read_u16()?;
        let rdata = RData::read(decoder, record_type, rdlength)?;

        Ok(Self {
            name,
            dns_class,
            ttl,
            rdata,
        })
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.record_type().cmp(&other.record_type()))
            .then_with(|| self.dns_class.cmp(&other.dns_class))
            .then_with(|| {
                // canonical RDATA byte order, used when digesting RRsets
                let left = self.rdata.to_bytes().unwrap_or_default();
                let right = other.rdata.to_bytes().unwrap_or_default();
                left.cmp(&right)
            })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.name,
            self.ttl,
            self.dns_class,
            self.record_type(),
            self.rdata
        )
    }
}
