// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Record data enumerations and structures

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use enum_as_inner::EnumAsInner;

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::rr::{Name, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

pub mod dnssec;
pub mod dsync;
pub mod svcb;

pub use dnssec::{DNSKEY, DS, NSEC, NSEC3, NSEC3PARAM, RRSIG};
pub use dsync::{DSYNC, DsyncScheme};
pub use svcb::{SVCB, SvcParamValue};

/// IPv4 address record data
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct A(pub Ipv4Addr);

/// IPv6 address record data
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AAAA(pub Ipv6Addr);

/// Canonical-name record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CNAME(pub Name);

/// Name-server record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NS(pub Name);

/// Pointer record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PTR(pub Name);

/// Mail-exchange record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MX {
    /// Preference, lower wins
    pub preference: u16,
    /// The mail exchange host
    pub exchange: Name,
}

/// Service-locator record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SRV {
    /// Priority, lower wins
    pub priority: u16,
    /// Weight among same-priority targets
    pub weight: u16,
    /// Port of the service
    pub port: u16,
    /// Host of the service
    pub target: Name,
}

/// Text record data, a sequence of character-strings
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TXT(pub Vec<Box<[u8]>>);

/// Start-of-authority record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SOA {
    /// The primary nameserver of the zone
    pub mname: Name,
    /// Mailbox of the responsible person
    pub rname: Name,
    /// Zone serial
    pub serial: u32,
    /// Secondary refresh interval
    pub refresh: u32,
    /// Secondary retry interval
    pub retry: u32,
    /// Secondary expiry bound
    pub expire: u32,
    /// Negative-caching TTL bound
    pub minimum: u32,
}

/// TLSA certificate-association record data
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TLSA {
    /// Certificate usage
    pub cert_usage: u8,
    /// Selector
    pub selector: u8,
    /// Matching type
    pub matching: u8,
    /// Certificate association data
    pub cert_data: Vec<u8>,
}

/// Record data enumeration, one first-class variant per supported type
#[derive(Clone, Debug, EnumAsInner, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum RData {
    /// IPv4 address
    A(A),
    /// IPv6 address
    AAAA(AAAA),
    /// Canonical name
    CNAME(CNAME),
    /// DNS key
    DNSKEY(DNSKEY),
    /// Delegation signer
    DS(DS),
    /// Parent-synchronization endpoint
    DSYNC(DSYNC),
    /// Mail exchange
    MX(MX),
    /// Name server
    NS(NS),
    /// Authenticated denial
    NSEC(NSEC),
    /// Hashed authenticated denial
    NSEC3(NSEC3),
    /// NSEC3 parameters
    NSEC3PARAM(NSEC3PARAM),
    /// Pointer
    PTR(PTR),
    /// Signature over an RRset
    RRSIG(RRSIG),
    /// Start of authority
    SOA(SOA),
    /// Service locator
    SRV(SRV),
    /// Service binding
    SVCB(SVCB),
    /// Certificate association
    TLSA(TLSA),
    /// Text
    TXT(TXT),
    /// Record data whose type this crate does not interpret
    Unknown {
        /// The type code observed on the wire
        code: u16,
        /// The raw rdata bytes
        rdata: Vec<u8>,
    },
}

impl RData {
    /// The record type this data belongs to
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(..) => RecordType::A,
            Self::AAAA(..) => RecordType::AAAA,
            Self::CNAME(..) => RecordType::CNAME,
            Self::DNSKEY(..) => RecordType::DNSKEY,
            Self::DS(..) => RecordType::DS,
            Self::DSYNC(..) => RecordType::DSYNC,
            Self::MX(..) => RecordType::MX,
            Self::NS(..) => RecordType::NS,
            Self::NSEC(..) => RecordType::NSEC,
            Self::NSEC3(..) => RecordType::NSEC3,
            Self::NSEC3PARAM(..) => RecordType::NSEC3PARAM,
            Self::PTR(..) => RecordType::PTR,
            Self::RRSIG(..) => RecordType::RRSIG,
            Self::SOA(..) => RecordType::SOA,
            Self::SRV(..) => RecordType::SRV,
            Self::SVCB(..) => RecordType::SVCB,
            Self::TLSA(..) => RecordType::TLSA,
            Self::TXT(..) => RecordType::TXT,
            Self::Unknown { code, .. } => RecordType::Unknown(*code),
        }
    }

    /// The address held by A or AAAA data, `None` otherwise
    pub fn ip_addr(&self) -> Option<IpAddr> {
        match self {
            Self::A(A(addr)) => Some(IpAddr::V4(*addr)),
            Self::AAAA(AAAA(addr)) => Some(IpAddr::V6(*addr)),
            _ => None,
        }
    }

    /// Read record data of `record_type` spanning `rdlength` bytes
    pub fn read(
        decoder: &mut BinDecoder<'_>,
        record_type: RecordType,
        rdlength: u16,
    ) -> ProtoResult<Self> {
        let start = decoder.index();
        let rdata = match record_type {
            RecordType::A => {
                let bytes = decoder.read_slice(4)?;
                Self::A(A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])))
            }
            RecordType::AAAA => {
                let bytes = decoder.read_slice(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Self::AAAA(AAAA(Ipv6Addr::from(octets)))
            }
            RecordType::CNAME => Self::CNAME(CNAME(Name::read(decoder)?)),
            RecordType::DNSKEY => Self::DNSKEY(DNSKEY::read(decoder, rdlength)?),
            RecordType::DS => Self::DS(DS::read(decoder, rdlength)?),
            RecordType::DSYNC => Self::DSYNC(DSYNC::read(decoder)?),
            RecordType::MX => Self::MX(MX {
                preference: decoder.read_u16()?,
                exchange: Name::read(decoder)?,
            }),
            RecordType::NS => Self::NS(NS(Name::read(decoder)?)),
            RecordType::NSEC => Self::NSEC(NSEC::read(decoder, rdlength)?),
            RecordType::NSEC3 => Self::NSEC3(NSEC3::read(decoder, rdlength)?),
            RecordType::NSEC3PARAM => Self::NSEC3PARAM(NSEC3PARAM::read(decoder)?),
            RecordType::PTR => Self::PTR(PTR(Name::read(decoder)?)),
            RecordType::RRSIG => Self::RRSIG(RRSIG::read(decoder, rdlength)?),
            RecordType::SOA => Self::SOA(SOA {
                mname: Name::read(decoder)?,
                rname: Name::read(decoder)?,
                serial: decoder.read_u32()?,
                refresh: decoder.read_u32()?,
                retry: decoder.read_u32()?,
                expire: decoder.read_u32()?,
                minimum: decoder.read_u32()?,
            }),
            RecordType::SRV => Self::SRV(SRV {
                priority: decoder.read_u16()?,
                weight: decoder.read_u16()?,
                port: decoder.read_u16()?,
                target: Name::read(decoder)?,
            }),
            RecordType::SVCB => Self::SVCB(SVCB::read(decoder, rdlength)?),
            RecordType::TLSA => {
                let cert_usage = decoder.read_u8()?;
                let selector = decoder.read_u8()?;
                let matching = decoder.read_u8()?;
                let remaining = (rdlength as usize).checked_sub(3).ok_or_else(|| {
                    crate::error::ProtoError::from(ProtoErrorKind::Protocol(
                        "TLSA rdata too short".to_string(),
                    ))
                })?;
                Self::TLSA(TLSA {
                    cert_usage,
                    selector,
                    matching,
                    cert_data: decoder.read_slice(remaining)?.to_vec(),
                })
            }
            RecordType::TXT => {
                let end = start + rdlength as usize;
                let mut strings = Vec::new();
                while decoder.index() < end {
                    strings.push(decoder.read_character_data()?.into());
                }
                Self::TXT(TXT(strings))
            }
            RecordType::OPT | RecordType::Unknown(_) => Self::Unknown {
                code: record_type.into(),
                rdata: decoder.read_slice(rdlength as usize)?.to_vec(),
            },
        };

        // the rdata must consume exactly rdlength bytes
        let read = decoder.index() - start;
        if read != rdlength as usize {
            return Err(ProtoErrorKind::Protocol(format!(
                "rdata length mismatch for {record_type}: read {read}, expected {rdlength}"
            ))
            .into());
        }
        Ok(rdata)
    }
}

impl BinEncodable for RData {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        match self {
            Self::A(A(addr)) => encoder.emit_vec(&addr.octets()),
            Self::AAAA(AAAA(addr)) => encoder.emit_vec(&addr.octets()),
            Self::CNAME(CNAME(name)) | Self::NS(NS(name)) | Self::PTR(PTR(name)) => {
                name.emit_canonical_lowercased(encoder)?;
            }
            Self::DNSKEY(rdata) => rdata.emit(encoder)?,
            Self::DS(rdata) => rdata.emit(encoder)?,
            Self::DSYNC(rdata) => rdata.emit(encoder)?,
            Self::MX(rdata) => {
                encoder.emit_u16(rdata.preference);
                rdata.exchange.emit_canonical_lowercased(encoder)?;
            }
            Self::NSEC(rdata) => rdata.emit(encoder)?,
            Self::NSEC3(rdata) => rdata.emit(encoder)?,
            Self::NSEC3PARAM(rdata) => rdata.emit(encoder)?,
            Self::RRSIG(rdata) => rdata.emit(encoder)?,
            Self::SOA(rdata) => {
                rdata.mname.emit_canonical_lowercased(encoder)?;
                rdata.rname.emit_canonical_lowercased(encoder)?;
                encoder.emit_u32(rdata.serial);
                encoder.emit_u32(rdata.refresh);
                encoder.emit_u32(rdata.retry);
                encoder.emit_u32(rdata.expire);
                encoder.emit_u32(rdata.minimum);
            }
            Self::SRV(rdata) => {
                encoder.emit_u16(rdata.priority);
                encoder.emit_u16(rdata.weight);
                encoder.emit_u16(rdata.port);
                rdata.target.emit_canonical_lowercased(encoder)?;
            }
            Self::SVCB(rdata) => rdata.emit(encoder)?,
            Self::TLSA(rdata) => {
                encoder.emit(rdata.cert_usage);
                encoder.emit(rdata.selector);
                encoder.emit(rdata.matching);
                encoder.emit_vec(&rdata.cert_data);
            }
            Self::TXT(TXT(strings)) => {
                for s in strings {
                    encoder.emit_character_data(s)?;
                }
            }
            Self::Unknown { rdata, .. } => encoder.emit_vec(rdata),
        }
        Ok(())
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A(A(addr)) => write!(f, "{addr}"),
            Self::AAAA(AAAA(addr)) => write!(f, "{addr}"),
            Self::CNAME(CNAME(name)) | Self::NS(NS(name)) | Self::PTR(PTR(name)) => {
                write!(f, "{name}")
            }
            Self::DNSKEY(rdata) => write!(f, "{rdata}"),
            Self::DS(rdata) => write!(f, "{rdata}"),
            Self::DSYNC(rdata) => write!(f, "{rdata}"),
            Self::MX(rdata) => write!(f, "{} {}", rdata.preference, rdata.exchange),
            Self::NSEC(rdata) => write!(f, "{rdata}"),
            Self::NSEC3(rdata) => write!(f, "{rdata}"),
            Self::NSEC3PARAM(rdata) => write!(f, "{rdata}"),
            Self::RRSIG(rdata) => write!(f, "{rdata}"),
            Self::SOA(rdata) => write!(
                f,
                "{} {} {} {} {} {} {}",
                rdata.mname,
                rdata.rname,
                rdata.serial,
                rdata.refresh,
                rdata.retry,
                rdata.expire,
                rdata.minimum
            ),
            Self::SRV(rdata) => write!(
                f,
                "{} {} {} {}",
                rdata.priority, rdata.weight, rdata.port, rdata.target
            ),
            Self::SVCB(rdata) => write!(f, "{rdata}"),
            Self::TLSA(rdata) => write!(
                f,
                "{} {} {} <{} bytes>",
                rdata.cert_usage,
                rdata.selector,
                rdata.matching,
                rdata.cert_data.len()
            ),
            Self::TXT(TXT(strings)) => {
                for s in strings {
                    write!(f, "\"{}\" ", String::from_utf8_lossy(s))?;
                }
                Ok(())
            }
            Self::Unknown { code, rdata } => write!(f, "TYPE{code} <{} bytes>", rdata.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn round_trip(rdata: RData) {
        let bytes = rdata.to_bytes().unwrap();
        let mut decoder = BinDecoder::new(&bytes);
        let decoded =
            RData::read(&mut decoder, rdata.record_type(), bytes.len() as u16).unwrap();
        assert_eq!(rdata, decoded);
    }

    #[test]
    fn test_a_round_trip() {
        round_trip(RData::A(A(Ipv4Addr::new(192, 0, 2, 1))));
    }

    #[test]
    fn test_soa_round_trip() {
        round_trip(RData::SOA(SOA {
            mname: Name::from_str("ns1.example.com.").unwrap(),
            rname: Name::from_str("hostmaster.example.com.").unwrap(),
            serial: 2024010101,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
        }));
    }

    #[test]
    fn test_rdlength_mismatch_rejected() {
        // A record with 5 bytes of rdata is malformed
        let bytes = [192, 0, 2, 1, 99];
        let mut decoder = BinDecoder::new(&bytes);
        assert!(RData::read(&mut decoder, RecordType::A, 5).is_err());
    }
}
