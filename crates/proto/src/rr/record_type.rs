// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Record type definitions

use std::fmt;

/// The type of the resource record
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum RecordType {
    /// [RFC 1035] IPv4 Address record
    A,
    /// [RFC 3596] IPv6 address record
    AAAA,
    /// [RFC 1035] Canonical name record
    CNAME,
    /// [RFC 4034] Delegation signer
    DS,
    /// [RFC 4034] DNS Key record
    DNSKEY,
    /// Parent-synchronization endpoint advertisement, consumed only
    DSYNC,
    /// [RFC 1035] Mail exchange record
    MX,
    /// [RFC 1035] Name server record
    NS,
    /// [RFC 4034] Next-Secure record
    NSEC,
    /// [RFC 5155] NSEC record version 3
    NSEC3,
    /// [RFC 5155] NSEC3 parameters
    NSEC3PARAM,
    /// [RFC 6891] Option record, EDNS pseudo-RR
    OPT,
    /// [RFC 1035] Pointer record
    PTR,
    /// [RFC 4034] DNSSEC signature
    RRSIG,
    /// [RFC 1035] Start of (a zone of) authority record
    SOA,
    /// [RFC 2782] Service locator
    SRV,
    /// [RFC 9460] General-purpose service binding
    SVCB,
    /// [RFC 6698] TLSA certificate association
    TLSA,
    /// [RFC 1035] Text record
    TXT,
    /// Unknown record type
    Unknown(u16),
}

impl RecordType {
    /// True for the DNSSEC meta record types
    pub fn is_dnssec(self) -> bool {
        matches!(
            self,
            Self::DS | Self::DNSKEY | Self::NSEC | Self::NSEC3 | Self::NSEC3PARAM | Self::RRSIG
        )
    }
}

const DSYNC_TYPE: u16 = 66;

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::A,
            28 => Self::AAAA,
            5 => Self::CNAME,
            43 => Self::DS,
            48 => Self::DNSKEY,
            DSYNC_TYPE => Self::DSYNC,
            15 => Self::MX,
            2 => Self::NS,
            47 => Self::NSEC,
            50 => Self::NSEC3,
            51 => Self::NSEC3PARAM,
            41 => Self::OPT,
            12 => Self::PTR,
            46 => Self::RRSIG,
            6 => Self::SOA,
            33 => Self::SRV,
            64 => Self::SVCB,
            52 => Self::TLSA,
            16 => Self::TXT,
            _ => Self::Unknown(value),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rt: RecordType) -> Self {
        match rt {
            RecordType::A => 1,
            RecordType::AAAA => 28,
            RecordType::CNAME => 5,
            RecordType::DS => 43,
            RecordType::DNSKEY => 48,
            RecordType::DSYNC => DSYNC_TYPE,
            RecordType::MX => 15,
            RecordType::NS => 2,
            RecordType::NSEC => 47,
            RecordType::NSEC3 => 50,
            RecordType::NSEC3PARAM => 51,
            RecordType::OPT => 41,
            RecordType::PTR => 12,
            RecordType::RRSIG => 46,
            RecordType::SOA => 6,
            RecordType::SRV => 33,
            RecordType::SVCB => 64,
            RecordType::TLSA => 52,
            RecordType::TXT => 16,
            RecordType::Unknown(value) => value,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::AAAA => write!(f, "AAAA"),
            Self::CNAME => write!(f, "CNAME"),
            Self::DS => write!(f, "DS"),
            Self::DNSKEY => write!(f, "DNSKEY"),
            Self::DSYNC => write!(f, "DSYNC"),
            Self::MX => write!(f, "MX"),
            Self::NS => write!(f, "NS"),
            Self::NSEC => write!(f, "NSEC"),
            Self::NSEC3 => write!(f, "NSEC3"),
            Self::NSEC3PARAM => write!(f, "NSEC3PARAM"),
            Self::OPT => write!(f, "OPT"),
            Self::PTR => write!(f, "PTR"),
            Self::RRSIG => write!(f, "RRSIG"),
            Self::SOA => write!(f, "SOA"),
            Self::SRV => write!(f, "SRV"),
            Self::SVCB => write!(f, "SVCB"),
            Self::TLSA => write!(f, "TLSA"),
            Self::TXT => write!(f, "TXT"),
            Self::Unknown(code) => write!(f, "TYPE{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_codes() {
        for code in 0..260u16 {
            let rt = RecordType::from(code);
            assert_eq!(u16::from(rt), code);
        }
    }

    #[test]
    fn test_dsync_is_first_class() {
        assert_eq!(RecordType::from(66), RecordType::DSYNC);
        assert_eq!(u16::from(RecordType::DSYNC), 66);
    }
}
