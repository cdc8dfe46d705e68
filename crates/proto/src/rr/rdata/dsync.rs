// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DSYNC record data: endpoint advertisement for child-to-parent
//! synchronization, consumed by the discovery helper and never produced

use std::fmt;

use crate::error::ProtoResult;
use crate::rr::{Name, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// The semantic a DSYNC endpoint implements
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DsyncScheme {
    /// Endpoint accepts generalized NOTIFY messages
    Notify,
    /// Endpoint accepts UPDATE messages
    Update,
    /// Endpoint accepts error/telemetry reports
    Report,
    /// A scheme this crate does not interpret
    Unknown(u8),
}

impl From<u8> for DsyncScheme {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Notify,
            2 => Self::Update,
            3 => Self::Report,
            _ => Self::Unknown(value),
        }
    }
}

impl From<DsyncScheme> for u8 {
    fn from(scheme: DsyncScheme) -> Self {
        match scheme {
            DsyncScheme::Notify => 1,
            DsyncScheme::Update => 2,
            DsyncScheme::Report => 3,
            DsyncScheme::Unknown(value) => value,
        }
    }
}

impl fmt::Display for DsyncScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notify => write!(f, "NOTIFY"),
            Self::Update => write!(f, "UPDATE"),
            Self::Report => write!(f, "REPORT"),
            Self::Unknown(value) => write!(f, "SCHEME{value}"),
        }
    }
}

/// DSYNC record data
///
/// ```text
/// RDATA layout:
///
///   scheme (u8), type (u16), port (u16), target (uncompressed domain name)
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DSYNC {
    /// Which synchronization semantic the endpoint implements
    pub scheme: DsyncScheme,
    /// The message type the endpoint expects, e.g. CDS or CSYNC notifies
    pub rrtype: RecordType,
    /// Port the endpoint listens on
    pub port: u16,
    /// Hostname of the endpoint, to be resolved by the consumer
    pub target: Name,
}

impl DSYNC {
    pub(crate) fn read(decoder: &mut BinDecoder<'_>) -> ProtoResult<Self> {
        let scheme = DsyncScheme::from(decoder.read_u8()?);
        let rrtype = RecordType::from(decoder.read_u16()?);
        let port = decoder.read_u16()?;
        let target = Name::read(decoder)?;
        Ok(Self {
            scheme,
            rrtype,
            port,
            target,
        })
    }
}

impl BinEncodable for DSYNC {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit(self.scheme.into());
        encoder.emit_u16(self.rrtype.into());
        encoder.emit_u16(self.port);
        encoder.emit_vec(&self.target.to_canonical_bytes());
        Ok(())
    }
}

impl fmt::Display for DSYNC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.rrtype, self.scheme, self.port, self.target
        )
    }
}
