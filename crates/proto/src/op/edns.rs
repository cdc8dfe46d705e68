// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Extended DNS options, RFC 6891

use crate::error::ProtoResult;
use crate::rr::{Name, RecordType};
use crate::serialize::binary::{BinDecoder, BinEncodable, BinEncoder};

/// The EDNS(0) state of a message, carried in an OPT pseudo-record
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Edns {
    /// Requester's maximum UDP payload size
    pub max_payload: u16,
    /// EDNS version, 0
    pub version: u8,
    /// DO: the requester understands DNSSEC records
    pub dnssec_ok: bool,
    /// High 8 bits of an extended response code
    pub rcode_high: u8,
    /// Raw EDNS options, uninterpreted
    pub options: Vec<(u16, Vec<u8>)>,
}

impl Default for Edns {
    fn default() -> Self {
        Self {
            max_payload: 4096,
            version: 0,
            dnssec_ok: false,
            rcode_high: 0,
            options: Vec::new(),
        }
    }
}

impl Edns {
    /// Emit as an OPT record in the additional section
    pub(crate) fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        Name::root().emit(encoder)?;
        encoder.emit_u16(RecordType::OPT.into());
        encoder.emit_u16(self.max_payload);
        let ttl: u32 = (u32::from(self.rcode_high) << 24)
            | (u32::from(self.version) << 16)
            | if self.dnssec_ok { 0x8000 } else { 0 };
        encoder.emit_u32(ttl);

        let len_at = encoder.len();
        encoder.emit_u16(0);
        for (code, data) in &self.options {
            encoder.emit_u16(*code);
            encoder.emit_u16(data.len() as u16);
            encoder.emit_vec(data);
        }
        let rdata_len = encoder.len() - len_at - 2;
        encoder.patch_u16(len_at, rdata_len as u16);
        Ok(())
    }

    /// Reconstruct from the parts of a decoded OPT record
    pub(crate) fn from_opt(class: u16, ttl: u32, rdata: &[u8]) -> ProtoResult<Self> {
        let mut options = Vec::new();
        let mut decoder = BinDecoder::new(rdata);
        while !decoder.is_done() {
            let code = decoder.read_u16()?;
            let len = decoder.read_u16()? as usize;
            options.push((code, decoder.read_slice(len)?.to_vec()));
        }
        Ok(Self {
            max_payload: class,
            version: ((ttl >> 16) & 0xFF) as u8,
            dnssec_ok: ttl & 0x8000 != 0,
            rcode_high: (ttl >> 24) as u8,
            options,
        })
    }
}
