// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Message metadata

use std::fmt;

use crate::error::ProtoResult;
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// Is this message a query or a response
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// QR = 0
    Query,
    /// QR = 1
    Response,
}

/// Operation code of the message
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
    /// A standard query
    Query,
    /// A server status request
    Status,
    /// A zone change notification
    Notify,
    /// A dynamic update
    Update,
    /// An opcode this crate does not interpret
    Unknown(u8),
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Query,
            2 => Self::Status,
            4 => Self::Notify,
            5 => Self::Update,
            _ => Self::Unknown(value),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op_code: OpCode) -> Self {
        match op_code {
            OpCode::Query => 0,
            OpCode::Status => 2,
            OpCode::Notify => 4,
            OpCode::Update => 5,
            OpCode::Unknown(value) => value,
        }
    }
}

/// Response code, the 4 header bits; extended bits live in EDNS
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseCode {
    /// No error
    NoError,
    /// The query was malformed
    FormErr,
    /// The server failed to answer
    ServFail,
    /// The name does not exist
    NXDomain,
    /// The operation is not implemented
    NotImp,
    /// The server refuses to answer
    Refused,
    /// A code this crate does not interpret
    Unknown(u8),
}

impl ResponseCode {
    /// The low 4 bits that fit in the header
    pub fn low(self) -> u8 {
        u8::from(self) & 0x0F
    }
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NXDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            _ => Self::Unknown(value),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(rcode: ResponseCode) -> Self {
        match rcode {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NXDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "NOERROR"),
            Self::FormErr => write!(f, "FORMERR"),
            Self::ServFail => write!(f, "SERVFAIL"),
            Self::NXDomain => write!(f, "NXDOMAIN"),
            Self::NotImp => write!(f, "NOTIMP"),
            Self::Refused => write!(f, "REFUSED"),
            Self::Unknown(value) => write!(f, "RCODE{value}"),
        }
    }
}

/// Message header, RFC 1035 section 4.1.1
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    id: u16,
    message_type: MessageType,
    op_code: OpCode,
    authoritative: bool,
    truncated: bool,
    recursion_desired: bool,
    recursion_available: bool,
    authentic_data: bool,
    checking_disabled: bool,
    response_code: ResponseCode,
    query_count: u16,
    answer_count: u16,
    authority_count: u16,
    additional_count: u16,
}

impl Header {
    /// Construct a header for the given id, type and op code
    pub fn new(id: u16, message_type: MessageType, op_code: OpCode) -> Self {
        Self {
            id,
            message_type,
            op_code,
            authoritative: false,
            truncated: false,
            recursion_desired: false,
            recursion_available: false,
            authentic_data: false,
            checking_disabled: false,
            response_code: ResponseCode::NoError,
            query_count: 0,
            answer_count: 0,
            authority_count: 0,
            additional_count: 0,
        }
    }

    /// The transaction id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Set the transaction id
    pub fn set_id(&mut self, id: u16) -> &mut Self {
        self.id = id;
        self
    }

    /// Query or response
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The operation of this message
    pub fn op_code(&self) -> OpCode {
        self.op_code
    }

    /// AA: the responder is authoritative for the question's zone
    pub fn authoritative(&self) -> bool {
        self.authoritative
    }

    /// Set the AA flag
    pub fn set_authoritative(&mut self, authoritative: bool) -> &mut Self {
        self.authoritative = authoritative;
        self
    }

    /// TC: the message was cut to fit the transport
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Set the TC flag
    pub fn set_truncated(&mut self, truncated: bool) -> &mut Self {
        self.truncated = truncated;
        self
    }

    /// RD: the requester wants the responder to recurse
    pub fn recursion_desired(&self) -> bool {
        self.recursion_desired
    }

    /// Set the RD flag
    pub fn set_recursion_desired(&mut self, recursion_desired: bool) -> &mut Self {
        self.recursion_desired = recursion_desired;
        self
    }

    /// RA: the responder offers recursion
    pub fn recursion_available(&self) -> bool {
        self.recursion_available
    }

    /// Set the RA flag
    pub fn set_recursion_available(&mut self, recursion_available: bool) -> &mut Self {
        self.recursion_available = recursion_available;
        self
    }

    /// AD: all data in the response validated
    pub fn authentic_data(&self) -> bool {
        self.authentic_data
    }

    /// Set the AD flag
    pub fn set_authentic_data(&mut self, authentic_data: bool) -> &mut Self {
        self.authentic_data = authentic_data;
        self
    }

    /// CD: the requester does its own validation
    pub fn checking_disabled(&self) -> bool {
        self.checking_disabled
    }

    /// Set the CD flag
    pub fn set_checking_disabled(&mut self, checking_disabled: bool) -> &mut Self {
        self.checking_disabled = checking_disabled;
        self
    }

    /// The response code
    pub fn response_code(&self) -> ResponseCode {
        self.response_code
    }

    /// Set the response code
    pub fn set_response_code(&mut self, response_code: ResponseCode) -> &mut Self {
        self.response_code = response_code;
        self
    }

    /// Count of question entries
    pub fn query_count(&self) -> u16 {
        self.query_count
    }

    /// Set the question count; overwritten from section lengths on emit
    pub fn set_query_count(&mut self, query_count: u16) -> &mut Self {
        self.query_count = query_count;
        self
    }

    /// Count of answer records
    pub fn answer_count(&self) -> u16 {
        self.answer_count
    }

    /// Set the answer count; overwritten from section lengths on emit
    pub fn set_answer_count(&mut self, answer_count: u16) -> &mut Self {
        self.answer_count = answer_count;
        self
    }

    /// Count of authority records
    pub fn authority_count(&self) -> u16 {
        self.authority_count
    }

    /// Set the authority count; overwritten from section lengths on emit
    pub fn set_authority_count(&mut self, authority_count: u16) -> &mut Self {
        self.authority_count = authority_count;
        self
    }

    /// Count of additional records
    pub fn additional_count(&self) -> u16 {
        self.additional_count
    }

    /// Set the additional count; overwritten from section lengths on emit
    pub fn set_additional_count(&mut self, additional_count: u16) -> &mut Self {
        self.additional_count = additional_count;
        self
    }
}

impl BinEncodable for Header {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit_u16(self.id);

        let mut flags: u16 = 0;
        if self.message_type == MessageType::Response {
            flags |= 0x8000;
        }
        flags |= (u8::from(self.op_code) as u16 & 0x0F) << 11;
        if self.authoritative {
            flags |= 0x0400;
        }
        if self.truncated {
            flags |= 0x0200;
        }
        if self.recursion_desired {
            flags |= 0x0100;
        }
        if self.recursion_available {
            flags |= 0x0080;
        }
        if self.authentic_data {
            flags |= 0x0020;
        }
        if self.checking_disabled {
            flags |= 0x0010;
        }
        flags |= self.response_code.low() as u16;
        encoder.emit_u16(flags);

        encoder.emit_u16(self.query_count);
        encoder.emit_u16(self.answer_count);
        encoder.emit_u16(self.authority_count);
        encoder.emit_u16(self.additional_count);
        Ok(())
    }
}

impl<'r> BinDecodable<'r> for Header {
    fn read(decoder: &mut BinDecoder<'r>) -> ProtoResult<Self> {
        let id = decoder.read_u16()?;
        let flags = decoder.read_u16()?;

        Ok(Self {
            id,
            message_type: if flags & 0x8000 != 0 {
                MessageType::Response
            } else {
                MessageType::Query
            },
            op_code: OpCode::from(((flags >> 11) & 0x0F) as u8),
            authoritative: flags & 0x0400 != 0,
            truncated: flags & 0x0200 != 0,
            recursion_desired: flags & 0x0100 != 0,
            recursion_available: flags & 0x0080 != 0,
            authentic_data: flags & 0x0020 != 0,
            checking_disabled: flags & 0x0010 != 0,
            response_code: ResponseCode::from((flags & 0x000F) as u8),
            query_count: decoder.read_u16()?,
            answer_count: decoder.read_u16()?,
            authority_count: decoder.read_u16()?,
            additional_count: decoder.read_u16()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut header = Header::new(0x1234, MessageType::Response, OpCode::Query);
        header
            .set_authoritative(true)
            .set_recursion_desired(true)
            .set_response_code(ResponseCode::NXDomain)
            .set_query_count(1)
            .set_answer_count(0)
            .set_authority_count(1);

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
    }
}
