// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the crate

use std::{fmt, io};

use thiserror::Error;

/// An alias for results returned by functions of this crate
pub type ProtoResult<T> = Result<T, ProtoError>;

/// The error kind for errors that get returned in the crate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtoErrorKind {
    /// The wire operation did not complete in time
    #[error("request timed out")]
    Timeout,

    /// The remote refused the query or the connection
    #[error("request refused")]
    Refused,

    /// The TLS handshake with the remote failed
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    /// The remote sent something that is not a well-formed DNS reply
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The reply was truncated and could not be recovered over TCP
    #[error("response was truncated")]
    Truncated,

    /// The network path to the remote is unavailable
    #[error("network unreachable")]
    NetUnreach,

    /// A label exceeded the 63 octet bound
    #[error("label bytes exceed 63: {0}")]
    LabelBytesTooLong(usize),

    /// A name exceeded the 255 octet bound
    #[error("name bytes exceed 255: {0}")]
    DomainNameTooLong(usize),

    /// Reading past the end of the wire buffer
    #[error("buffer underflow at {index}, buffer length {length}")]
    Underflow {
        /// Byte offset at which the read was attempted
        index: usize,
        /// Length of the buffer
        length: usize,
    },

    /// A compression pointer formed a cycle or pointed forward
    #[error("invalid compression pointer: {0}")]
    BadPointer(u16),

    /// An unrecognized or unsupported value where a known one is required
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The message failed the id/question match against the outstanding query
    #[error("query mismatch in response")]
    QueryMismatch,

    /// An underlying io error
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Any other message
    #[error("{0}")]
    Msg(String),
}

/// The error type for errors that get returned in the crate
#[derive(Debug)]
pub struct ProtoError {
    kind: Box<ProtoErrorKind>,
}

impl std::error::Error for ProtoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.kind.as_ref())
    }
}

impl ProtoError {
    /// Get the kind of the error
    pub fn kind(&self) -> &ProtoErrorKind {
        &self.kind
    }

    /// True when the failure is one the caller may retry against another
    /// address or transport
    pub fn is_transport(&self) -> bool {
        matches!(
            *self.kind,
            ProtoErrorKind::Timeout
                | ProtoErrorKind::Refused
                | ProtoErrorKind::TlsHandshake(_)
                | ProtoErrorKind::NetUnreach
        )
    }
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl From<ProtoErrorKind> for ProtoError {
    fn from(kind: ProtoErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }
}

impl From<io::Error> for ProtoError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => ProtoErrorKind::Timeout.into(),
            io::ErrorKind::ConnectionRefused => ProtoErrorKind::Refused.into(),
            _ => ProtoErrorKind::Io(e).into(),
        }
    }
}

impl From<String> for ProtoError {
    fn from(msg: String) -> Self {
        ProtoErrorKind::Msg(msg).into()
    }
}

impl From<&'static str> for ProtoError {
    fn from(msg: &'static str) -> Self {
        ProtoErrorKind::Msg(msg.to_string()).into()
    }
}
