// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the recursor

use std::fmt;

use ironwood_proto::{ProtoError, ProtoErrorKind};
use thiserror::Error;

use ironwood_proto::op::ResponseCode;

/// An alias for results returned by functions of this crate
pub type Result<T> = std::result::Result<T, Error>;

/// The error kind for errors that get returned in the crate
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A wire-level failure; absorbed into retries until budgets are spent
    #[error("transport failure: {0}")]
    Transport(#[source] ProtoError),

    /// The remote replied with something that is not an answer to the query
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// DNSSEC evidence is contradicted; never retried, never upgraded
    #[error("validation yielded bogus: {0}")]
    ValidationBogus(String),

    /// The delegation graph revisited a zone within one request
    #[error("delegation loop through {0}")]
    CycleDetected(String),

    /// The referral chain exceeded the configured depth
    #[error("recursion depth exceeded: {0}")]
    DepthExceeded(u8),

    /// The CNAME chain exceeded the configured length
    #[error("cname chain exceeded: {0}")]
    CnameChainExceeded(u8),

    /// The per-request deadline elapsed
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Every candidate server failed or was exhausted
    #[error("no authoritative server answered for {0}")]
    ServersExhausted(String),

    /// Fatal configuration problem at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Any other message
    #[error("{0}")]
    Msg(String),
}

/// The error type for errors that get returned in the crate
#[derive(Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.kind.as_ref())
    }
}

impl Error {
    /// Get the kind of the error
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The response code a client should see for this failure
    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::ServFail
    }

    /// True for wire-level failures worth retrying elsewhere
    pub fn is_transport(&self) -> bool {
        matches!(*self.kind, ErrorKind::Transport(_))
    }

    /// True when the failure is a DNSSEC verdict; retrying cannot help
    pub fn is_bogus(&self) -> bool {
        matches!(*self.kind, ErrorKind::ValidationBogus(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        match e.kind() {
            ProtoErrorKind::Protocol(msg) => {
                return ErrorKind::Protocol(msg.clone()).into();
            }
            ProtoErrorKind::QueryMismatch => {
                return ErrorKind::Protocol("response did not match query".to_string()).into();
            }
            _ => {}
        }
        ErrorKind::Transport(e).into()
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        ErrorKind::Msg(msg).into()
    }
}

impl From<&'static str> for Error {
    fn from(msg: &'static str) -> Self {
        ErrorKind::Msg(msg.to_string()).into()
    }
}
