// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The wire client: one query, over one transport, to one server
//!
//! Retry policy across addresses and transports deliberately does not live
//! here; callers decide what a failure means.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::rr::rdata::TLSA;

mod https;
mod pool;
mod quic;
mod tcp;
mod tls;
mod udp;

pub use pool::ConnectionPool;

/// The transports a query can be dispatched over
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transport {
    /// Classic DNS over UDP, falling back to TCP on truncation
    Do53,
    /// DNS over TLS, RFC 7858
    Dot,
    /// DNS over HTTPS (HTTP/2), RFC 8484
    Doh,
    /// DNS over QUIC, RFC 9250
    Doq,
}

impl Transport {
    /// The well-known port of the transport
    pub fn default_port(self) -> u16 {
        match self {
            Self::Do53 => 53,
            Self::Dot => 853,
            Self::Doh => 443,
            Self::Doq => 853,
        }
    }

    /// The ALPN token a SVCB record advertises for this transport
    pub fn alpn(self) -> &'static str {
        match self {
            Self::Do53 => "do53",
            Self::Dot => "dot",
            Self::Doh => "h2",
            Self::Doq => "doq",
        }
    }

    /// Map an SVCB ALPN token to a transport
    pub fn from_alpn(alpn: &str) -> Option<Self> {
        match alpn {
            "dot" => Some(Self::Dot),
            "h2" | "h3" | "doh" => Some(Self::Doh),
            "doq" => Some(Self::Doq),
            "do53" => Some(Self::Do53),
            _ => None,
        }
    }

    /// All transports, in preference-neutral order
    pub fn all() -> [Self; 4] {
        [Self::Do53, Self::Dot, Self::Doh, Self::Doq]
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Do53 => write!(f, "Do53"),
            Self::Dot => write!(f, "DoT"),
            Self::Doh => write!(f, "DoH"),
            Self::Doq => write!(f, "DoQ"),
        }
    }
}

/// Per-exchange options, owned by the caller
#[derive(Clone, Debug)]
pub struct ExchangeOpts {
    /// Timeout for the UDP half of Do53
    pub udp_timeout: Duration,
    /// Timeout for TCP, TLS, HTTPS and QUIC exchanges
    pub tcp_timeout: Duration,
    /// Advertised EDNS payload size, also the UDP receive buffer bound
    pub udp_payload_size: u16,
    /// TLS server name; defaults to the address in string form
    pub server_name: Option<String>,
    /// Cached DANE records for the server, checked before the trust store
    pub tlsa_records: Vec<TLSA>,
    /// Path component of the DoH URI
    pub doh_path: String,
}

impl Default for ExchangeOpts {
    fn default() -> Self {
        Self {
            udp_timeout: Duration::from_secs(2),
            tcp_timeout: Duration::from_secs(5),
            udp_payload_size: 4096,
            server_name: None,
            tlsa_records: Vec::new(),
            doh_path: "/dns-query".to_string(),
        }
    }
}

impl ExchangeOpts {
    pub(crate) fn sni_for(&self, addr: IpAddr) -> String {
        self.server_name
            .clone()
            .unwrap_or_else(|| addr.to_string())
    }
}

/// Send `message` to `server` over `transport` and await the reply.
///
/// Returns the reply and the measured round-trip time. Exactly one
/// query is sent; Do53 truncation is recovered over TCP to the same
/// address, every other failure surfaces as a [`crate::error::ProtoError`].
pub async fn exchange(
    message: &Message,
    server: IpAddr,
    transport: Transport,
    port: u16,
    opts: &ExchangeOpts,
) -> ProtoResult<(Message, Duration)> {
    let addr = SocketAddr::new(server, port);
    let start = Instant::now();

    debug!("exchange {} {} id {}", transport, addr, message.id());

    let reply = match transport {
        Transport::Do53 => {
            match udp::exchange_udp(message, addr, opts).await {
                Ok(reply) if reply.truncated() => {
                    debug!("truncated reply from {addr}, retrying over TCP");
                    tcp::exchange_tcp(message, addr, opts).await?
                }
                Ok(reply) => reply,
                // a UDP failure is not retried over TCP, the caller owns
                // address and transport fallback
                Err(e) => return Err(e),
            }
        }
        Transport::Dot => tls::exchange_tls(message, addr, opts).await?,
        Transport::Doh => https::exchange_https(message, addr, opts).await?,
        Transport::Doq => quic::exchange_quic(message, addr, opts).await?,
    };

    let rtt = start.elapsed();

    if reply.truncated() {
        return Err(ProtoErrorKind::Truncated.into());
    }

    Ok((reply, rtt))
}

/// Check a reply against the outstanding query; id and question must match
pub(crate) fn verify_reply(message: &Message, reply: &Message) -> ProtoResult<()> {
    if reply.id() != message.id() {
        return Err(ProtoErrorKind::QueryMismatch.into());
    }
    match (message.queries().first(), reply.queries().first()) {
        (Some(sent), Some(got)) if sent.matches(got) => Ok(()),
        (None, _) => Ok(()),
        _ => Err(ProtoErrorKind::QueryMismatch.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        assert_eq!(Transport::Do53.default_port(), 53);
        assert_eq!(Transport::Dot.default_port(), 853);
        assert_eq!(Transport::Doh.default_port(), 443);
        assert_eq!(Transport::Doq.default_port(), 853);
    }

    #[test]
    fn test_alpn_mapping() {
        assert_eq!(Transport::from_alpn("dot"), Some(Transport::Dot));
        assert_eq!(Transport::from_alpn("doq"), Some(Transport::Doq));
        assert_eq!(Transport::from_alpn("h2"), Some(Transport::Doh));
        assert_eq!(Transport::from_alpn("spdy"), None);
    }
}
