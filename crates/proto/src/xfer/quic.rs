// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNS over QUIC client, RFC 9250

use std::net::SocketAddr;
use std::time::Duration;

use once_cell::sync::Lazy;
use quinn::{ClientConfig, Connection, Endpoint};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtoError, ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::xfer::pool::{ConnectionPool, PoolKey};
use crate::xfer::tls::client_config;
use crate::xfer::{verify_reply, ExchangeOpts};

const ALPN_DOQ: &[u8] = b"doq";

// 64KiB message plus the 2-byte length prefix
const MAX_STREAM_BYTES: usize = u16::MAX as usize + 2;

// the endpoint is held beside the connection so the driver outlives reuse
static DOQ_POOL: Lazy<ConnectionPool<(Endpoint, Connection)>> =
    Lazy::new(|| ConnectionPool::new(512, Duration::from_secs(10)));

pub(crate) async fn exchange_quic(
    message: &Message,
    addr: SocketAddr,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    // RFC 9250 4.2.1: the message id on a DoQ stream MUST be zero
    let mut zero_id = message.clone();
    zero_id.set_id(0);

    let sni = opts.sni_for(addr.ip());
    let key: PoolKey = (addr, sni.clone());

    let mut reply = timeout(opts.tcp_timeout, async {
        if let Some((endpoint, connection)) = DOQ_POOL.take(&key) {
            match exchange_on_connection(&zero_id, &connection).await {
                Ok(reply) => {
                    DOQ_POOL.put(key, (endpoint, connection));
                    return Ok::<Message, ProtoError>(reply);
                }
                Err(e) => debug!("pooled DoQ connection to {addr} failed: {e}"),
            }
        }

        let (endpoint, connection) = connect(addr, &sni, opts).await?;
        let reply = exchange_on_connection(&zero_id, &connection).await?;
        DOQ_POOL.put(key, (endpoint, connection));
        Ok(reply)
    })
    .await
    .map_err(|_| ProtoError::from(ProtoErrorKind::Timeout))??;

    reply.set_id(message.id());
    Ok(reply)
}

async fn connect(
    addr: SocketAddr,
    sni: &str,
    opts: &ExchangeOpts,
) -> ProtoResult<(Endpoint, Connection)> {
    let bind: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().expect("constant addr")
    } else {
        "[::]:0".parse().expect("constant addr")
    };

    let endpoint = Endpoint::client(bind)?;
    let quic_config = ClientConfig::new(client_config(ALPN_DOQ, &opts.tlsa_records));

    let connecting = endpoint
        .connect_with(quic_config, addr, sni)
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))?;
    let connection = connecting
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))?;
    Ok((endpoint, connection))
}

/// One bidirectional stream per query, with the 2-byte length framing
async fn exchange_on_connection(
    message: &Message,
    connection: &Connection,
) -> ProtoResult<Message> {
    let request = message.to_vec()?;

    let (mut send, mut recv) = connection
        .open_bi()
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("doq open_bi: {e}"))))?;

    let mut framed = Vec::with_capacity(request.len() + 2);
    framed.extend_from_slice(&(request.len() as u16).to_be_bytes());
    framed.extend_from_slice(&request);

    send.write_all(&framed)
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("doq write: {e}"))))?;
    send.finish()
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("doq finish: {e}"))))?;

    let reply_bytes = recv
        .read_to_end(MAX_STREAM_BYTES)
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("doq read: {e}"))))?;

    if reply_bytes.len() < 2 {
        return Err(ProtoErrorKind::Protocol("doq reply under 2 bytes".to_string()).into());
    }
    let len = u16::from_be_bytes([reply_bytes[0], reply_bytes[1]]) as usize;
    let body = reply_bytes
        .get(2..2 + len)
        .ok_or_else(|| ProtoError::from(ProtoErrorKind::Protocol("doq bad framing".to_string())))?;

    let reply = Message::from_vec(body)?;
    verify_reply(message, &reply)?;
    Ok(reply)
}
