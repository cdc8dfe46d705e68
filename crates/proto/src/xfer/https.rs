// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNS over HTTPS client over HTTP/2, RFC 8484

use std::net::SocketAddr;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Version};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtoError, ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::xfer::tls::client_config;
use crate::xfer::udp::map_net_err;
use crate::xfer::{verify_reply, ExchangeOpts};

const ALPN_H2: &[u8] = b"h2";

/// The MIME both request and response must carry
pub(crate) const MIME_APPLICATION_DNS: &str = "application/dns-message";

pub(crate) async fn exchange_https(
    message: &Message,
    addr: SocketAddr,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    // per the RFC, a zero id allows for the HTTP exchange to be cached better
    let mut zero_id = message.clone();
    zero_id.set_id(0);
    let request_bytes = zero_id.to_vec()?;

    let sni = opts.sni_for(addr.ip());

    let mut reply = timeout(
        opts.tcp_timeout,
        inner_send(&zero_id, request_bytes, addr, &sni, opts),
    )
    .await
    .map_err(|_| ProtoError::from(ProtoErrorKind::Timeout))??;

    // restore the transaction id the caller is waiting for
    reply.set_id(message.id());
    Ok(reply)
}

async fn inner_send(
    message: &Message,
    request_bytes: Vec<u8>,
    addr: SocketAddr,
    sni: &str,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    let config = client_config(ALPN_H2, &opts.tlsa_records);
    let connector = tokio_rustls::TlsConnector::from(config);
    let server_name = rustls::ServerName::try_from(sni)
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))?;

    let tcp = TcpStream::connect(addr).await.map_err(map_net_err)?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))?;

    let (mut send_request, connection) = h2::client::handshake(tls)
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 handshake: {e}"))))?;

    // drive the connection until our stream completes
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("h2 connection error: {e}");
        }
    });

    let mut send_request = send_request
        .ready()
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 not ready: {e}"))))?;

    let request = Request::builder()
        .method(Method::POST)
        .version(Version::HTTP_2)
        .uri(format!("https://{}{}", sni, opts.doh_path))
        .header(CONTENT_TYPE, MIME_APPLICATION_DNS)
        .header(ACCEPT, MIME_APPLICATION_DNS)
        .header(CONTENT_LENGTH, request_bytes.len())
        .body(())
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("bad request: {e}"))))?;

    let (response, mut send_stream) = send_request
        .send_request(request, false)
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 send: {e}"))))?;

    send_stream
        .send_data(Bytes::from(request_bytes), true)
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 send body: {e}"))))?;

    let response = response
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 response: {e}"))))?;

    if !response.status().is_success() {
        return Err(ProtoErrorKind::Protocol(format!(
            "http unsuccessful code: {}",
            response.status()
        ))
        .into());
    }

    // when ContentType is missing, the standard DNS format is assumed
    if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
        if content_type.to_str().unwrap_or_default() != MIME_APPLICATION_DNS {
            return Err(ProtoErrorKind::Protocol(format!(
                "unsupported ContentType, must be {MIME_APPLICATION_DNS}"
            ))
            .into());
        }
    }

    let mut body = response.into_body();
    let mut response_bytes = Vec::with_capacity(512);
    while let Some(chunk) = body.data().await {
        let chunk = chunk
            .map_err(|e| ProtoError::from(ProtoErrorKind::Protocol(format!("h2 body: {e}"))))?;
        response_bytes.extend_from_slice(&chunk);
        let _ = body.flow_control().release_capacity(chunk.len());
    }

    let reply = Message::from_vec(&response_bytes)?;
    verify_reply(message, &reply)?;
    Ok(reply)
}
