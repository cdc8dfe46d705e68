// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! UDP half of the Do53 client

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::xfer::{verify_reply, ExchangeOpts};

pub(crate) async fn exchange_udp(
    message: &Message,
    addr: SocketAddr,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    let bind: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().expect("constant addr")
    } else {
        "[::]:0".parse().expect("constant addr")
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(addr).await.map_err(map_net_err)?;

    let request = message.to_vec()?;

    timeout(opts.udp_timeout, async {
        socket.send(&request).await.map_err(map_net_err)?;

        let mut buffer = vec![0u8; opts.udp_payload_size.max(512) as usize];
        // off-transaction datagrams are dropped, not errors
        loop {
            let len = socket.recv(&mut buffer).await.map_err(map_net_err)?;
            match Message::from_vec(&buffer[..len]) {
                Ok(reply) => {
                    if verify_reply(message, &reply).is_ok() {
                        return Ok(reply);
                    }
                    debug!("dropping mismatched datagram from {addr}");
                }
                Err(e) => debug!("dropping undecodable datagram from {addr}: {e}"),
            }
        }
    })
    .await
    .map_err(|_| crate::error::ProtoError::from(ProtoErrorKind::Timeout))?
}

pub(crate) fn map_net_err(e: std::io::Error) -> crate::error::ProtoError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => ProtoErrorKind::Refused.into(),
        std::io::ErrorKind::TimedOut => ProtoErrorKind::Timeout.into(),
        _ if e.raw_os_error() == Some(101) => ProtoErrorKind::NetUnreach.into(),
        _ => e.into(),
    }
}
