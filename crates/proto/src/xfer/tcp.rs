// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! TCP half of the Do53 client and the shared length framing

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::xfer::udp::map_net_err;
use crate::xfer::{verify_reply, ExchangeOpts};

/// Write a 2-byte length-prefixed message, the framing shared by TCP and DoT
pub(crate) async fn write_framed<S>(stream: &mut S, bytes: &[u8]) -> ProtoResult<()>
where
    S: AsyncWrite + Unpin,
{
    if bytes.len() > u16::MAX as usize {
        return Err(ProtoErrorKind::Protocol("message over 64KiB".to_string()).into());
    }
    stream
        .write_all(&(bytes.len() as u16).to_be_bytes())
        .await
        .map_err(map_net_err)?;
    stream.write_all(bytes).await.map_err(map_net_err)?;
    stream.flush().await.map_err(map_net_err)?;
    Ok(())
}

/// Read one 2-byte length-prefixed message
pub(crate) async fn read_framed<S>(stream: &mut S) -> ProtoResult<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 2];
    stream
        .read_exact(&mut len_bytes)
        .await
        .map_err(map_net_err)?;
    let len = u16::from_be_bytes(len_bytes) as usize;

    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer).await.map_err(map_net_err)?;
    Ok(buffer)
}

pub(crate) async fn exchange_tcp(
    message: &Message,
    addr: SocketAddr,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    let request = message.to_vec()?;

    timeout(opts.tcp_timeout, async {
        let mut stream = TcpStream::connect(addr).await.map_err(map_net_err)?;
        write_framed(&mut stream, &request).await?;
        let reply_bytes = read_framed(&mut stream).await?;
        let reply = Message::from_vec(&reply_bytes)?;
        verify_reply(message, &reply)?;
        Ok(reply)
    })
    .await
    .map_err(|_| crate::error::ProtoError::from(ProtoErrorKind::Timeout))?
}
