// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNS over TLS client, RFC 7858

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use ring::digest;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{ProtoError, ProtoErrorKind, ProtoResult};
use crate::op::Message;
use crate::rr::rdata::TLSA;
use crate::xfer::pool::{ConnectionPool, PoolKey};
use crate::xfer::tcp::{read_framed, write_framed};
use crate::xfer::udp::map_net_err;
use crate::xfer::{verify_reply, ExchangeOpts};

const ALPN_DOT: &[u8] = b"dot";

static DOT_POOL: Lazy<ConnectionPool<TlsStream<TcpStream>>> =
    Lazy::new(|| ConnectionPool::new(512, Duration::from_secs(10)));

pub(crate) fn webpki_roots_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));
    root_store
}

/// Build the client config: DANE pinning when TLSA records are cached for
/// the server, the public trust store otherwise
pub(crate) fn client_config(alpn: &[u8], tlsa_records: &[TLSA]) -> Arc<ClientConfig> {
    let mut config = if tlsa_records.is_empty() {
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(webpki_roots_store())
            .with_no_client_auth()
    } else {
        let mut config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(DaneVerifier {
                tlsa_records: tlsa_records.to_vec(),
            }));
        config
    };
    config.alpn_protocols = vec![alpn.to_vec()];
    Arc::new(config)
}

/// Certificate verifier backed by DANE-EE TLSA associations
struct DaneVerifier {
    tlsa_records: Vec<TLSA>,
}

impl DaneVerifier {
    fn matches(&self, end_entity: &Certificate) -> bool {
        self.tlsa_records.iter().any(|tlsa| {
            // DANE-EE with the full certificate as association data
            if tlsa.cert_usage != 3 || tlsa.selector != 0 {
                return false;
            }
            match tlsa.matching {
                0 => tlsa.cert_data == end_entity.0,
                1 => {
                    digest::digest(&digest::SHA256, &end_entity.0).as_ref() == tlsa.cert_data
                }
                2 => {
                    digest::digest(&digest::SHA512, &end_entity.0).as_ref() == tlsa.cert_data
                }
                _ => false,
            }
        })
    }
}

impl ServerCertVerifier for DaneVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.matches(end_entity) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(
                "certificate does not match any TLSA association".to_string(),
            ))
        }
    }
}

async fn connect(
    addr: SocketAddr,
    sni: &str,
    opts: &ExchangeOpts,
) -> ProtoResult<TlsStream<TcpStream>> {
    let config = client_config(ALPN_DOT, &opts.tlsa_records);
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(sni)
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))?;

    let tcp = TcpStream::connect(addr).await.map_err(map_net_err)?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ProtoError::from(ProtoErrorKind::TlsHandshake(e.to_string())))
}

pub(crate) async fn exchange_tls(
    message: &Message,
    addr: SocketAddr,
    opts: &ExchangeOpts,
) -> ProtoResult<Message> {
    let sni = opts.sni_for(addr.ip());
    let key: PoolKey = (addr, sni.clone());
    let request = message.to_vec()?;

    timeout(opts.tcp_timeout, async {
        // a pooled stream may have gone stale under us; one fresh retry
        if let Some(mut stream) = DOT_POOL.take(&key) {
            match exchange_on_stream(message, &request, &mut stream).await {
                Ok(reply) => {
                    DOT_POOL.put(key, stream);
                    return Ok(reply);
                }
                Err(e) => debug!("pooled DoT stream to {addr} failed: {e}"),
            }
        }

        let mut stream = connect(addr, &sni, opts).await?;
        let reply = exchange_on_stream(message, &request, &mut stream).await?;
        DOT_POOL.put(key, stream);
        Ok(reply)
    })
    .await
    .map_err(|_| ProtoError::from(ProtoErrorKind::Timeout))?
}

async fn exchange_on_stream(
    message: &Message,
    request: &[u8],
    stream: &mut TlsStream<TcpStream>,
) -> ProtoResult<Message> {
    write_framed(stream, request).await?;
    let reply_bytes = read_framed(stream).await?;
    let reply = Message::from_vec(&reply_bytes)?;
    verify_reply(message, &reply)?;
    Ok(reply)
}
