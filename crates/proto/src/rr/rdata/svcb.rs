// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! SVCB record data, RFC 9460

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::rr::Name;
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

const KEY_ALPN: u16 = 1;
const KEY_PORT: u16 = 3;
const KEY_IPV4HINT: u16 = 4;
const KEY_IPV6HINT: u16 = 6;

/// A single service parameter value
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SvcParamValue {
    /// `alpn`: protocol identifiers the endpoint speaks
    Alpn(Vec<String>),
    /// `port`: alternative port for the service
    Port(u16),
    /// `ipv4hint`: candidate IPv4 addresses
    Ipv4Hint(Vec<Ipv4Addr>),
    /// `ipv6hint`: candidate IPv6 addresses
    Ipv6Hint(Vec<Ipv6Addr>),
    /// Any parameter this crate does not interpret, preserved raw
    Unknown(Vec<u8>),
}

impl SvcParamValue {
    fn read(key: u16, raw: &[u8]) -> ProtoResult<Self> {
        Ok(match key {
            KEY_ALPN => {
                let mut decoder = BinDecoder::new(raw);
                let mut ids = Vec::new();
                while !decoder.is_done() {
                    let id = decoder.read_character_data()?;
                    ids.push(String::from_utf8_lossy(id).into_owned());
                }
                Self::Alpn(ids)
            }
            KEY_PORT => {
                let mut decoder = BinDecoder::new(raw);
                Self::Port(decoder.read_u16()?)
            }
            KEY_IPV4HINT => {
                if raw.len() % 4 != 0 {
                    return Err(
                        ProtoErrorKind::Protocol("bad ipv4hint length".to_string()).into()
                    );
                }
                Self::Ipv4Hint(
                    raw.chunks_exact(4)
                        .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                        .collect(),
                )
            }
            KEY_IPV6HINT => {
                if raw.len() % 16 != 0 {
                    return Err(
                        ProtoErrorKind::Protocol("bad ipv6hint length".to_string()).into()
                    );
                }
                Self::Ipv6Hint(
                    raw.chunks_exact(16)
                        .map(|c| {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(c);
                            Ipv6Addr::from(octets)
                        })
                        .collect(),
                )
            }
            _ => Self::Unknown(raw.to_vec()),
        })
    }

    fn emit_value(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        match self {
            Self::Alpn(ids) => {
                for id in ids {
                    encoder.emit_character_data(id.as_bytes())?;
                }
            }
            Self::Port(port) => encoder.emit_u16(*port),
            Self::Ipv4Hint(addrs) => {
                for addr in addrs {
                    encoder.emit_vec(&addr.octets());
                }
            }
            Self::Ipv6Hint(addrs) => {
                for addr in addrs {
                    encoder.emit_vec(&addr.octets());
                }
            }
            Self::Unknown(raw) => encoder.emit_vec(raw),
        }
        Ok(())
    }
}

/// Service-binding record data
///
/// In ServiceMode (`svc_priority > 0`) the parameters describe an endpoint
/// for the owner; AliasMode (`svc_priority == 0`) redirects to `target_name`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SVCB {
    /// 0 = AliasMode, otherwise ServiceMode priority, lower wins
    pub svc_priority: u16,
    /// The endpoint, the root meaning the owner itself
    pub target_name: Name,
    /// Service parameters keyed by their wire code, sorted ascending
    pub svc_params: Vec<(u16, SvcParamValue)>,
}

impl SVCB {
    /// The `alpn` parameter, when present
    pub fn alpn(&self) -> Option<&[String]> {
        self.svc_params.iter().find_map(|(key, value)| match value {
            SvcParamValue::Alpn(ids) if *key == KEY_ALPN => Some(ids.as_slice()),
            _ => None,
        })
    }

    /// The `port` parameter, when present
    pub fn port(&self) -> Option<u16> {
        self.svc_params.iter().find_map(|(key, value)| match value {
            SvcParamValue::Port(port) if *key == KEY_PORT => Some(*port),
            _ => None,
        })
    }

    /// The `ipv4hint` addresses, empty when absent
    pub fn ipv4_hints(&self) -> &[Ipv4Addr] {
        self.svc_params
            .iter()
            .find_map(|(key, value)| match value {
                SvcParamValue::Ipv4Hint(addrs) if *key == KEY_IPV4HINT => Some(addrs.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// The `ipv6hint` addresses, empty when absent
    pub fn ipv6_hints(&self) -> &[Ipv6Addr] {
        self.svc_params
            .iter()
            .find_map(|(key, value)| match value {
                SvcParamValue::Ipv6Hint(addrs) if *key == KEY_IPV6HINT => Some(addrs.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let start = decoder.index();
        let svc_priority = decoder.read_u16()?;
        let target_name = Name::read(decoder)?;

        let end = start + rdlength as usize;
        let mut svc_params = Vec::new();
        let mut last_key = None;
        while decoder.index() < end {
            let key = decoder.read_u16()?;
            // keys are required to be sorted and unique on the wire
            if last_key.is_some_and(|last| key <= last) {
                return Err(ProtoErrorKind::Protocol(format!(
                    "svc param key {key} out of order"
                ))
                .into());
            }
            last_key = Some(key);
            let len = decoder.read_u16()? as usize;
            let raw = decoder.read_slice(len)?;
            svc_params.push((key, SvcParamValue::read(key, raw)?));
        }

        Ok(Self {
            svc_priority,
            target_name,
            svc_params,
        })
    }
}

impl BinEncodable for SVCB {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit_u16(self.svc_priority);
        // the target is never compressed, RFC 9460 2.2
        encoder.emit_vec(&self.target_name.to_canonical_bytes());
        for (key, value) in &self.svc_params {
            encoder.emit_u16(*key);
            let len_at = encoder.len();
            encoder.emit_u16(0);
            value.emit_value(encoder)?;
            let value_len = encoder.len() - len_at - 2;
            encoder.patch_u16(len_at, value_len as u16);
        }
        Ok(())
    }
}

impl fmt::Display for SVCB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.svc_priority, self.target_name)?;
        for (key, value) in &self.svc_params {
            match value {
                SvcParamValue::Alpn(ids) => write!(f, " alpn={}", ids.join(","))?,
                SvcParamValue::Port(port) => write!(f, " port={port}")?,
                SvcParamValue::Ipv4Hint(addrs) => {
                    let strs: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
                    write!(f, " ipv4hint={}", strs.join(","))?;
                }
                SvcParamValue::Ipv6Hint(addrs) => {
                    let strs: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
                    write!(f, " ipv6hint={}", strs.join(","))?;
                }
                SvcParamValue::Unknown(raw) => write!(f, " key{key}=<{} bytes>", raw.len())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_svcb_round_trip() {
        let svcb = SVCB {
            svc_priority: 1,
            target_name: Name::from_str("ns1.example.com.").unwrap(),
            svc_params: vec![
                (KEY_ALPN, SvcParamValue::Alpn(vec!["dot".to_string()])),
                (KEY_PORT, SvcParamValue::Port(853)),
                (
                    KEY_IPV4HINT,
                    SvcParamValue::Ipv4Hint(vec![Ipv4Addr::new(192, 0, 2, 1)]),
                ),
            ],
        };
        let bytes = svcb.to_bytes().unwrap();
        let mut decoder = BinDecoder::new(&bytes);
        let decoded = SVCB::read(&mut decoder, bytes.len() as u16).unwrap();
        assert_eq!(svcb, decoded);
        assert_eq!(decoded.alpn(), Some(&["dot".to_string()][..]));
        assert_eq!(decoded.port(), Some(853));
        assert_eq!(decoded.ipv4_hints(), &[Ipv4Addr::new(192, 0, 2, 1)]);
    }

    #[test]
    fn test_out_of_order_keys_rejected() {
        let svcb = SVCB {
            svc_priority: 1,
            target_name: Name::root(),
            svc_params: vec![
                (KEY_PORT, SvcParamValue::Port(853)),
                (KEY_ALPN, SvcParamValue::Alpn(vec!["dot".to_string()])),
            ],
        };
        let bytes = svcb.to_bytes().unwrap();
        let mut decoder = BinDecoder::new(&bytes);
        assert!(SVCB::read(&mut decoder, bytes.len() as u16).is_err());
    }
}
