// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Configuration for the recursor

use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use data_encoding::BASE64;
use serde::Deserialize;
use tracing::info;

use ironwood_proto::dnssec::Algorithm;
use ironwood_proto::rr::rdata::{RData, A, AAAA, DNSKEY, NS};
use ironwood_proto::rr::{Name, Record};
use ironwood_proto::xfer::Transport;

use crate::cache::nameserver::BackoffPolicy;
use crate::error::{Error, ErrorKind, Result};

/// Configuration recognised by the recursor core
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RecursorConfig {
    /// File with root NS and glue RRsets, aka hints
    pub root_hints: Option<PathBuf>,

    /// Configured DNSKEY RRs, presentation format, trusted a priori
    #[serde(default)]
    pub trust_anchors: Vec<String>,

    /// Timeout of a single wire exchange, seconds
    #[serde(default = "query_timeout_default")]
    pub query_timeout: u64,

    /// Timeout of a full recursion, seconds
    #[serde(default = "request_timeout_default")]
    pub request_timeout: u64,

    /// Accepted skew on signature windows, seconds
    #[serde(default = "clock_skew_default")]
    pub clock_skew: u32,

    /// Failure backoff schedule for server addresses
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Transport enablement; Do53 is always on
    #[serde(default)]
    pub transports: TransportsConfig,

    /// Advertised EDNS payload size
    #[serde(default = "udp_buffer_size_default")]
    pub udp_buffer_size: u16,

    /// Longest a Bogus entry may linger in the cache, seconds
    #[serde(default = "bogus_ttl_cap_default")]
    pub bogus_ttl_cap: u32,

    /// Longest any entry may linger in the cache, seconds
    #[serde(default = "max_ttl_default")]
    pub max_ttl: u32,

    /// Longest accepted CNAME chain
    #[serde(default = "max_cname_chain_default")]
    pub max_cname_chain: u8,

    /// Deepest accepted referral chain
    #[serde(default = "max_depth_default")]
    pub max_depth: u8,
}

impl Default for RecursorConfig {
    fn default() -> Self {
        Self {
            root_hints: None,
            trust_anchors: Vec::new(),
            query_timeout: query_timeout_default(),
            request_timeout: request_timeout_default(),
            clock_skew: clock_skew_default(),
            backoff: BackoffConfig::default(),
            transports: TransportsConfig::default(),
            udp_buffer_size: udp_buffer_size_default(),
            bogus_ttl_cap: bogus_ttl_cap_default(),
            max_ttl: max_ttl_default(),
            max_cname_chain: max_cname_chain_default(),
            max_depth: max_depth_default(),
        }
    }
}

/// Failure backoff schedule
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// First retry delay, seconds
    #[serde(default = "backoff_base_default")]
    pub base: u64,

    /// Upper bound of the schedule, seconds
    #[serde(default = "backoff_cap_default")]
    pub cap: u64,

    /// Jitter band around each delay, percent
    #[serde(default = "backoff_jitter_default", alias = "jitter-pct")]
    pub jitter_pct: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: backoff_base_default(),
            cap: backoff_cap_default(),
            jitter_pct: backoff_jitter_default(),
        }
    }
}

impl From<BackoffConfig> for BackoffPolicy {
    fn from(config: BackoffConfig) -> Self {
        Self {
            base: Duration::from_secs(config.base),
            cap: Duration::from_secs(config.cap),
            jitter_pct: config.jitter_pct,
        }
    }
}

/// Which transports may be selected
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TransportsConfig {
    /// Subset of `do53, dot, doh, doq`; empty means all
    #[serde(default)]
    pub enable: Vec<String>,
}

impl TransportsConfig {
    /// The enabled transport set; Do53 can not be turned off
    pub fn enabled(&self) -> Result<HashSet<Transport>> {
        if self.enable.is_empty() {
            return Ok(Transport::all().into_iter().collect());
        }
        let mut enabled = HashSet::new();
        enabled.insert(Transport::Do53);
        for token in &self.enable {
            let transport = match token.as_str() {
                "do53" => Transport::Do53,
                "dot" => Transport::Dot,
                "doh" => Transport::Doh,
                "doq" => Transport::Doq,
                other => {
                    return Err(
                        ErrorKind::Config(format!("unknown transport: {other}")).into()
                    );
                }
            };
            enabled.insert(transport);
        }
        Ok(enabled)
    }
}

fn query_timeout_default() -> u64 {
    3
}

fn request_timeout_default() -> u64 {
    10
}

fn clock_skew_default() -> u32 {
    300
}

fn udp_buffer_size_default() -> u16 {
    4096
}

fn bogus_ttl_cap_default() -> u32 {
    60
}

fn max_ttl_default() -> u32 {
    86400
}

fn max_cname_chain_default() -> u8 {
    8
}

fn max_depth_default() -> u8 {
    30
}

fn backoff_base_default() -> u64 {
    1
}

fn backoff_cap_default() -> u64 {
    15 * 60
}

fn backoff_jitter_default() -> u8 {
    25
}

impl RecursorConfig {
    /// Timeout of one wire exchange
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Timeout of one full recursion
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Read and parse the hints file
    pub fn read_roots(&self, root_dir: Option<&Path>) -> Result<RootHints> {
        let Some(path) = &self.root_hints else {
            return Err(ErrorKind::Config("no root hints configured".to_string()).into());
        };
        let path = match root_dir {
            Some(dir) => dir.join(path),
            None => path.clone(),
        };
        info!("loading root hints: {}", path.display());
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::from(ErrorKind::Config(format!(
                "failed to read roots {}: {e}",
                path.display()
            )))
        })?;
        parse_root_hints(&text)
    }

    /// Parse the configured trust anchors
    pub fn parse_trust_anchors(&self) -> Result<Vec<(Name, u32, DNSKEY)>> {
        self.trust_anchors
            .iter()
            .map(|line| parse_dnskey_rr(line))
            .collect()
    }
}

/// The parsed hints file: the root NS names and their glue
#[derive(Clone, Debug, Default)]
pub struct RootHints {
    /// NS records at the root
    pub ns_records: Vec<Record>,
    /// A and AAAA glue for the root servers
    pub addr_records: Vec<Record>,
}

impl RootHints {
    /// All glue addresses of `server`
    pub fn addrs_of(&self, server: &Name) -> Vec<IpAddr> {
        self.addr_records
            .iter()
            .filter(|r| r.name() == server)
            .filter_map(|r| r.data().ip_addr())
            .collect()
    }
}

/// Parse a hints file: `owner ttl [class] type rdata` lines, `;` comments
pub fn parse_root_hints(text: &str) -> Result<RootHints> {
    let mut hints = RootHints::default();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.split(';').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let record = parse_rr_line(line).map_err(|e| {
            Error::from(ErrorKind::Config(format!(
                "bad hints line {}: {e}",
                lineno + 1
            )))
        })?;

        match record.data() {
            RData::NS(_) if record.name().is_root() => hints.ns_records.push(record),
            RData::A(_) | RData::AAAA(_) => hints.addr_records.push(record),
            _ => {
                return Err(ErrorKind::Config(format!(
                    "unexpected record in hints line {}",
                    lineno + 1
                ))
                .into());
            }
        }
    }

    if hints.ns_records.is_empty() {
        return Err(ErrorKind::Config("hints contain no root NS records".to_string()).into());
    }
    Ok(hints)
}

/// Parse one presentation-format resource record, NS/A/AAAA/DNSKEY only
fn parse_rr_line(line: &str) -> Result<Record> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let type_at = tokens
        .iter()
        .position(|t| matches!(*t, "NS" | "A" | "AAAA" | "DNSKEY"))
        .ok_or_else(|| Error::from(ErrorKind::Config(format!("no record type in: {line}"))))?;
    if type_at == 0 || type_at + 1 >= tokens.len() {
        return Err(ErrorKind::Config(format!("malformed record: {line}")).into());
    }

    let owner = Name::from_str(tokens[0])
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad owner: {e}"))))?;
    let ttl = tokens
        .get(1)
        .and_then(|t| t.parse::<u32>().ok())
        .unwrap_or(3600 * 24 * 2);
    let rdata_tokens = &tokens[type_at + 1..];

    let rdata = match tokens[type_at] {
        "NS" => RData::NS(NS(Name::from_str(rdata_tokens[0]).map_err(|e| {
            Error::from(ErrorKind::Config(format!("bad NS target: {e}")))
        })?)),
        "A" => RData::A(A(rdata_tokens[0]
            .parse()
            .map_err(|e| Error::from(ErrorKind::Config(format!("bad A address: {e}"))))?)),
        "AAAA" => RData::AAAA(AAAA(rdata_tokens[0].parse().map_err(|e| {
            Error::from(ErrorKind::Config(format!("bad AAAA address: {e}")))
        })?)),
        "DNSKEY" => {
            let (_, _, dnskey) = parse_dnskey_tokens(&owner, ttl, rdata_tokens)?;
            RData::DNSKEY(dnskey)
        }
        _ => unreachable!("filtered above"),
    };

    Ok(Record::from_rdata(owner, ttl, rdata))
}

/// Parse a DNSKEY resource record in presentation format:
/// `owner [ttl] [class] DNSKEY flags protocol algorithm base64...`
pub fn parse_dnskey_rr(line: &str) -> Result<(Name, u32, DNSKEY)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let type_at = tokens
        .iter()
        .position(|t| *t == "DNSKEY")
        .ok_or_else(|| Error::from(ErrorKind::Config(format!("not a DNSKEY RR: {line}"))))?;
    if type_at == 0 {
        return Err(ErrorKind::Config(format!("missing owner: {line}")).into());
    }

    let owner = Name::from_str(tokens[0])
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad owner: {e}"))))?;
    let ttl = tokens
        .get(1)
        .and_then(|t| t.parse::<u32>().ok())
        .unwrap_or(3600 * 24 * 2);

    parse_dnskey_tokens(&owner, ttl, &tokens[type_at + 1..])
}

fn parse_dnskey_tokens(
    owner: &Name,
    ttl: u32,
    tokens: &[&str],
) -> Result<(Name, u32, DNSKEY)> {
    if tokens.len() < 4 {
        return Err(ErrorKind::Config("truncated DNSKEY rdata".to_string()).into());
    }
    let flags: u16 = tokens[0]
        .parse()
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad DNSKEY flags: {e}"))))?;
    let protocol: u8 = tokens[1]
        .parse()
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad DNSKEY protocol: {e}"))))?;
    let algorithm: u8 = tokens[2]
        .parse()
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad DNSKEY algorithm: {e}"))))?;
    let b64: String = tokens[3..].concat();
    let public_key = BASE64
        .decode(b64.as_bytes())
        .map_err(|e| Error::from(ErrorKind::Config(format!("bad DNSKEY key data: {e}"))))?;

    Ok((
        owner.clone(),
        ttl,
        DNSKEY {
            flags,
            protocol,
            algorithm: Algorithm::from(algorithm),
            public_key,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecursorConfig::default();
        assert_eq!(config.query_timeout(), Duration::from_secs(3));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.clock_skew, 300);
        assert_eq!(config.udp_buffer_size, 4096);
        assert_eq!(config.bogus_ttl_cap, 60);
        assert_eq!(config.max_cname_chain, 8);
        assert_eq!(config.max_depth, 30);
        assert_eq!(config.backoff.base, 1);
        assert_eq!(config.backoff.cap, 900);
        assert_eq!(config.backoff.jitter_pct, 25);
    }

    #[test]
    fn test_can_parse_config() {
        let input = r#"root_hints = "/etc/root.hints"
trust_anchors = [". 172800 IN DNSKEY 257 3 8 AwEAAa=="]
query_timeout = 2

[backoff]
base = 2
cap = 600

[transports]
enable = ["dot", "doq"]
"#;
        let config: RecursorConfig = toml::from_str(input).unwrap();
        assert_eq!(
            config.root_hints.as_deref(),
            Some(Path::new("/etc/root.hints"))
        );
        assert_eq!(config.query_timeout, 2);
        assert_eq!(config.backoff.base, 2);

        let enabled = config.transports.enabled().unwrap();
        assert!(enabled.contains(&Transport::Do53));
        assert!(enabled.contains(&Transport::Dot));
        assert!(enabled.contains(&Transport::Doq));
        assert!(!enabled.contains(&Transport::Doh));
    }

    #[test]
    fn test_unknown_transport_is_config_error() {
        let transports = TransportsConfig {
            enable: vec!["smtp".to_string()],
        };
        assert!(transports.enabled().is_err());
    }

    #[test]
    fn test_parse_root_hints() {
        let text = r#"
; root hints excerpt
.                        3600000      NS    a.root-servers.net.
.                        3600000      NS    b.root-servers.net.
a.root-servers.net.      3600000      A     198.41.0.4
a.root-servers.net.      3600000      AAAA  2001:503:ba3e::2:30
b.root-servers.net.      3600000      A     170.247.170.2
"#;
        let hints = parse_root_hints(text).unwrap();
        assert_eq!(hints.ns_records.len(), 2);
        assert_eq!(hints.addr_records.len(), 3);

        let a_root = Name::from_str("a.root-servers.net.").unwrap();
        assert_eq!(hints.addrs_of(&a_root).len(), 2);
    }

    #[test]
    fn test_hints_without_ns_rejected() {
        let text = "a.root-servers.net. 3600000 A 198.41.0.4\n";
        assert!(parse_root_hints(text).is_err());
    }

    #[test]
    fn test_parse_trust_anchor_line() {
        // the well-known root KSK 20326 format
        let line = ". 172800 IN DNSKEY 257 3 8 AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3+/4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kvArMtNROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF0jLHwVN8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+eoZG+SrDK6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfdRUfhHdY6+cn8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwNR1AkUTV74bU=";
        let (owner, ttl, dnskey) = parse_dnskey_rr(line).unwrap();
        assert!(owner.is_root());
        assert_eq!(ttl, 172800);
        assert_eq!(dnskey.flags, 257);
        assert!(dnskey.is_secure_entry_point());
        assert_eq!(dnskey.algorithm, Algorithm::RSASHA256);
        assert!(!dnskey.public_key.is_empty());
    }
}
