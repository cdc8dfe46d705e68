// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNSSEC primitives: algorithms, key tags, digests and signature
//! verification over canonical RRset form

use std::fmt;

use ring::digest;
use ring::signature::{
    ECDSA_P256_SHA256_FIXED, ECDSA_P384_SHA384_FIXED, ED25519, RSA_PKCS1_2048_8192_SHA256,
    RSA_PKCS1_2048_8192_SHA512, RsaPublicKeyComponents, UnparsedPublicKey,
};

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::rr::rdata::{DNSKEY, RRSIG};
use crate::rr::{Name, Record};
use crate::serialize::binary::{BinEncodable, BinEncoder, EncodeMode};

/// The DNSSEC verdict attached to an RRset, a zone or a response.
///
/// The strength order used when deciding whether a cached entry may be
/// overwritten is `Secure > Insecure ≈ Indeterminate > Bogus`.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ValidationState {
    /// No verdict could be reached, typically for lack of a key
    #[default]
    Indeterminate,
    /// Provably outside any signed subtree
    Insecure,
    /// A chain of validated keys reaches a trust anchor
    Secure,
    /// Evidence is contradicted; the data must not be used
    Bogus,
}

impl ValidationState {
    /// Rank used for cache-overwrite decisions
    pub fn strength(self) -> u8 {
        match self {
            Self::Secure => 3,
            Self::Insecure | Self::Indeterminate => 2,
            Self::Bogus => 1,
        }
    }

    /// True when the verdict allows handing the data to a client
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::Bogus)
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indeterminate => write!(f, "Indeterminate"),
            Self::Insecure => write!(f, "Insecure"),
            Self::Secure => write!(f, "Secure"),
            Self::Bogus => write!(f, "Bogus"),
        }
    }
}

/// DNSSEC signing algorithms, RFC 4034 and successors
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Algorithm {
    /// RSA with SHA-256, RFC 5702
    RSASHA256,
    /// RSA with SHA-512, RFC 5702
    RSASHA512,
    /// ECDSA on P-256 with SHA-256, RFC 6605
    ECDSAP256SHA256,
    /// ECDSA on P-384 with SHA-384, RFC 6605
    ECDSAP384SHA384,
    /// Ed25519, RFC 8080
    ED25519,
    /// An algorithm this crate cannot verify
    Unknown(u8),
}

impl Algorithm {
    /// True when the crate can cryptographically verify this algorithm
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<u8> for Algorithm {
    fn from(value: u8) -> Self {
        match value {
            8 => Self::RSASHA256,
            10 => Self::RSASHA512,
            13 => Self::ECDSAP256SHA256,
            14 => Self::ECDSAP384SHA384,
            15 => Self::ED25519,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Algorithm> for u8 {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::RSASHA256 => 8,
            Algorithm::RSASHA512 => 10,
            Algorithm::ECDSAP256SHA256 => 13,
            Algorithm::ECDSAP384SHA384 => 14,
            Algorithm::ED25519 => 15,
            Algorithm::Unknown(value) => value,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RSASHA256 => write!(f, "RSASHA256"),
            Self::RSASHA512 => write!(f, "RSASHA512"),
            Self::ECDSAP256SHA256 => write!(f, "ECDSAP256SHA256"),
            Self::ECDSAP384SHA384 => write!(f, "ECDSAP384SHA384"),
            Self::ED25519 => write!(f, "ED25519"),
            Self::Unknown(value) => write!(f, "ALG{value}"),
        }
    }
}

/// Digest algorithms used in DS records
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DigestType {
    /// SHA-1, RFC 3658; obsolete but still seen in the wild
    SHA1,
    /// SHA-256, RFC 4509
    SHA256,
    /// SHA-384, RFC 6605
    SHA384,
    /// A digest this crate cannot compute
    Unknown(u8),
}

impl From<u8> for DigestType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::SHA1,
            2 => Self::SHA256,
            4 => Self::SHA384,
            _ => Self::Unknown(value),
        }
    }
}

impl From<DigestType> for u8 {
    fn from(digest_type: DigestType) -> Self {
        match digest_type {
            DigestType::SHA1 => 1,
            DigestType::SHA256 => 2,
            DigestType::SHA384 => 4,
            DigestType::Unknown(value) => value,
        }
    }
}

/// Compute the key tag of a DNSKEY, RFC 4034 Appendix B
pub fn key_tag(dnskey: &DNSKEY) -> ProtoResult<u16> {
    let rdata = dnskey.to_bytes()?;
    let mut accumulator: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            accumulator += u32::from(byte) << 8;
        } else {
            accumulator += u32::from(byte);
        }
    }
    accumulator += (accumulator >> 16) & 0xFFFF;
    Ok((accumulator & 0xFFFF) as u16)
}

/// Digest a DNSKEY the way a DS record does: digest(owner | rdata)
pub fn ds_digest(owner: &Name, dnskey: &DNSKEY, digest_type: DigestType) -> ProtoResult<Vec<u8>> {
    let algorithm = match digest_type {
        DigestType::SHA1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
        DigestType::SHA256 => &digest::SHA256,
        DigestType::SHA384 => &digest::SHA384,
        DigestType::Unknown(value) => {
            return Err(ProtoErrorKind::Unsupported(format!("digest type {value}")).into());
        }
    };

    let mut data = owner.to_canonical_bytes();
    data.extend(dnskey.to_bytes()?);
    Ok(digest::digest(algorithm, &data).as_ref().to_vec())
}

/// The NSEC3 hash of a name: iterated SHA-1 over canonical form and salt,
/// RFC 5155 section 5
pub fn nsec3_hash(name: &Name, salt: &[u8], iterations: u16) -> Vec<u8> {
    let mut data = name.to_canonical_bytes();
    data.extend_from_slice(salt);
    let mut hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &data)
        .as_ref()
        .to_vec();
    for _ in 0..iterations {
        let mut next = hash;
        next.extend_from_slice(salt);
        hash = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &next)
            .as_ref()
            .to_vec();
    }
    hash
}

/// Build the exact byte stream an RRSIG signature covers:
/// `RRSIG_RDATA (sans signature) | RR(1) | RR(2)...` with each record in
/// canonical form, owner adjusted for wildcard expansion, TTL forced to the
/// signature's original TTL, and records sorted by canonical RDATA
pub fn rrsig_sign_data(records: &[Record], rrsig: &RRSIG) -> ProtoResult<Vec<u8>> {
    let mut encoder = BinEncoder::with_mode(EncodeMode::Canonical);
    rrsig.emit_presig(&mut encoder)?;

    let mut rdatas: Vec<Vec<u8>> = Vec::with_capacity(records.len());
    for record in records {
        let mut rdata_encoder = BinEncoder::with_mode(EncodeMode::Canonical);
        record.data().emit(&mut rdata_encoder)?;
        rdatas.push(rdata_encoder.into_bytes());
    }
    rdatas.sort();
    rdatas.dedup();

    let owner = records
        .first()
        .map(|r| r.name().clone())
        .ok_or_else(|| crate::error::ProtoError::from("empty rrset"))?;
    let signing_owner = wildcard_owner(&owner, rrsig.num_labels);

    let dns_class = records
        .first()
        .map(|r| r.dns_class())
        .unwrap_or_default();

    for rdata in rdatas {
        encoder.emit_vec(&signing_owner.to_canonical_bytes());
        encoder.emit_u16(rrsig.type_covered.into());
        encoder.emit_u16(dns_class.into());
        encoder.emit_u32(rrsig.original_ttl);
        encoder.emit_u16(rdata.len() as u16);
        encoder.emit_vec(&rdata);
    }

    Ok(encoder.into_bytes())
}

/// RFC 4035 5.3.2: when the RRSIG label count is lower than the owner's,
/// the signature covers the wildcard-expanded form `*.<suffix>`
fn wildcard_owner(owner: &Name, num_labels: u8) -> Name {
    let owner_labels = owner.num_labels();
    if num_labels >= owner_labels {
        return owner.clone();
    }
    let mut suffix = owner.clone();
    for _ in 0..owner_labels - num_labels {
        suffix = suffix.base_name();
    }
    suffix
        .prepend_label(b"*")
        .unwrap_or_else(|_| owner.clone())
}

/// Verify `sig` over `sign_data` with the given key; a `Ok(())` means the
/// cryptography checked out, nothing more
pub fn verify_signature(dnskey: &DNSKEY, sign_data: &[u8], sig: &[u8]) -> ProtoResult<()> {
    let bad_sig =
        |_| crate::error::ProtoError::from(ProtoErrorKind::Msg("signature mismatch".to_string()));

    match dnskey.algorithm {
        Algorithm::RSASHA256 | Algorithm::RSASHA512 => {
            let (e, n) = rsa_exponent_modulus(&dnskey.public_key)?;
            let params = match dnskey.algorithm {
                Algorithm::RSASHA256 => &RSA_PKCS1_2048_8192_SHA256,
                _ => &RSA_PKCS1_2048_8192_SHA512,
            };
            RsaPublicKeyComponents { n, e }
                .verify(params, sign_data, sig)
                .map_err(bad_sig)
        }
        Algorithm::ECDSAP256SHA256 | Algorithm::ECDSAP384SHA384 => {
            // the DNSKEY holds the raw point; ring wants the uncompressed form
            let mut point = Vec::with_capacity(dnskey.public_key.len() + 1);
            point.push(0x04);
            point.extend_from_slice(&dnskey.public_key);
            let params = match dnskey.algorithm {
                Algorithm::ECDSAP256SHA256 => &ECDSA_P256_SHA256_FIXED,
                _ => &ECDSA_P384_SHA384_FIXED,
            };
            UnparsedPublicKey::new(params, &point)
                .verify(sign_data, sig)
                .map_err(bad_sig)
        }
        Algorithm::ED25519 => UnparsedPublicKey::new(&ED25519, &dnskey.public_key)
            .verify(sign_data, sig)
            .map_err(bad_sig),
        Algorithm::Unknown(value) => {
            Err(ProtoErrorKind::Unsupported(format!("algorithm {value}")).into())
        }
    }
}

/// Split an RFC 3110 RSA public key into exponent and modulus
fn rsa_exponent_modulus(public_key: &[u8]) -> ProtoResult<(&[u8], &[u8])> {
    let first = *public_key
        .first()
        .ok_or_else(|| crate::error::ProtoError::from("empty RSA key"))?;
    if first != 0 {
        let e_len = first as usize;
        public_key
            .get(1..1 + e_len)
            .zip(public_key.get(1 + e_len..))
            .ok_or_else(|| crate::error::ProtoError::from("truncated RSA key"))
    } else {
        if public_key.len() < 3 {
            return Err("truncated RSA key".into());
        }
        let e_len = u16::from_be_bytes([public_key[1], public_key[2]]) as usize;
        public_key
            .get(3..3 + e_len)
            .zip(public_key.get(3 + e_len..))
            .ok_or_else(|| crate::error::ProtoError::from("truncated RSA key"))
    }
}
