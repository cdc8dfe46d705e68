// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DNSSEC record data: DS, DNSKEY, RRSIG, NSEC, NSEC3, NSEC3PARAM

use std::fmt;

use data_encoding::{BASE64, HEXUPPER};

use crate::dnssec::{Algorithm, DigestType};
use crate::error::{ProtoErrorKind, ProtoResult};
use crate::rr::{Name, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// Delegation-signer record data
///
/// ```text
/// RFC 4034                DNSSEC Resource Records               March 2005
///
/// 5.1.  DS RDATA Wire Format
///
///           1 1 1 1 1 1 1 1 1 1 2 2 2 2 2 2 2 2 2 2 3 3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Key Tag             |  Algorithm    |  Digest Type  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                                                               /
/// /                            Digest                             /
/// /                                                               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DS {
    /// Tag of the DNSKEY this DS refers to
    pub key_tag: u16,
    /// Algorithm of the referenced DNSKEY
    pub algorithm: Algorithm,
    /// Digest algorithm used to produce `digest`
    pub digest_type: DigestType,
    /// Digest over owner name and DNSKEY RDATA
    pub digest: Vec<u8>,
}

impl DS {
    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let key_tag = decoder.read_u16()?;
        let algorithm = Algorithm::from(decoder.read_u8()?);
        let digest_type = DigestType::from(decoder.read_u8()?);
        let digest_len = (rdlength as usize)
            .checked_sub(4)
            .ok_or_else(|| short_rdata("DS"))?;
        let digest = decoder.read_slice(digest_len)?.to_vec();
        Ok(Self {
            key_tag,
            algorithm,
            digest_type,
            digest,
        })
    }
}

impl BinEncodable for DS {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit_u16(self.key_tag);
        encoder.emit(self.algorithm.into());
        encoder.emit(self.digest_type.into());
        encoder.emit_vec(&self.digest);
        Ok(())
    }
}

impl fmt::Display for DS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.key_tag,
            u8::from(self.algorithm),
            u8::from(self.digest_type),
            HEXUPPER.encode(&self.digest)
        )
    }
}

/// DNS public key record data
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DNSKEY {
    /// Flags field; bit 7 is Zone Key, bit 15 is Secure Entry Point
    pub flags: u16,
    /// Always 3 for DNSSEC
    pub protocol: u8,
    /// Signing algorithm of this key
    pub algorithm: Algorithm,
    /// The public key material
    pub public_key: Vec<u8>,
}

impl DNSKEY {
    const ZONE_KEY_FLAG: u16 = 0x0100;
    const SEP_FLAG: u16 = 0x0001;
    const REVOKE_FLAG: u16 = 0x0080;

    /// True when the Zone Key flag is set; only zone keys sign RRsets
    pub fn is_zone_key(&self) -> bool {
        self.flags & Self::ZONE_KEY_FLAG != 0
    }

    /// True when the Secure Entry Point flag is set, i.e. a KSK
    pub fn is_secure_entry_point(&self) -> bool {
        self.flags & Self::SEP_FLAG != 0
    }

    /// True when the RFC 5011 REVOKE flag is set
    pub fn is_revoked(&self) -> bool {
        self.flags & Self::REVOKE_FLAG != 0
    }

    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let flags = decoder.read_u16()?;
        let protocol = decoder.read_u8()?;
        let algorithm = Algorithm::from(decoder.read_u8()?);
        let key_len = (rdlength as usize)
            .checked_sub(4)
            .ok_or_else(|| short_rdata("DNSKEY"))?;
        let public_key = decoder.read_slice(key_len)?.to_vec();
        Ok(Self {
            flags,
            protocol,
            algorithm,
            public_key,
        })
    }
}

impl BinEncodable for DNSKEY {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit_u16(self.flags);
        encoder.emit(self.protocol);
        encoder.emit(self.algorithm.into());
        encoder.emit_vec(&self.public_key);
        Ok(())
    }
}

impl fmt::Display for DNSKEY {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.flags,
            self.protocol,
            u8::from(self.algorithm),
            BASE64.encode(&self.public_key)
        )
    }
}

/// Signature record data covering one RRset
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RRSIG {
    /// The type of the covered RRset
    pub type_covered: RecordType,
    /// Algorithm of the signing key
    pub algorithm: Algorithm,
    /// Label count of the covered owner, sans root and wildcard
    pub num_labels: u8,
    /// TTL of the covered RRset at signing time
    pub original_ttl: u32,
    /// Signature not valid after, seconds since the epoch
    pub sig_expiration: u32,
    /// Signature not valid before, seconds since the epoch
    pub sig_inception: u32,
    /// Tag of the signing key
    pub key_tag: u16,
    /// Owner of the signing DNSKEY
    pub signer_name: Name,
    /// The signature bytes
    pub sig: Vec<u8>,
}

impl RRSIG {
    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let start = decoder.index();
        let type_covered = RecordType::from(decoder.read_u16()?);
        let algorithm = Algorithm::from(decoder.read_u8()?);
        let num_labels = decoder.read_u8()?;
        let original_ttl = decoder.read_u32()?;
        let sig_expiration = decoder.read_u32()?;
        let sig_inception = decoder.read_u32()?;
        let key_tag = decoder.read_u16()?;
        let signer_name = Name::read(decoder)?;
        let fixed = decoder.index() - start;
        let sig_len = (rdlength as usize)
            .checked_sub(fixed)
            .ok_or_else(|| short_rdata("RRSIG"))?;
        let sig = decoder.read_slice(sig_len)?.to_vec();
        Ok(Self {
            type_covered,
            algorithm,
            num_labels,
            original_ttl,
            sig_expiration,
            sig_inception,
            key_tag,
            signer_name,
            sig,
        })
    }

    /// Emit the RDATA sans the signature itself, the prefix of the data
    /// actually signed
    pub fn emit_presig(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit_u16(self.type_covered.into());
        encoder.emit(self.algorithm.into());
        encoder.emit(self.num_labels);
        encoder.emit_u32(self.original_ttl);
        encoder.emit_u32(self.sig_expiration);
        encoder.emit_u32(self.sig_inception);
        encoder.emit_u16(self.key_tag);
        encoder.emit_vec(&self.signer_name.to_canonical_bytes());
        Ok(())
    }
}

impl BinEncodable for RRSIG {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        self.emit_presig(encoder)?;
        encoder.emit_vec(&self.sig);
        Ok(())
    }
}

impl fmt::Display for RRSIG {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.type_covered,
            u8::from(self.algorithm),
            self.num_labels,
            self.original_ttl,
            self.sig_expiration,
            self.sig_inception,
            self.key_tag,
            self.signer_name,
            BASE64.encode(&self.sig)
        )
    }
}

/// Next-secure record data, authenticated denial for unhashed names
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NSEC {
    /// The next owner in canonical zone order
    pub next_domain_name: Name,
    /// The types present at this owner
    pub type_bit_maps: Vec<RecordType>,
}

impl NSEC {
    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let start = decoder.index();
        let next_domain_name = Name::read(decoder)?;
        let read = decoder.index() - start;
        let bitmap_len = (rdlength as usize)
            .checked_sub(read)
            .ok_or_else(|| short_rdata("NSEC"))?;
        let type_bit_maps = read_type_bit_maps(decoder, bitmap_len)?;
        Ok(Self {
            next_domain_name,
            type_bit_maps,
        })
    }

    /// True when `record_type` is present in the bitmap
    pub fn covers_type(&self, record_type: RecordType) -> bool {
        self.type_bit_maps.contains(&record_type)
    }
}

impl BinEncodable for NSEC {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        // the next name is never compressed nor lowercased, RFC 6840 5.1
        encoder.emit_vec(&name_wire_uncompressed(&self.next_domain_name));
        emit_type_bit_maps(encoder, &self.type_bit_maps);
        Ok(())
    }
}

impl fmt::Display for NSEC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.next_domain_name)?;
        for rt in &self.type_bit_maps {
            write!(f, " {rt}")?;
        }
        Ok(())
    }
}

/// Hashed next-secure record data
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NSEC3 {
    /// Hash algorithm, 1 = SHA-1
    pub hash_algorithm: u8,
    /// Flags; bit 0 is opt-out
    pub flags: u8,
    /// Extra hash iterations
    pub iterations: u16,
    /// Hash salt
    pub salt: Vec<u8>,
    /// Hashed next owner, unencoded binary
    pub next_hashed_owner: Vec<u8>,
    /// The types present at the matched owner
    pub type_bit_maps: Vec<RecordType>,
}

impl NSEC3 {
    /// Opt-out permits unsigned delegations below the covering range
    pub fn opt_out(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub(crate) fn read(decoder: &mut BinDecoder<'_>, rdlength: u16) -> ProtoResult<Self> {
        let start = decoder.index();
        let hash_algorithm = decoder.read_u8()?;
        let flags = decoder.read_u8()?;
        let iterations = decoder.read_u16()?;
        let salt = decoder.read_character_data()?.to_vec();
        let hash_len = decoder.read_u8()? as usize;
        let next_hashed_owner = decoder.read_slice(hash_len)?.to_vec();
        let read = decoder.index() - start;
        let bitmap_len = (rdlength as usize)
            .checked_sub(read)
            .ok_or_else(|| short_rdata("NSEC3"))?;
        let type_bit_maps = read_type_bit_maps(decoder, bitmap_len)?;
        Ok(Self {
            hash_algorithm,
            flags,
            iterations,
            salt,
            next_hashed_owner,
            type_bit_maps,
        })
    }

    /// True when `record_type` is present in the bitmap
    pub fn covers_type(&self, record_type: RecordType) -> bool {
        self.type_bit_maps.contains(&record_type)
    }
}

impl BinEncodable for NSEC3 {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit(self.hash_algorithm);
        encoder.emit(self.flags);
        encoder.emit_u16(self.iterations);
        encoder.emit_character_data(&self.salt)?;
        encoder.emit(self.next_hashed_owner.len() as u8);
        encoder.emit_vec(&self.next_hashed_owner);
        emit_type_bit_maps(encoder, &self.type_bit_maps);
        Ok(())
    }
}

impl fmt::Display for NSEC3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.hash_algorithm,
            self.flags,
            self.iterations,
            if self.salt.is_empty() {
                "-".to_string()
            } else {
                HEXUPPER.encode(&self.salt)
            },
        )?;
        for rt in &self.type_bit_maps {
            write!(f, " {rt}")?;
        }
        Ok(())
    }
}

/// NSEC3 parameters record data
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NSEC3PARAM {
    /// Hash algorithm, 1 = SHA-1
    pub hash_algorithm: u8,
    /// Flags, zero on the PARAM record
    pub flags: u8,
    /// Extra hash iterations
    pub iterations: u16,
    /// Hash salt
    pub salt: Vec<u8>,
}

impl NSEC3PARAM {
    pub(crate) fn read(decoder: &mut BinDecoder<'_>) -> ProtoResult<Self> {
        let hash_algorithm = decoder.read_u8()?;
        let flags = decoder.read_u8()?;
        let iterations = decoder.read_u16()?;
        let salt = decoder.read_character_data()?.to_vec();
        Ok(Self {
            hash_algorithm,
            flags,
            iterations,
            salt,
        })
    }
}

impl BinEncodable for NSEC3PARAM {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        encoder.emit(self.hash_algorithm);
        encoder.emit(self.flags);
        encoder.emit_u16(self.iterations);
        encoder.emit_character_data(&self.salt)?;
        Ok(())
    }
}

impl fmt::Display for NSEC3PARAM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.hash_algorithm,
            self.flags,
            self.iterations,
            HEXUPPER.encode(&self.salt)
        )
    }
}

fn short_rdata(rtype: &str) -> crate::error::ProtoError {
    ProtoErrorKind::Protocol(format!("{rtype} rdata too short")).into()
}

fn name_wire_uncompressed(name: &Name) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(name.encoded_len());
    for label in name.iter() {
        bytes.push(label.len() as u8);
        bytes.extend_from_slice(label);
    }
    bytes.push(0);
    bytes
}

/// Read an RFC 4034 windowed type bitmap spanning exactly `len` bytes
fn read_type_bit_maps(decoder: &mut BinDecoder<'_>, len: usize) -> ProtoResult<Vec<RecordType>> {
    let end = decoder.index() + len;
    let mut types = Vec::new();
    while decoder.index() < end {
        let window = decoder.read_u8()? as u16;
        let bitmap_len = decoder.read_u8()? as usize;
        if bitmap_len == 0 || bitmap_len > 32 {
            return Err(ProtoErrorKind::Protocol(format!(
                "bad type bitmap length: {bitmap_len}"
            ))
            .into());
        }
        let bitmap = decoder.read_slice(bitmap_len)?;
        for (i, &byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (0x80 >> bit) != 0 {
                    let code = window * 256 + (i as u16) * 8 + bit as u16;
                    types.push(RecordType::from(code));
                }
            }
        }
    }
    Ok(types)
}

fn emit_type_bit_maps(encoder: &mut BinEncoder, types: &[RecordType]) {
    let mut codes: Vec<u16> = types.iter().map(|&rt| u16::from(rt)).collect();
    codes.sort_unstable();
    codes.dedup();

    let mut window_bits: Vec<(u8, [u8; 32], usize)> = Vec::new();
    for code in codes {
        let window = (code >> 8) as u8;
        let low = (code & 0xFF) as usize;
        if window_bits.last().map(|w| w.0) != Some(window) {
            window_bits.push((window, [0u8; 32], 0));
        }
        let entry = window_bits.last_mut().expect("window pushed above");
        entry.1[low / 8] |= 0x80 >> (low % 8);
        entry.2 = entry.2.max(low / 8 + 1);
    }

    for (window, bitmap, used) in window_bits {
        encoder.emit(window);
        encoder.emit(used as u8);
        encoder.emit_vec(&bitmap[..used]);
    }
}
