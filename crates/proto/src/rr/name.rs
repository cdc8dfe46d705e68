// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Domain name associated types, i.e. `Name`

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{ProtoErrorKind, ProtoResult};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder, EncodeMode};

const MAX_LABEL_BYTES: usize = 63;
const MAX_NAME_BYTES: usize = 255;

/// A domain name: a sequence of labels, comparison is case-insensitive
#[derive(Clone, Debug, Default, Eq)]
pub struct Name {
    labels: Vec<Box<[u8]>>,
    is_fqdn: bool,
}

impl Name {
    /// Create a new empty (root, when fqdn) name
    pub fn new() -> Self {
        Self::default()
    }

    /// The root label, i.e. `.`
    pub fn root() -> Self {
        Self {
            labels: Vec::new(),
            is_fqdn: true,
        }
    }

    /// True when this is the root label
    pub fn is_root(&self) -> bool {
        self.labels.is_empty() && self.is_fqdn
    }

    /// True when the name ends with the root label
    pub fn is_fqdn(&self) -> bool {
        self.is_fqdn
    }

    /// Mark the name fully qualified
    pub fn set_fqdn(&mut self, val: bool) -> &mut Self {
        self.is_fqdn = val;
        self
    }

    /// Number of labels, excluding the root
    pub fn num_labels(&self) -> u8 {
        self.labels.len() as u8
    }

    /// Iterate the labels, leftmost (deepest) first
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.labels.iter().map(|l| l.as_ref())
    }

    /// Construct from raw label byte strings, root-terminated
    pub fn from_labels<I, L>(labels: I) -> ProtoResult<Self>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut name = Self::root();
        for label in labels {
            name = name.append_label(label.as_ref())?;
        }
        Ok(name)
    }

    /// Append one label at the end (closest to the root)
    pub fn append_label(mut self, label: &[u8]) -> ProtoResult<Self> {
        if label.len() > MAX_LABEL_BYTES {
            return Err(ProtoErrorKind::LabelBytesTooLong(label.len()).into());
        }
        self.labels.push(label.into());
        if self.encoded_len() > MAX_NAME_BYTES {
            return Err(ProtoErrorKind::DomainNameTooLong(self.encoded_len()).into());
        }
        Ok(self)
    }

    /// Prepend one label at the front (deepest position), e.g. building
    /// `prefix._dsync.parent` out of `parent`
    pub fn prepend_label(&self, label: &[u8]) -> ProtoResult<Self> {
        if label.len() > MAX_LABEL_BYTES {
            return Err(ProtoErrorKind::LabelBytesTooLong(label.len()).into());
        }
        let mut labels: Vec<Box<[u8]>> = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label.into());
        labels.extend(self.labels.iter().cloned());
        let name = Self {
            labels,
            is_fqdn: self.is_fqdn,
        };
        if name.encoded_len() > MAX_NAME_BYTES {
            return Err(ProtoErrorKind::DomainNameTooLong(name.encoded_len()).into());
        }
        Ok(name)
    }

    /// Append an entire name, used to re-qualify a relative name
    pub fn append_name(mut self, other: &Self) -> ProtoResult<Self> {
        for label in &other.labels {
            self.labels.push(label.clone());
        }
        self.is_fqdn = other.is_fqdn;
        if self.encoded_len() > MAX_NAME_BYTES {
            return Err(ProtoErrorKind::DomainNameTooLong(self.encoded_len()).into());
        }
        Ok(self)
    }

    /// Drop the leftmost label; the root's base name is the root
    pub fn base_name(&self) -> Self {
        if self.labels.is_empty() {
            return self.clone();
        }
        Self {
            labels: self.labels[1..].to_vec(),
            is_fqdn: self.is_fqdn,
        }
    }

    /// The leftmost label, `None` for the root
    pub fn first_label(&self) -> Option<&[u8]> {
        self.labels.first().map(|l| l.as_ref())
    }

    /// True when `self` is a zone containing `name` (or equal to it)
    pub fn zone_of(&self, name: &Self) -> bool {
        if self.labels.len() > name.labels.len() {
            return false;
        }
        let skip = name.labels.len() - self.labels.len();
        self.labels
            .iter()
            .zip(name.labels.iter().skip(skip))
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Lowercased copy: the normalised form used for cache keys. Idempotent.
    pub fn to_lowercase(&self) -> Self {
        Self {
            labels: self
                .labels
                .iter()
                .map(|l| {
                    l.iter()
                        .map(u8::to_ascii_lowercase)
                        .collect::<Vec<u8>>()
                        .into_boxed_slice()
                })
                .collect(),
            is_fqdn: self.is_fqdn,
        }
    }

    /// Length of the name on the wire, uncompressed
    pub fn encoded_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// The uncompressed, lowercased wire form, used for canonical ordering,
    /// digesting and signing
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        for label in &self.labels {
            bytes.push(label.len() as u8);
            bytes.extend(label.iter().map(u8::to_ascii_lowercase));
        }
        bytes.push(0);
        bytes
    }

    /// Compare in RFC 4034 canonical order: right-to-left by label,
    /// case-insensitive, shorter name first on shared suffix
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let mut left = self.labels.iter().rev();
        let mut right = other.labels.iter().rev();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(l), Some(r)) => {
                    let l = l.iter().map(u8::to_ascii_lowercase);
                    let r = r.iter().map(u8::to_ascii_lowercase);
                    match l.cmp(r) {
                        Ordering::Equal => continue,
                        not_eq => return not_eq,
                    }
                }
            }
        }
    }

    /// Emit for RDATA-embedded names: compressible in normal mode, the
    /// lowercased uncompressed form when digesting or signing
    pub fn emit_canonical_lowercased(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        match encoder.mode() {
            EncodeMode::Canonical => {
                encoder.emit_vec(&self.to_canonical_bytes());
                Ok(())
            }
            EncodeMode::Normal => BinEncodable::emit(self, encoder),
        }
    }

    fn write_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return write!(f, ".");
        }
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            for &b in label.iter() {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x20..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{b:03}")?,
                }
            }
        }
        if self.is_fqdn {
            write!(f, ".")?;
        }
        Ok(())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_labels(f)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.is_fqdn == other.is_fqdn
            && self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_fqdn.hash(state);
        for label in &self.labels {
            state.write_usize(label.len());
            for b in label.iter() {
                state.write_u8(b.to_ascii_lowercase());
            }
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_canonical(other)
    }
}

impl FromStr for Name {
    type Err = crate::error::ProtoError;

    /// Parse presentation format; `\.` and `\DDD` escapes are honoured
    fn from_str(s: &str) -> ProtoResult<Self> {
        if s == "." || s.is_empty() {
            return Ok(Self::root());
        }

        let mut name = Self::root();
        let mut label: Vec<u8> = Vec::new();
        let mut chars = s.bytes().peekable();
        let mut saw_trailing_dot = false;

        while let Some(b) = chars.next() {
            saw_trailing_dot = false;
            match b {
                b'.' => {
                    if label.is_empty() {
                        return Err(ProtoErrorKind::Unsupported(format!(
                            "empty label in name: {s}"
                        ))
                        .into());
                    }
                    name = name.append_label(&label)?;
                    label.clear();
                    saw_trailing_dot = true;
                }
                b'\\' => match chars.next() {
                    Some(d @ b'0'..=b'9') => {
                        let mut value = (d - b'0') as u32;
                        for _ in 0..2 {
                            match chars.next() {
                                Some(d @ b'0'..=b'9') => {
                                    value = value * 10 + (d - b'0') as u32;
                                }
                                _ => {
                                    return Err(ProtoErrorKind::Unsupported(format!(
                                        "bad decimal escape in name: {s}"
                                    ))
                                    .into());
                                }
                            }
                        }
                        if value > 255 {
                            return Err(ProtoErrorKind::Unsupported(format!(
                                "escape out of range in name: {s}"
                            ))
                            .into());
                        }
                        label.push(value as u8);
                    }
                    Some(c) => label.push(c),
                    None => {
                        return Err(ProtoErrorKind::Unsupported(format!(
                            "trailing escape in name: {s}"
                        ))
                        .into());
                    }
                },
                _ => label.push(b),
            }
        }

        if !label.is_empty() {
            name = name.append_label(&label)?;
        }
        name.is_fqdn = saw_trailing_dot;
        Ok(name)
    }
}

impl BinEncodable for Name {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        // compression: at each suffix, either point at a prior occurrence or
        // emit the label and remember this suffix's offset
        for start in 0..self.labels.len() {
            let suffix = Self {
                labels: self.labels[start..].to_vec(),
                is_fqdn: true,
            };
            let wire = suffix.to_canonical_bytes();
            if let Some(offset) = encoder.compressed_offset(&wire) {
                encoder.emit_u16(0xC000 | offset);
                return Ok(());
            }
            encoder.store_name_offset(wire);
            let label = &self.labels[start];
            encoder.emit(label.len() as u8);
            encoder.emit_vec(label);
        }
        encoder.emit(0);
        Ok(())
    }
}

impl<'r> BinDecodable<'r> for Name {
    fn read(decoder: &mut BinDecoder<'r>) -> ProtoResult<Self> {
        let mut labels: Vec<Box<[u8]>> = Vec::new();
        let mut current = decoder.index();
        let buffer = decoder.buffer();
        let mut jumped = false;
        let mut pointer_budget = 64u8;
        let mut resume_at = None;

        loop {
            let len = *buffer.get(current).ok_or_else(|| {
                crate::error::ProtoError::from(ProtoErrorKind::Underflow {
                    index: current,
                    length: buffer.len(),
                })
            })?;

            match len {
                0 => {
                    current += 1;
                    break;
                }
                1..=63 => {
                    let end = current + 1 + len as usize;
                    if end > buffer.len() {
                        return Err(ProtoErrorKind::Underflow {
                            index: current,
                            length: buffer.len(),
                        }
                        .into());
                    }
                    labels.push(buffer[current + 1..end].into());
                    if labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1 > MAX_NAME_BYTES {
                        return Err(ProtoErrorKind::DomainNameTooLong(labels.len()).into());
                    }
                    current = end;
                }
                0xC0..=0xFF => {
                    let low = *buffer.get(current + 1).ok_or_else(|| {
                        crate::error::ProtoError::from(ProtoErrorKind::Underflow {
                            index: current + 1,
                            length: buffer.len(),
                        })
                    })?;
                    let target = (((len & 0x3F) as u16) << 8 | low as u16) as usize;
                    // a pointer may only reach backwards, and chains are bounded
                    if target >= current || pointer_budget == 0 {
                        return Err(ProtoErrorKind::BadPointer(target as u16).into());
                    }
                    pointer_budget -= 1;
                    if !jumped {
                        resume_at = Some(current + 2);
                        jumped = true;
                    }
                    current = target;
                }
                _ => return Err(ProtoErrorKind::BadPointer(len as u16).into()),
            }
        }

        decoder.seek(resume_at.unwrap_or(current));
        Ok(Self {
            labels,
            is_fqdn: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let name = Name::from_str("WWW.Example.COM.").unwrap();
        assert!(name.is_fqdn());
        assert_eq!(name.num_labels(), 3);
        assert_eq!(name.to_lowercase().to_string(), "www.example.com.");
    }

    #[test]
    fn test_normalise_idempotent() {
        let name = Name::from_str("MiXeD.Example.").unwrap();
        let once = name.to_lowercase();
        let twice = once.to_lowercase();
        assert_eq!(once, twice);
        assert_eq!(once.to_string(), twice.to_string());
    }

    #[test]
    fn test_eq_ignores_case() {
        let a = Name::from_str("example.com.").unwrap();
        let b = Name::from_str("EXAMPLE.COM.").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zone_of() {
        let zone = Name::from_str("example.com.").unwrap();
        let www = Name::from_str("www.example.com.").unwrap();
        let other = Name::from_str("example.net.").unwrap();
        assert!(zone.zone_of(&www));
        assert!(zone.zone_of(&zone));
        assert!(!zone.zone_of(&other));
        assert!(Name::root().zone_of(&www));
    }

    #[test]
    fn test_base_name() {
        let www = Name::from_str("www.example.com.").unwrap();
        assert_eq!(www.base_name(), Name::from_str("example.com.").unwrap());
        assert_eq!(Name::root().base_name(), Name::root());
    }

    #[test]
    fn test_canonical_order_reverse_labels() {
        // a.example sorts before b.example sorts before a.test
        let a_example = Name::from_str("a.example.").unwrap();
        let b_example = Name::from_str("b.example.").unwrap();
        let a_test = Name::from_str("a.test.").unwrap();
        assert!(a_example < b_example);
        assert!(b_example < a_test);
    }

    #[test]
    fn test_wire_round_trip() {
        let name = Name::from_str("ns1.example.com.").unwrap();
        let bytes = name.to_bytes().unwrap();
        let decoded = Name::from_bytes(&bytes).unwrap();
        assert_eq!(name, decoded);
    }

    #[test]
    fn test_compression_pointer_round_trip() {
        let mut encoder = BinEncoder::new();
        let first = Name::from_str("example.com.").unwrap();
        let second = Name::from_str("www.example.com.").unwrap();
        first.emit(&mut encoder).unwrap();
        second.emit(&mut encoder).unwrap();
        let bytes = encoder.into_bytes();
        // second name must reuse the first via a pointer
        assert!(bytes.len() < first.encoded_len() + second.encoded_len());

        let mut decoder = BinDecoder::new(&bytes);
        assert_eq!(Name::read(&mut decoder).unwrap(), first);
        assert_eq!(Name::read(&mut decoder).unwrap(), second);
    }

    #[test]
    fn test_pointer_loop_rejected() {
        // 0xC000 points at itself
        let bytes = [0xC0u8, 0x00];
        assert!(Name::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_label_too_long() {
        let label = [b'a'; 64];
        assert!(Name::root().append_label(&label).is_err());
    }

    #[test]
    fn test_prepend_label() {
        let parent = Name::from_str("example.com.").unwrap();
        let child = parent
            .prepend_label(b"_dsync")
            .unwrap();
        assert_eq!(child.to_string(), "_dsync.example.com.");
    }
}
