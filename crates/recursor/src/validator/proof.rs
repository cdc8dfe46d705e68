// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Authenticated denial of existence: NSEC (RFC 4035) and NSEC3 (RFC 5155)
//! proof checking
//!
//! These functions only reason about coverage; the NSEC/NSEC3 records
//! themselves must already have validated signatures. A missing proof is a
//! Bogus condition for the caller, never Indeterminate.

use std::cmp::Ordering;

use data_encoding::BASE32HEX_NOPAD;

use ironwood_proto::dnssec::nsec3_hash;
use ironwood_proto::rr::rdata::{NSEC, NSEC3};
use ironwood_proto::rr::{Name, RecordType};

/// An NSEC record paired with its owner
pub type OwnedNsec = (Name, NSEC);

/// An NSEC3 record paired with its owner (first label is the hash)
pub type OwnedNsec3 = (Name, NSEC3);

/// True when `name` falls in the gap between `owner` and `next`,
/// exclusive on both sides, with the last NSEC of the zone wrapping to
/// the apex
fn nsec_covers(owner: &Name, next: &Name, name: &Name) -> bool {
    match owner.cmp_canonical(next) {
        // normal span in the middle of the zone
        Ordering::Less => {
            owner.cmp_canonical(name) == Ordering::Less
                && name.cmp_canonical(next) == Ordering::Less
        }
        // the last NSEC: everything after owner, or before the apex
        Ordering::Greater => {
            owner.cmp_canonical(name) == Ordering::Less
                || name.cmp_canonical(next) == Ordering::Less
        }
        // a single-name zone covers everything but the owner itself
        Ordering::Equal => name != owner,
    }
}

/// The deepest common ancestor of two names
fn closest_common_ancestor(a: &Name, b: &Name) -> Name {
    let mut candidate = a.clone();
    loop {
        if candidate.zone_of(b) {
            return candidate;
        }
        if candidate.is_root() {
            return Name::root();
        }
        candidate = candidate.base_name();
    }
}

/// NXDOMAIN by NSEC: a record covers the name and another (or the same)
/// denies the wildcard at the closest encloser
pub fn nsec_proves_nxdomain(qname: &Name, nsecs: &[OwnedNsec]) -> bool {
    let Some((cover_owner, cover)) = nsecs
        .iter()
        .find(|(owner, nsec)| nsec_covers(owner, &nsec.next_domain_name, qname))
    else {
        return false;
    };

    // the closest encloser is bounded by the covering span
    let ce_left = closest_common_ancestor(cover_owner, qname);
    let ce_right = closest_common_ancestor(&cover.next_domain_name, qname);
    let ce = if ce_left.num_labels() >= ce_right.num_labels() {
        ce_left
    } else {
        ce_right
    };

    let Ok(wildcard) = ce.prepend_label(b"*") else {
        return false;
    };

    nsecs.iter().any(|(owner, nsec)| {
        owner == &wildcard || nsec_covers(owner, &nsec.next_domain_name, &wildcard)
    })
}

/// NODATA by NSEC: a record owned by the name whose bitmap lacks the type
/// (and lacks CNAME, which would have rewritten the question)
pub fn nsec_proves_nodata(qname: &Name, qtype: RecordType, nsecs: &[OwnedNsec]) -> bool {
    nsecs.iter().any(|(owner, nsec)| {
        owner == qname && !nsec.covers_type(qtype) && !nsec.covers_type(RecordType::CNAME)
    })
}

/// Insecure-delegation proof by NSEC: the delegation point has NS but no
/// DS in its bitmap
pub fn nsec_proves_no_ds(zone: &Name, nsecs: &[OwnedNsec]) -> bool {
    nsecs.iter().any(|(owner, nsec)| {
        owner == zone && nsec.covers_type(RecordType::NS) && !nsec.covers_type(RecordType::DS)
    })
}

/// The base32hex label an NSEC3 chain uses for `name` under the
/// parameters of `exemplar`
fn nsec3_owner_label(name: &Name, exemplar: &NSEC3) -> String {
    BASE32HEX_NOPAD
        .encode(&nsec3_hash(name, &exemplar.salt, exemplar.iterations))
        .to_ascii_lowercase()
}

fn nsec3_matches(name: &Name, owner: &Name, nsec3: &NSEC3) -> bool {
    let Some(label) = owner.first_label() else {
        return false;
    };
    let label = String::from_utf8_lossy(label).to_ascii_lowercase();
    label == nsec3_owner_label(name, nsec3)
}

fn nsec3_covers(name: &Name, owner: &Name, nsec3: &NSEC3) -> bool {
    let Some(label) = owner.first_label() else {
        return false;
    };
    let Ok(owner_hash) = BASE32HEX_NOPAD.decode(
        String::from_utf8_lossy(label)
            .to_ascii_uppercase()
            .as_bytes(),
    ) else {
        return false;
    };
    let hash = nsec3_hash(name, &nsec3.salt, nsec3.iterations);
    let next = &nsec3.next_hashed_owner;

    match owner_hash.as_slice().cmp(next.as_slice()) {
        Ordering::Less => owner_hash.as_slice() < hash.as_slice() && hash.as_slice() < next.as_slice(),
        Ordering::Greater => {
            owner_hash.as_slice() < hash.as_slice() || hash.as_slice() < next.as_slice()
        }
        Ordering::Equal => hash != owner_hash.as_slice(),
    }
}

/// The closest-encloser proof of RFC 5155 section 8.4: walking up from
/// `qname`, find the first ancestor whose hash an NSEC3 matches; the next
/// closer name must be covered. Returns the encloser and whether the
/// covering record carries opt-out.
pub fn nsec3_closest_encloser(qname: &Name, nsec3s: &[OwnedNsec3]) -> Option<(Name, bool)> {
    let mut next_closer = qname.clone();
    let mut candidate = qname.base_name();

    loop {
        if nsec3s
            .iter()
            .any(|(owner, nsec3)| nsec3_matches(&candidate, owner, nsec3))
        {
            let covering = nsec3s
                .iter()
                .find(|(owner, nsec3)| nsec3_covers(&next_closer, owner, nsec3))?;
            return Some((candidate, covering.1.opt_out()));
        }
        if candidate.is_root() {
            return None;
        }
        next_closer = candidate.clone();
        candidate = candidate.base_name();
    }
}

/// NXDOMAIN by NSEC3: closest-encloser proof plus denial of the wildcard
/// at the encloser
pub fn nsec3_proves_nxdomain(qname: &Name, nsec3s: &[OwnedNsec3]) -> bool {
    let Some((encloser, opt_out)) = nsec3_closest_encloser(qname, nsec3s) else {
        return false;
    };

    // under opt-out the wildcard denial is not required
    if opt_out {
        return true;
    }

    let Ok(wildcard) = encloser.prepend_label(b"*") else {
        return false;
    };
    nsec3s
        .iter()
        .any(|(owner, nsec3)| nsec3_covers(&wildcard, owner, nsec3))
}

/// NODATA by NSEC3: a record matching the name whose bitmap lacks the
/// type and CNAME
pub fn nsec3_proves_nodata(qname: &Name, qtype: RecordType, nsec3s: &[OwnedNsec3]) -> bool {
    nsec3s.iter().any(|(owner, nsec3)| {
        nsec3_matches(qname, owner, nsec3)
            && !nsec3.covers_type(qtype)
            && !nsec3.covers_type(RecordType::CNAME)
    })
}

/// Insecure-delegation proof by NSEC3: a record matching the delegation
/// with NS but no DS, or an opt-out record covering its hash
pub fn nsec3_proves_no_ds(zone: &Name, nsec3s: &[OwnedNsec3]) -> bool {
    let matched = nsec3s.iter().any(|(owner, nsec3)| {
        nsec3_matches(zone, owner, nsec3)
            && nsec3.covers_type(RecordType::NS)
            && !nsec3.covers_type(RecordType::DS)
    });
    if matched {
        return true;
    }
    nsec3s
        .iter()
        .any(|(owner, nsec3)| nsec3.opt_out() && nsec3_covers(zone, owner, nsec3))
}
