// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The DNSSEC validator: RRSIG verification against the key cache, and
//! DS-anchored admission of DNSKEY RRsets
//!
//! Verdicts are a pure function of the inputs and the current key and zone
//! cache contents; fetching missing DS/DNSKEY material is the recursion
//! engine's job.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use ironwood_proto::dnssec::{
    ds_digest, key_tag, rrsig_sign_data, verify_signature, Algorithm, ValidationState,
};
use ironwood_proto::rr::rdata::{RData, DNSKEY, RRSIG};
use ironwood_proto::rr::{Name, Record, RecordSet, RecordType};

use crate::cache::{DnskeyCache, ZoneCache};
use crate::clock::Clock;

pub mod proof;

/// Signature and chain verification against the cached keys
pub struct Validator {
    dnskeys: Arc<DnskeyCache>,
    zones: Arc<ZoneCache>,
    clock: Arc<dyn Clock>,
    /// Accepted clock skew on signature windows, seconds
    clock_skew: u32,
    /// Bound on DS/DNSKEY chain recursion, independent of referral depth
    max_chain_depth: u8,
}

impl Validator {
    /// A validator over the given caches
    pub fn new(
        dnskeys: Arc<DnskeyCache>,
        zones: Arc<ZoneCache>,
        clock: Arc<dyn Clock>,
        clock_skew: u32,
    ) -> Self {
        Self {
            dnskeys,
            zones,
            clock,
            clock_skew,
            max_chain_depth: 16,
        }
    }

    /// The key cache the validator reads and admits into
    pub fn dnskeys(&self) -> &Arc<DnskeyCache> {
        &self.dnskeys
    }

    /// Validate one RRset against its signatures with the keys already in
    /// the cache.
    ///
    /// One verified signature yields `Secure`. When every signature whose
    /// key is obtainable fails, the set is `Bogus`. When no signature
    /// references an obtainable key the verdict is `Indeterminate`; the
    /// caller is expected to fetch the signer's DS and DNSKEY and retry.
    pub fn validate(
        &self,
        records: &[Record],
        rrsigs: &[Record],
        signer_zone: &Name,
    ) -> ValidationState {
        let mut visited = HashSet::new();
        self.validate_bounded(records, rrsigs, signer_zone, &mut visited)
    }

    fn validate_bounded(
        &self,
        records: &[Record],
        rrsigs: &[Record],
        signer_zone: &Name,
        visited: &mut HashSet<String>,
    ) -> ValidationState {
        let Some(covered_type) = records.first().map(Record::record_type) else {
            return ValidationState::Indeterminate;
        };

        let mut keys_obtained = false;
        let mut failures = 0usize;

        for rrsig in rrsigs_covering(rrsigs, covered_type) {
            if &rrsig.signer_name != signer_zone {
                continue;
            }

            let entry = match self.dnskeys.get(&rrsig.signer_name, rrsig.key_tag) {
                Some(entry) => entry,
                None => {
                    // the signer's keys may be fetched but not yet
                    // admitted; establish them through their own chain
                    let Some(dnskey_rrset) = self
                        .zones
                        .get(&rrsig.signer_name)
                        .and_then(|z| z.dnskey_rrset().cloned())
                    else {
                        continue;
                    };
                    let verdict = self.validate_dnskey_rrset_bounded(
                        &rrsig.signer_name,
                        &dnskey_rrset,
                        visited,
                    );
                    if verdict != ValidationState::Secure {
                        if verdict == ValidationState::Bogus {
                            failures += 1;
                            keys_obtained = true;
                        }
                        continue;
                    }
                    match self.dnskeys.get(&rrsig.signer_name, rrsig.key_tag) {
                        Some(entry) => entry,
                        None => continue,
                    }
                }
            };
            if entry.dnskey().algorithm != rrsig.algorithm {
                continue;
            }
            keys_obtained = true;

            if !self.window_ok(rrsig) {
                debug!(
                    "signature window failed for {} {} tag {}",
                    records[0].name(),
                    covered_type,
                    rrsig.key_tag
                );
                failures += 1;
                continue;
            }

            match self.verify_one(records, rrsig, entry.dnskey()) {
                Ok(()) => return ValidationState::Secure,
                Err(e) => {
                    warn!(
                        "signature failed for {} {} tag {}: {e}",
                        records[0].name(),
                        covered_type,
                        rrsig.key_tag
                    );
                    failures += 1;
                }
            }
        }

        if keys_obtained && failures > 0 {
            ValidationState::Bogus
        } else {
            ValidationState::Indeterminate
        }
    }

    /// Convenience form over a [`RecordSet`]
    pub fn validate_rrset(&self, rrset: &RecordSet, signer_zone: &Name) -> ValidationState {
        let records: Vec<Record> = rrset.records().cloned().collect();
        self.validate(&records, rrset.rrsigs(), signer_zone)
    }

    /// Validate a zone's DNSKEY RRset against a trust anchor or the DS set
    /// its parent published, admitting every key on success.
    ///
    /// The signing key must itself appear in the RRset; a DS that matches
    /// no served key breaks the chain and the zone is Bogus.
    pub fn validate_dnskey_rrset(&self, zone: &Name, rrset: &RecordSet) -> ValidationState {
        let mut visited = HashSet::new();
        self.validate_dnskey_rrset_bounded(zone, rrset, &mut visited)
    }

    fn validate_dnskey_rrset_bounded(
        &self,
        zone: &Name,
        rrset: &RecordSet,
        visited: &mut HashSet<String>,
    ) -> ValidationState {
        // the chain may not revisit a signer within one validation
        if !visited.insert(zone.to_lowercase().to_string()) {
            warn!("DNSKEY chain re-entered {zone}");
            return ValidationState::Bogus;
        }
        if visited.len() > usize::from(self.max_chain_depth) {
            warn!("DNSKEY chain depth exceeded at {zone}");
            return ValidationState::Bogus;
        }

        let records: Vec<Record> = rrset.records().cloned().collect();
        if records.is_empty() {
            return ValidationState::Indeterminate;
        }

        let ds_set = self.zones.get(zone).and_then(|e| e.ds_rrset().cloned());

        let mut anchored_candidates = 0usize;
        let mut failures = 0usize;

        for rrsig in rrsigs_covering(rrset.rrsigs(), RecordType::DNSKEY) {
            if &rrsig.signer_name != zone {
                continue;
            }
            let Some(signing_key) = find_key(&records, rrsig.key_tag, rrsig.algorithm) else {
                continue;
            };
            if !self.key_is_anchored(zone, &signing_key, rrsig.key_tag, ds_set.as_ref()) {
                continue;
            }
            anchored_candidates += 1;

            if !self.window_ok(rrsig) {
                failures += 1;
                continue;
            }

            match self.verify_one(&records, rrsig, &signing_key) {
                Ok(()) => {
                    self.admit_keys(zone, rrset, rrsig);
                    return ValidationState::Secure;
                }
                Err(e) => {
                    warn!("DNSKEY signature failed for {zone}: {e}");
                    failures += 1;
                }
            }
        }

        if anchored_candidates > 0 && failures > 0 {
            return ValidationState::Bogus;
        }

        // a DS set naming only keys the child never serves is a broken
        // chain, not an unsigned zone
        if let Some(ds_set) = &ds_set {
            if !ds_set.is_empty() {
                warn!("no served DNSKEY of {zone} matches a published DS");
                return ValidationState::Bogus;
            }
        }

        ValidationState::Indeterminate
    }

    /// Admit every key of a just-verified DNSKEY RRset
    fn admit_keys(&self, zone: &Name, rrset: &RecordSet, rrsig: &RRSIG) {
        for record in rrset.records() {
            if let RData::DNSKEY(dnskey) = record.data() {
                if dnskey.is_revoked() {
                    continue;
                }
                let Ok(tag) = key_tag(dnskey) else { continue };
                self.dnskeys.insert_validated(
                    zone.clone(),
                    tag,
                    dnskey.clone(),
                    rrset.ttl(),
                    rrsig.sig_expiration,
                );
            }
        }
    }

    /// A key is anchored when it matches a configured trust anchor or a
    /// DS record published by the parent
    fn key_is_anchored(
        &self,
        zone: &Name,
        dnskey: &DNSKEY,
        tag: u16,
        ds_set: Option<&RecordSet>,
    ) -> bool {
        if let Some(anchor) = self.dnskeys.get(zone, tag) {
            if anchor.trust_anchor() && anchor.dnskey().public_key == dnskey.public_key {
                return true;
            }
        }

        let Some(ds_set) = ds_set else { return false };
        ds_set.records().any(|record| match record.data() {
            RData::DS(ds) => {
                ds.key_tag == tag
                    && ds.algorithm == dnskey.algorithm
                    && ds_digest(zone, dnskey, ds.digest_type)
                        .map(|digest| digest == ds.digest)
                        .unwrap_or(false)
            }
            _ => false,
        })
    }

    fn verify_one(
        &self,
        records: &[Record],
        rrsig: &RRSIG,
        dnskey: &DNSKEY,
    ) -> Result<(), ironwood_proto::ProtoError> {
        let sign_data = rrsig_sign_data(records, rrsig)?;
        verify_signature(dnskey, &sign_data, &rrsig.sig)
    }

    /// RFC 4035 window check with the configured skew: a signature whose
    /// inception is up to `clock_skew` in the future, or whose expiration
    /// is up to `clock_skew` in the past, is still accepted
    fn window_ok(&self, rrsig: &RRSIG) -> bool {
        let now = self.clock.unix_secs();
        let skew = u64::from(self.clock_skew);
        u64::from(rrsig.sig_inception) <= now + skew
            && u64::from(rrsig.sig_expiration) + skew >= now
    }
}

/// The RRSIGs in `records` covering `covered_type`
fn rrsigs_covering(records: &[Record], covered_type: RecordType) -> impl Iterator<Item = &RRSIG> {
    records.iter().filter_map(move |record| match record.data() {
        RData::RRSIG(rrsig) if rrsig.type_covered == covered_type => Some(rrsig),
        _ => None,
    })
}

/// Find the DNSKEY with `tag` and `algorithm` inside a DNSKEY RRset
fn find_key(records: &[Record], tag: u16, algorithm: Algorithm) -> Option<DNSKEY> {
    records.iter().find_map(|record| match record.data() {
        RData::DNSKEY(dnskey)
            if dnskey.algorithm == algorithm
                && dnskey.is_zone_key()
                && key_tag(dnskey).ok() == Some(tag) =>
        {
            Some(dnskey.clone())
        }
        _ => None,
    })
}
