// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Per-zone DNSSEC validation state

use std::sync::Arc;

use tracing::debug;

use ironwood_proto::dnssec::ValidationState;
use ironwood_proto::rr::{Name, RecordSet};

use crate::cache::ShardedMap;
use crate::clock::Clock;

/// What the recursor knows about one zone's DNSSEC posture
#[derive(Clone, Debug)]
pub struct ZoneEntry {
    name: Name,
    state: ValidationState,
    parent: Option<Name>,
    ds_rrset: Option<RecordSet>,
    dnskey_rrset: Option<RecordSet>,
    /// When the evidence behind `state` stops being valid; 0 for none
    evidence_expiration: u64,
}

impl ZoneEntry {
    fn new(name: Name) -> Self {
        Self {
            name,
            state: ValidationState::Indeterminate,
            parent: None,
            ds_rrset: None,
            dnskey_rrset: None,
            evidence_expiration: 0,
        }
    }

    /// The zone name
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The current verdict for the zone
    pub fn state(&self) -> ValidationState {
        self.state
    }

    /// The parent zone, when known
    pub fn parent(&self) -> Option<&Name> {
        self.parent.as_ref()
    }

    /// The DS set published by the parent, when fetched
    pub fn ds_rrset(&self) -> Option<&RecordSet> {
        self.ds_rrset.as_ref()
    }

    /// The zone's own DNSKEY set, when fetched
    pub fn dnskey_rrset(&self) -> Option<&RecordSet> {
        self.dnskey_rrset.as_ref()
    }
}

/// The zone validation-state cache
///
/// Transitions are monotone within the validity window of the evidence
/// that produced them; once the evidence expires the zone drops back to
/// Indeterminate and the verdict is recomputed.
pub struct ZoneCache {
    map: ShardedMap<String, ZoneEntry>,
    clock: Arc<dyn Clock>,
}

impl ZoneCache {
    /// An empty cache
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: ShardedMap::new(),
            clock,
        }
    }

    fn key(zone: &Name) -> String {
        zone.to_lowercase().to_string()
    }

    /// The entry for `zone`; an entry with expired evidence reads as
    /// Indeterminate so the verdict gets recomputed
    pub fn get(&self, zone: &Name) -> Option<ZoneEntry> {
        let now = self.clock.unix_secs();
        let mut entry = self.map.get(&Self::key(zone))?;
        if entry.evidence_expiration != 0 && entry.evidence_expiration <= now {
            entry.state = ValidationState::Indeterminate;
        }
        Some(entry)
    }

    /// The effective state of `zone`, Indeterminate when unknown
    pub fn state(&self, zone: &Name) -> ValidationState {
        self.get(zone).map(|e| e.state()).unwrap_or_default()
    }

    /// Drive the state machine for `zone`.
    ///
    /// `evidence_expiration` bounds how long the verdict may stand;
    /// pass the expiry of the DS/DNSKEY material or the proof that
    /// produced it.
    pub fn set_state(
        &self,
        zone: &Name,
        state: ValidationState,
        parent: Option<Name>,
        evidence_expiration: u64,
    ) {
        debug!("zone {zone} -> {state}");
        let zone_name = zone.clone();
        self.map.upsert(
            Self::key(zone),
            move || ZoneEntry::new(zone_name),
            |entry| {
                entry.state = state;
                if parent.is_some() {
                    entry.parent = parent;
                }
                entry.evidence_expiration = evidence_expiration;
            },
        );
    }

    /// Store the DS set the parent published for `zone`
    pub fn set_ds(&self, zone: &Name, ds_rrset: Option<RecordSet>) {
        let zone_name = zone.clone();
        self.map.upsert(
            Self::key(zone),
            move || ZoneEntry::new(zone_name),
            |entry| entry.ds_rrset = ds_rrset,
        );
    }

    /// Store the zone's own DNSKEY set
    pub fn set_dnskey(&self, zone: &Name, dnskey_rrset: Option<RecordSet>) {
        let zone_name = zone.clone();
        self.map.upsert(
            Self::key(zone),
            move || ZoneEntry::new(zone_name),
            |entry| entry.dnskey_rrset = dnskey_rrset,
        );
    }

    /// Snapshot for the dump surface: `(zone, state)` pairs
    pub fn iter_snapshot(&self) -> Vec<(String, ValidationState)> {
        let now = self.clock.unix_secs();
        self.map
            .snapshot()
            .into_iter()
            .map(|(zone, entry)| {
                let state = if entry.evidence_expiration != 0 && entry.evidence_expiration <= now
                {
                    ValidationState::Indeterminate
                } else {
                    entry.state
                };
                (zone, state)
            })
            .collect()
    }

    /// Number of zones tracked
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no zones are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::clock::FixedClock;

    const T0: u64 = 1_700_000_000;

    #[test]
    fn test_unknown_zone_is_indeterminate() {
        let cache = ZoneCache::new(Arc::new(FixedClock::at(T0)));
        let zone = Name::from_str("example.com.").unwrap();
        assert_eq!(cache.state(&zone), ValidationState::Indeterminate);
    }

    #[test]
    fn test_state_transition_and_parent() {
        let cache = ZoneCache::new(Arc::new(FixedClock::at(T0)));
        let zone = Name::from_str("example.com.").unwrap();
        let parent = Name::from_str("com.").unwrap();

        cache.set_state(&zone, ValidationState::Secure, Some(parent.clone()), T0 + 3600);
        let entry = cache.get(&zone).unwrap();
        assert_eq!(entry.state(), ValidationState::Secure);
        assert_eq!(entry.parent(), Some(&parent));
    }

    #[test]
    fn test_expired_evidence_reads_indeterminate() {
        let clock = Arc::new(FixedClock::at(T0));
        let cache = ZoneCache::new(clock.clone());
        let zone = Name::from_str("example.com.").unwrap();

        cache.set_state(&zone, ValidationState::Secure, None, T0 + 60);
        assert_eq!(cache.state(&zone), ValidationState::Secure);

        clock.advance(61);
        assert_eq!(cache.state(&zone), ValidationState::Indeterminate);
    }
}
