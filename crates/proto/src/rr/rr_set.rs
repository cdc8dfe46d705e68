// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use tracing::info;

use crate::rr::{DNSClass, Name, RData, Record, RecordType};

/// Set of resource records associated to a name and type
///
/// The associated RRSIGs are held in a separate list, never merged into the
/// positive set. All records in the set share one TTL; when sources disagree
/// the minimum wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSet {
    name: Name,
    record_type: RecordType,
    dns_class: DNSClass,
    ttl: u32,
    records: Vec<Record>,
    rrsigs: Vec<Record>,
}

impl RecordSet {
    /// Creates a new Resource Record Set.
    ///
    /// # Arguments
    ///
    /// * `name` - The label for the `RecordSet`
    /// * `record_type` - `RecordType` of this `RecordSet`, all records in the `RecordSet` must be of the
    ///   specified `RecordType`.
    pub fn new(name: Name, record_type: RecordType) -> Self {
        Self {
            name,
            record_type,
            dns_class: DNSClass::IN,
            ttl: 0,
            records: Vec::new(),
            rrsigs: Vec::new(),
        }
    }

    /// Creates a new Resource Record Set with a starting TTL.
    pub fn with_ttl(name: Name, record_type: RecordType, ttl: u32) -> Self {
        Self {
            name,
            record_type,
            dns_class: DNSClass::IN,
            ttl,
            records: Vec::new(),
            rrsigs: Vec::new(),
        }
    }

    /// Label of the Resource Record Set
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// `RecordType` of the Resource Record Set
    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Returns the `DNSClass` of the RecordSet
    pub fn dns_class(&self) -> DNSClass {
        self.dns_class
    }

    /// Sets the DNSClass, traversing every record
    pub fn set_dns_class(&mut self, dns_class: DNSClass) {
        self.dns_class = dns_class;
        for r in &mut self.records {
            r.set_dns_class(dns_class);
        }
    }

    /// The shared TTL of the set, in seconds
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Sets the TTL to the specified value, traversing every record
    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
        for r in &mut self.records {
            r.set_ttl(ttl);
        }
    }

    /// Returns true if there are no records in this set
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records in the positive set
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Iterate the positive records, without signatures
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Returns a slice of all the signatures covering the RecordSet
    pub fn rrsigs(&self) -> &[Record] {
        &self.rrsigs
    }

    /// Inserts a Signature for the Record set
    ///
    /// Many can be associated with the RecordSet. Once added, the RecordSet should not be changed
    ///
    /// # Arguments
    ///
    /// * `rrsig` - A signature which covers the RecordSet.
    pub fn insert_rrsig(&mut self, rrsig: Record) {
        self.rrsigs.push(rrsig)
    }

    /// Useful for clearing all signatures when the RecordSet is replaced
    pub fn clear_rrsigs(&mut self) {
        self.rrsigs.clear()
    }

    /// creates a new Record as part of this RecordSet, adding the associated RData
    pub fn add_rdata(&mut self, rdata: RData) -> bool {
        debug_assert_eq!(self.record_type, rdata.record_type());

        let record = Record::from_rdata(self.name.clone(), self.ttl, rdata);
        self.insert(record)
    }

    /// Inserts a new Resource Record into the Set.
    ///
    /// The set's TTL is normalised to the minimum of the stored TTL and the
    /// inserted record's; every record in the set is re-stamped with it.
    ///
    /// This abides by the following restrictions in RFC 2136, April 1997:
    ///
    /// ```text
    /// 1.1.5. The following RR types cannot be appended to an RRset.  If the
    ///  following comparison rules are met, then an attempt to add the new RR
    ///  will result in the replacement of the previous RR:
    ///
    /// SOA    compare only NAME, CLASS and TYPE -- it is not possible to
    ///         have more than one SOA per zone, even if any of the data
    ///         fields differ.
    ///
    /// CNAME  compare only NAME, CLASS, and TYPE -- it is not possible
    ///         to have more than one CNAME RR, even if their data fields
    ///         differ.
    /// ```
    ///
    /// # Return value
    ///
    /// True if the record was inserted.
    pub fn insert(&mut self, record: Record) -> bool {
        assert_eq!(record.name(), &self.name);
        assert_eq!(record.record_type(), self.record_type);

        match record.record_type() {
            RecordType::SOA | RecordType::CNAME => {
                if let Some(existing) = self.records.first() {
                    if existing.data() != record.data() {
                        info!("replacing singleton record: {:?}", existing.data());
                    }
                }
                let new_ttl = if self.records.is_empty() {
                    record.ttl()
                } else {
                    self.ttl.min(record.ttl())
                };
                self.records.clear();
                self.records.push(record);
                self.set_ttl(new_ttl);
                return true;
            }
            _ => (),
        }

        if self.records.iter().any(|rr| rr.data() == record.data()) {
            // duplicate rdata still narrows the shared ttl
            if record.ttl() < self.ttl {
                self.set_ttl(record.ttl());
            }
            return false;
        }

        let new_ttl = if self.records.is_empty() {
            record.ttl()
        } else {
            self.ttl.min(record.ttl())
        };
        self.records.push(record);
        self.set_ttl(new_ttl);
        true
    }

    /// Removes the record matching the given data, if it exists.
    pub fn remove(&mut self, record: &Record) -> bool {
        assert_eq!(record.name(), &self.name);
        assert_eq!(record.record_type(), self.record_type);

        let old_size = self.records.len();
        self.records.retain(|rr| rr.data() != record.data());
        self.records.len() < old_size
    }
}

impl From<Record> for RecordSet {
    fn from(record: Record) -> Self {
        Self {
            name: record.name().clone(),
            record_type: record.record_type(),
            dns_class: record.dns_class(),
            ttl: record.ttl(),
            records: vec![record],
            rrsigs: vec![],
        }
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
