// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Query struct for looking up resource records

use std::fmt;

use crate::error::ProtoResult;
use crate::rr::{DNSClass, Name, RecordType};
use crate::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};

/// The question of a message: what name, type and class is asked for
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Query {
    name: Name,
    query_type: RecordType,
    query_class: DNSClass,
}

impl Query {
    /// A query for the given name and type, class IN
    pub fn query(name: Name, query_type: RecordType) -> Self {
        Self {
            name,
            query_type,
            query_class: DNSClass::IN,
        }
    }

    /// The name being asked for
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The type being asked for
    pub fn query_type(&self) -> RecordType {
        self.query_type
    }

    /// The class being asked for
    pub fn query_class(&self) -> DNSClass {
        self.query_class
    }

    /// Set the class of the query
    pub fn set_query_class(&mut self, query_class: DNSClass) -> &mut Self {
        self.query_class = query_class;
        self
    }

    /// True when `other` asks the same question, names compared
    /// case-insensitively
    pub fn matches(&self, other: &Self) -> bool {
        self.name == other.name
            && self.query_type == other.query_type
            && self.query_class == other.query_class
    }
}

impl BinEncodable for Query {
    fn emit(&self, encoder: &mut BinEncoder) -> ProtoResult<()> {
        self.name.emit(encoder)?;
        encoder.emit_u16(self.query_type.into());
        encoder.emit_u16(self.query_class.into());
        Ok(())
    }
}

impl<'r> BinDecodable<'r> for Query {
    fn read(decoder: &mut BinDecoder<'r>) -> ProtoResult<Self> {
        Ok(Self {
            name: Name::read(decoder)?,
            query_type: RecordType::from(decoder.read_u16()?),
            query_class: DNSClass::from(decoder.read_u16()?),
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.name, self.query_class, self.query_type
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_query_round_trip() {
        let query = Query::query(Name::from_str("www.example.com.").unwrap(), RecordType::AAAA);
        let bytes = query.to_bytes().unwrap();
        let decoded = Query::from_bytes(&bytes).unwrap();
        assert_eq!(query, decoded);
    }

    #[test]
    fn test_matches_ignores_case() {
        let lower = Query::query(Name::from_str("www.example.com.").unwrap(), RecordType::A);
        let upper = Query::query(Name::from_str("WWW.EXAMPLE.COM.").unwrap(), RecordType::A);
        assert!(lower.matches(&upper));
    }
}
