// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! DSYNC discovery: locate the parent-side synchronization endpoint of a
//! child zone
//!
//! All lookups go through the recursion engine; the helper keeps no cache
//! of its own.

use tracing::debug;

use ironwood_proto::rr::rdata::{DsyncScheme, RData, DSYNC};
use ironwood_proto::rr::{Name, RecordType};

use crate::error::{ErrorKind, Result};
use crate::recursor::{DnsExchanger, Lookup, Recursor};

/// Where a child zone's parent accepts synchronization traffic
#[derive(Clone, Debug)]
pub struct DsyncTarget {
    /// The owner the DSYNC set was found at
    pub qname: Name,
    /// The parent zone the endpoints belong to
    pub parent: Name,
    /// The matching endpoints; empty means none is published
    pub rdata: Vec<DSYNC>,
}

/// Discover the DSYNC endpoint for `child` with the requested scheme.
///
/// Three-step lookup: the scoped name one level up
/// (`<label>._dsync.<parent-guess>`), the scoped name under the true
/// parent when the first answer's authority reveals one, and finally the
/// parent apex (`_dsync.<parent>`).
pub async fn discover<E: DnsExchanger>(
    recursor: &Recursor<E>,
    child: &Name,
    scheme: DsyncScheme,
) -> Result<DsyncTarget> {
    let prefix = child
        .first_label()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| crate::error::Error::from(ErrorKind::Msg(
            "cannot discover DSYNC for the root".to_string(),
        )))?;
    let parent_guess = child.base_name();

    // step 1: one level up from the child, under the guessed parent
    let qname = scoped_name(&prefix, &parent_guess)?;
    let lookup = recursor.resolve(&qname, RecordType::DSYNC).await?;
    if let Some(target) = target_from(&lookup, &qname, &parent_guess, scheme) {
        return Ok(target);
    }

    // step 2: the authority section may have named the true parent
    let mut parent = parent_guess.clone();
    if let Some(true_parent) = revealed_parent(&lookup) {
        if true_parent != parent_guess && true_parent.zone_of(child) {
            debug!("DSYNC discovery: true parent of {child} is {true_parent}");
            parent = true_parent;
            let qname = scoped_name(&prefix, &parent)?;
            let lookup = recursor.resolve(&qname, RecordType::DSYNC).await?;
            if let Some(target) = target_from(&lookup, &qname, &parent, scheme) {
                return Ok(target);
            }
        }
    }

    // step 3: the parent apex
    let qname = parent.prepend_label(b"_dsync").map_err(proto_err)?;
    let lookup = recursor.resolve(&qname, RecordType::DSYNC).await?;
    if let Some(target) = target_from(&lookup, &qname, &parent, scheme) {
        return Ok(target);
    }

    // a clean miss everywhere: nothing is published
    Ok(DsyncTarget {
        qname,
        parent,
        rdata: Vec::new(),
    })
}

fn scoped_name(prefix: &[u8], parent: &Name) -> Result<Name> {
    parent
        .prepend_label(b"_dsync")
        .and_then(|n| n.prepend_label(prefix))
        .map_err(proto_err)
}

fn proto_err(e: ironwood_proto::ProtoError) -> crate::error::Error {
    ErrorKind::Msg(e.to_string()).into()
}

/// A positive answer with at least one record; endpoints are filtered to
/// the requested scheme
fn target_from(
    lookup: &Lookup,
    qname: &Name,
    parent: &Name,
    scheme: DsyncScheme,
) -> Option<DsyncTarget> {
    let rrset = lookup.rrset.as_ref()?;
    if rrset.record_type() != RecordType::DSYNC {
        return None;
    }

    let rdata: Vec<DSYNC> = rrset
        .records()
        .filter_map(|r| match r.data() {
            RData::DSYNC(dsync) if dsync.scheme == scheme => Some(dsync.clone()),
            _ => None,
        })
        .collect();

    Some(DsyncTarget {
        qname: qname.clone(),
        parent: parent.clone(),
        rdata,
    })
}

/// The true parent a negative answer's SOA names, when any
fn revealed_parent(lookup: &Lookup) -> Option<Name> {
    if !lookup.context.is_negative() {
        return None;
    }
    let soa = lookup.rrset.as_ref()?;
    if soa.record_type() != RecordType::SOA {
        return None;
    }
    Some(soa.name().clone())
}
