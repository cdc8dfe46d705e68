// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! An iterative-mode DNS resolver.
//!
//! Given a query, the recursor discovers authoritative servers by
//! descending the delegation hierarchy from the root, validates responses
//! against cached DNSSEC trust chains where possible, and returns a fully
//! resolved RRset or an authoritative negative answer. Beyond Do53 it
//! speaks DoT, DoH and DoQ, learning the preferred transport of each
//! authoritative server from SVCB signals seen in prior responses.
//!
//! The building blocks:
//!
//! - the RRset cache, the authoritative-server cache, the DNSKEY /
//!   trust-anchor cache, and the zone validation-state cache ([`cache`])
//! - the DNSSEC validator ([`validator`])
//! - the recursion engine ([`recursor`])
//! - the DSYNC discovery helper used by parent-synchronization tooling
//!   ([`dsync`])

// LIBRARY WARNINGS
#![warn(
    clippy::default_trait_access,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::unimplemented,
    clippy::use_self,
    missing_docs,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    unreachable_pub
)]
#![recursion_limit = "128"]
#![allow(clippy::single_component_path_imports)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod dsync;
mod error;
pub mod recursor;
pub mod validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{RecursorConfig, RootHints};
pub use error::{Error, ErrorKind, Result};
pub use recursor::{DnsExchanger, Lookup, Recursor, Request, Response, WireExchanger};

/// re-exported so consumers name types from one place
pub use ironwood_proto as proto;

/// returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
