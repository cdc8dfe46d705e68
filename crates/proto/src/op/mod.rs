// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Operations to send with a client or server, e.g. query, notify, update

mod edns;
mod header;
mod message;
mod query;

pub use edns::Edns;
pub use header::{Header, MessageType, OpCode, ResponseCode};
pub use message::Message;
pub use query::Query;
