// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![allow(clippy::option_map_unit_fn)]

//! # Bolt Graph Database Driver
//!
//! This crate provides a driver for graph databases speaking the Bolt wire
//! protocol (versions 3.0 and 4.0–4.4).
//! It mirrors many concepts of the official drivers while leveraging Rust's
//! type system and lifetime management to rule out common pitfalls at compile
//! time.
//!
//! ## Basic Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use graphbolt::address::Address;
//! use graphbolt::driver::auth::AuthToken;
//! use graphbolt::driver::{ConnectionConfig, Driver, DriverConfig, RoutingControl};
//! use graphbolt::session::SessionConfig;
//! use graphbolt::{value_map, ValueReceive};
//!
//! let address = Address::from(("localhost", 7687));
//! let auth = Arc::new(AuthToken::new_basic_auth("neo4j", "pass"));
//! let driver = Driver::new(
//!     // tell the driver where to connect to
//!     ConnectionConfig::new(address),
//!     // configure how the driver works locally (e.g., authentication)
//!     DriverConfig::new().with_auth(auth),
//! );
//!
//! let mut session = driver.session(SessionConfig::new());
//! let result = session
//!     .auto_commit("RETURN $x AS x")
//!     .with_parameters(value_map!({"x": 123}))
//!     // In a clustered environment, read queries should not overload the
//!     // single write server.
//!     .with_routing_control(RoutingControl::Read)
//!     .run()
//!     .unwrap();
//! assert_eq!(result.records.len(), 1);
//! for mut record in result.records {
//!     assert_eq!(record.take_value("x"), Some(ValueReceive::Integer(123)));
//! }
//! ```
//!
//! ## Concepts
//!
//! ### The Driver
//! The fundamental type of this crate is the [`Driver`].
//! Through it, all database interactions are performed.
//! The driver manages a connection pool per server it learns about, so there
//! is no need to pool driver objects.
//! Usually, each application will use one global driver.
//!
//! ### Routing
//! When created with a routing-enabled [`driver::ConnectionConfig`] (the
//! default, also chosen by `neo4j://` URIs), the driver periodically fetches
//! a routing table from the cluster and load-balances work across the
//! cluster's readers and writers depending on the chosen
//! [`driver::RoutingControl`].
//!
//! ### Sessions
//! Sessions are spawned from the driver, see [`Driver::session()`].
//! Session creation is cheap; it's recommended to create a new session for
//! each piece of work.
//! Sessions borrow connections from the driver's pool as needed.
//!
//! ### Logging
//! The driver logs through the [`log`] facade.
//! Debug level contains a trace of all Bolt messages exchanged with the
//! servers as well as the routing decisions taken.

mod address_;
pub mod driver;
mod error_;
#[macro_use]
mod macros;
mod sync;
mod util;
pub mod value;

// imports for docs
#[allow(unused)]
use driver::Driver;

pub use error_::{BoltError, Result, ServerError, UserCallbackError};
pub use value::{ValueReceive, ValueSend};

pub mod address {
    pub use super::address_::resolution::*;
    pub use super::address_::*;
}
pub mod bookmarks {
    pub use super::driver::session::bookmarks::*;
}
pub mod session {
    pub use super::driver::session::*;
}
pub mod retry {
    pub use super::driver::session::retry::*;
}
pub mod transaction {
    pub use super::driver::transaction::*;
}
