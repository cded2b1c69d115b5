//! Duet core.
//!
//! Pure building blocks shared by the server and the simulation harness. No
//! I/O happens here: time and randomness come in through [`env::Environment`],
//! and state machines take the current instant as a parameter.
//!
//! - [`env`]: time and randomness abstraction
//! - [`identity`]: verified user reference attached to a connection
//! - [`connection`]: per-connection lifecycle state machine
//! - [`error`]: illegal transitions and identity validation failures

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod identity;

pub use connection::{Connection, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
pub use identity::Identity;
