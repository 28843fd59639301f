//! Optional authenticated TCP frontend for the command notary daemon.
//!
//! Shares its dispatch table with `slb-ipc` via
//! `slb_protocol::router::Dispatcher` rather than duplicating the method
//! table; adds only what a network-reachable frontend needs on top: a CIDR
//! allowlist and a pre-dispatch auth handshake.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The `{"auth":"<session-key>"}` handshake and its validation.
mod auth;
/// Hand-rolled CIDR/bare-IP allowlist matching.
mod cidr;
mod server;

pub use auth::AuthHandshake;
pub use cidr::{Allowlist, CidrEntry};
pub use server::{TcpServer, TcpServerError};
