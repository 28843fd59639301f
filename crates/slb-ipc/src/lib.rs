//! Unix-socket JSON-RPC frontend for the command notary daemon.
//!
//! One [`NotaryDispatcher`] holds the method table and subscriber map;
//! [`IpcServer`] owns the bound socket and the per-connection accept loop.
//! `slb-tcp` reuses [`NotaryDispatcher`] behind the same
//! `slb_protocol::router::Dispatcher` trait object rather than duplicating
//! the method table.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod dispatcher;
mod server;

pub use dispatcher::{NotaryDispatcher, SUBSCRIBER_QUEUE_CAPACITY};
pub use server::{IpcServer, IpcServerError, SHUTDOWN_GRACE};
