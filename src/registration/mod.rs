//! Broker handshake: wire protocol, client, server and the runtime handle
//!
//! Registration is a synchronous request/response over a Unix stream
//! socket with a hard deadline. A successful handshake yields the segment
//! to map and the runtime identity; everything else the broker does stays
//! opaque to the registering process.

pub mod client;
pub mod protocol;
pub mod runtime;
pub mod server;

pub use client::{RegistrationClient, RegistrationToken};
pub use protocol::{NackReason, Reply, Request, PROTOCOL_VERSION};
pub use runtime::{Runtime, RuntimeBuilder};
pub use server::RegistrationServer;
