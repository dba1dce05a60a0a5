//! Peer node protocol: framing, a blocking client, and the server.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::NodeClient;
pub use protocol::{Request, Response};
pub use server::{NodeServer, ServerHandle};
