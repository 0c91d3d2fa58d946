//! HTTP surface hosting the gate: listeners hand the peer certificate of each
//! connection to [`serve_request`], which runs every request through the gate before
//! answering.

mod error;
pub mod http_server;
pub mod listeners;
pub mod server_context;

use std::sync::Arc;

pub use error::Error;
pub use http_server::serve_request;
pub use server_context::ServerContext;

/// DER encoding of the leaf certificate presented during the TLS handshake.
#[derive(Clone, Debug)]
pub struct PeerCertificate(pub Arc<Vec<u8>>);
