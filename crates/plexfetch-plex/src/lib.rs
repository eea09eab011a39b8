//! Clients for the upstream identity service and media server.
//!
//! Everything here is stateless: each client holds a shared connection pool
//! and the connection parameters it was built with, nothing that a request
//! could overwrite for another.

pub mod discovery;
pub mod error;
pub mod identity;
pub mod models;
pub mod server;
pub mod wire;

pub use discovery::{CandidateServer, DiscoveryError, SelectedServer, select_best_connection};
pub use error::PlexError;
pub use identity::PlexTv;
pub use server::PlexServer;
