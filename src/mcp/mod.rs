//! MCP (Model Context Protocol) client layer.
//!
//! Loads a registry of tool servers, connects to them over HTTP or stdio with
//! bounded retries, and exposes a single tool namespace across all of them.

mod config;
mod error;
mod manager;
pub mod schema;
mod transport;
mod types;

pub use config::{load_server_registry, parse_server_registry, RegistryFormat};
pub use error::McpError;
pub use manager::McpManager;
pub use transport::{Connector, HttpConnection, McpConnection, StdioConnection, TransportConnector, MCP_PROTOCOL_VERSION};
pub use types::*;

#[cfg(test)]
pub(crate) use manager::tests::{fast_config, FakeConnector, FakeServer};
