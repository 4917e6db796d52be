//! Model Context Protocol (MCP) relay and JSON-RPC implementations
//!
//! Provides envelope decoding, client bookkeeping, request correlation and method routing.

pub mod client;
pub mod correlation;
pub mod rpc;
pub mod server;
