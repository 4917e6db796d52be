//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing, including the `/ws` WebSocket listener and other endpoints.

pub mod handlers;
