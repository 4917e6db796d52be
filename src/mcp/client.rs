//! Addressable sinks for connected browser clients

use std::fmt;

use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound half of a client connection. Messages pushed here are written to the socket
/// by the connection task in the order they were sent.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::UnboundedSender<Value>,
}

impl ClientHandle {
    pub fn new(id: ClientId, outbound: mpsc::UnboundedSender<Value>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns `false` when the connection is already gone.
    pub fn send(&self, message: Value) -> bool {
        self.outbound.send(message).is_ok()
    }
}
