//! In-flight request bookkeeping between browser clients and the tool executor
//!
//! Every forwarded request gets a relay-minted key so that two clients reusing the same
//! request id never collide on the shared executor channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::mcp::client::{ClientHandle, ClientId};
use crate::mcp::rpc::RequestId;

pub type CorrelationKey = u64;

#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub client: ClientHandle,
    pub original_id: RequestId,
    pub created_at: Instant,
}

/// Cheaply cloneable handle; clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    entries: Arc<Mutex<HashMap<CorrelationKey, CorrelationEntry>>>,
    next_key: Arc<AtomicU64>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a forwarded request and returns the key to use on the executor channel.
    pub async fn insert(&self, client: ClientHandle, original_id: RequestId) -> CorrelationKey {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
        self.entries.lock().await.insert(
            key,
            CorrelationEntry {
                client,
                original_id,
                created_at: Instant::now(),
            },
        );
        key
    }

    /// Read-once lookup: the entry is gone after this returns it.
    pub async fn take(&self, key: CorrelationKey) -> Option<CorrelationEntry> {
        self.entries.lock().await.remove(&key)
    }

    /// Drops every entry owned by `client_id`, returning how many were removed.
    pub async fn remove_client(&self, client_id: ClientId) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.client.id() != client_id);
        before - entries.len()
    }

    pub async fn drain(&self) -> Vec<(CorrelationKey, CorrelationEntry)> {
        self.entries.lock().await.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
