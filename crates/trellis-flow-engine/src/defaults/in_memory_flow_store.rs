//! In-memory flow store for tests and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::FlowStoreError;
use crate::traits::FlowStore;
use crate::types::StoredFlow;

/// Flow store backed by a `HashMap` protected by `RwLock`.
///
/// Useful for tests and for callers that assemble flows in code rather than
/// loading them from a database.
pub struct InMemoryFlowStore {
    flows: RwLock<HashMap<String, StoredFlow>>,
}

impl InMemoryFlowStore {
    /// Create a new empty in-memory flow store.
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a flow, keyed by its own id.
    pub async fn insert(&self, flow: StoredFlow) {
        let mut guard = self.flows.write().await;
        guard.insert(flow.id.clone(), flow);
    }

    pub async fn remove(&self, flow_id: &str) -> Option<StoredFlow> {
        let mut guard = self.flows.write().await;
        guard.remove(flow_id)
    }

    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn load(&self, flow_id: &str) -> Result<StoredFlow, FlowStoreError> {
        let guard = self.flows.read().await;
        guard
            .get(flow_id)
            .cloned()
            .ok_or_else(|| FlowStoreError::NotFound {
                flow_id: flow_id.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowEdge, FlowNode};

    fn flow(id: &str) -> StoredFlow {
        StoredFlow::new(
            id,
            vec![FlowNode::new("a", "echo"), FlowNode::new("b", "echo")],
            vec![FlowEdge::new("a", "b")],
        )
    }

    #[tokio::test]
    async fn test_insert_load() {
        let store = InMemoryFlowStore::new();
        store.insert(flow("flow-1")).await;
        let loaded = store.load("flow-1").await.unwrap();
        assert_eq!(loaded.id, "flow-1");
        assert_eq!(loaded.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = InMemoryFlowStore::new();
        let err = store.load("ghost").await.unwrap_err();
        match err {
            FlowStoreError::NotFound { flow_id } => assert_eq!(flow_id, "ghost"),
            other => panic!("expected NotFound, got: {other}"),
        }
    }

    #[tokio::test]
    async fn test_insert_replaces() {
        let store = InMemoryFlowStore::new();
        store.insert(flow("flow-1")).await;
        let mut updated = flow("flow-1");
        updated.name = "renamed".into();
        store.insert(updated).await;

        assert_eq!(store.len().await, 1);
        assert_eq!(store.load("flow-1").await.unwrap().name, "renamed");
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryFlowStore::new();
        store.insert(flow("flow-1")).await;
        assert!(store.remove("flow-1").await.is_some());
        assert!(store.is_empty().await);
    }
}
