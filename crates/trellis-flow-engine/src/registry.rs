//! Node type registry and runtime instantiation.
//!
//! All node types are registered at engine construction. The loader resolves
//! a type name to a live [`NodeRuntime`], optionally through a bounded TTL
//! cache so hot node types skip re-instantiation across executions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::errors::FlowError;
use crate::traits::{NodeFactory, NodeRuntime};
use crate::types::NodeTypeMeta;

/// Immutable map from node type name to factory.
///
/// Keys come from each factory's [`NodeTypeMeta::node_type`]. Registering a
/// second factory under the same type replaces the first.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    factories: BTreeMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        self.factories.insert(factory.meta().node_type, factory);
    }

    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.factories.get(node_type)
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    pub fn meta(&self, node_type: &str) -> Option<NodeTypeMeta> {
        self.factories.get(node_type).map(|f| f.meta())
    }

    /// Metadata for every registered type, sorted by type name.
    pub fn catalog(&self) -> Vec<NodeTypeMeta> {
        self.factories.values().map(|f| f.meta()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Bounded, time-limited cache of instantiated runtimes, keyed by node type.
///
/// Capacity and TTL are caller policy. Entries past their TTL or evicted by
/// capacity pressure are simply re-instantiated on the next load.
pub struct RuntimeCache {
    inner: Cache<String, Arc<dyn NodeRuntime>>,
}

impl RuntimeCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, node_type: &str) -> Option<Arc<dyn NodeRuntime>> {
        self.inner.get(node_type).await
    }

    pub async fn insert(&self, node_type: String, runtime: Arc<dyn NodeRuntime>) {
        self.inner.insert(node_type, runtime).await;
    }

    pub async fn invalidate(&self, node_type: &str) {
        self.inner.invalidate(node_type).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl std::fmt::Debug for RuntimeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeCache").finish_non_exhaustive()
    }
}

/// Resolves node type names to runtimes for the executor.
#[derive(Clone)]
pub struct NodeRuntimeLoader {
    registry: Arc<NodeRegistry>,
    cache: Option<Arc<RuntimeCache>>,
}

impl NodeRuntimeLoader {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RuntimeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Returns a runtime for `node_type`, from cache when one is wired in.
    ///
    /// Unknown types are a configuration error: the registry is fixed at
    /// engine construction, so nothing can appear later.
    pub async fn load(&self, node_type: &str) -> Result<Arc<dyn NodeRuntime>, FlowError> {
        if let Some(cache) = &self.cache {
            if let Some(runtime) = cache.get(node_type).await {
                return Ok(runtime);
            }
        }

        let factory = self.registry.get(node_type).ok_or_else(|| FlowError::Configuration {
            message: format!("unknown node type '{node_type}'"),
        })?;
        let runtime = factory.instantiate();

        if let Some(cache) = &self.cache {
            cache.insert(node_type.to_owned(), Arc::clone(&runtime)).await;
        }
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::node_ctx::NodeCtx;
    use crate::types::execution::NodeOutput;
    use crate::types::NodeError;

    struct CountingFactory {
        node_type: &'static str,
        instantiations: Arc<AtomicUsize>,
    }

    struct NoopRuntime;

    #[async_trait]
    impl NodeRuntime for NoopRuntime {
        async fn run(&self, _inputs: Value, _ctx: &NodeCtx) -> Result<NodeOutput, NodeError> {
            Ok(NodeOutput::text("ok"))
        }
    }

    impl NodeFactory for CountingFactory {
        fn meta(&self) -> NodeTypeMeta {
            NodeTypeMeta {
                node_type: self.node_type.to_owned(),
                label: self.node_type.to_owned(),
                category: "test".to_owned(),
                input_schema: Value::Null,
            }
        }

        fn instantiate(&self) -> Arc<dyn NodeRuntime> {
            self.instantiations.fetch_add(1, Ordering::SeqCst);
            Arc::new(NoopRuntime)
        }
    }

    fn counting(node_type: &'static str) -> (Arc<dyn NodeFactory>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            node_type,
            instantiations: Arc::clone(&count),
        };
        (Arc::new(factory), count)
    }

    #[test]
    fn registry_keys_on_meta_and_sorts_catalog() {
        let mut registry = NodeRegistry::new();
        let (zeta, _) = counting("zeta");
        let (alpha, _) = counting("alpha");
        registry.register(zeta);
        registry.register(alpha);

        assert!(registry.contains("alpha"));
        assert_eq!(registry.len(), 2);
        let names: Vec<String> = registry.catalog().into_iter().map(|m| m.node_type).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = NodeRegistry::new();
        let (first, first_count) = counting("dup");
        let (second, second_count) = counting("dup");
        registry.register(first);
        registry.register(second);
        assert_eq!(registry.len(), 1);

        registry.get("dup").unwrap().instantiate();
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_without_cache_instantiates_each_time() {
        let mut registry = NodeRegistry::new();
        let (factory, count) = counting("echo");
        registry.register(factory);
        let loader = NodeRuntimeLoader::new(Arc::new(registry));

        loader.load("echo").await.unwrap();
        loader.load("echo").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loader_with_cache_reuses_runtime() {
        let mut registry = NodeRegistry::new();
        let (factory, count) = counting("echo");
        registry.register(factory);
        let cache = Arc::new(RuntimeCache::new(16, Duration::from_secs(60)));
        let loader = NodeRuntimeLoader::new(Arc::new(registry)).with_cache(Arc::clone(&cache));

        loader.load("echo").await.unwrap();
        loader.load("echo").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        cache.invalidate("echo").await;
        loader.load("echo").await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_type_is_configuration_error() {
        let loader = NodeRuntimeLoader::new(Arc::new(NodeRegistry::new()));
        let Err(err) = loader.load("ghost").await else {
            panic!("expected configuration error")
        };
        match err {
            FlowError::Configuration { message } => assert!(message.contains("ghost")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
