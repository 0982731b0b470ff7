//! Engine builder — assembles registry, stores, sinks, and executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::FlowEngine;
use crate::defaults::InMemoryFlowStore;
use crate::executor::{ExecutorConfig, FlowExecutor};
use crate::nodes::{SubflowConfig, SubflowNodeFactory};
use crate::registry::{NodeRegistry, NodeRuntimeLoader, RuntimeCache};
use crate::traits::{ErrorSanitizer, FlowStore, NodeFactory, StreamSink, UsageSink};

/// Builder for assembling a [`FlowEngine`].
///
/// Every collaborator is optional — unset ones fall back to the in-crate
/// defaults, so `FlowEngine::builder().build()` already works.
pub struct FlowEngineBuilder {
    factories: Vec<Arc<dyn NodeFactory>>,
    flow_store: Option<Arc<dyn FlowStore>>,
    stream: Option<Arc<dyn StreamSink>>,
    usage: Option<Arc<dyn UsageSink>>,
    sanitizer: Option<Arc<dyn ErrorSanitizer>>,
    cache: Option<Arc<RuntimeCache>>,
    http: Option<reqwest::Client>,
    executor_config: ExecutorConfig,
    variables: BTreeMap<String, Value>,
    subflow: Option<SubflowConfig>,
}

impl FlowEngineBuilder {
    pub(super) fn new() -> Self {
        Self {
            factories: Vec::new(),
            flow_store: None,
            stream: None,
            usage: None,
            sanitizer: None,
            cache: None,
            http: None,
            executor_config: ExecutorConfig::default(),
            variables: BTreeMap::new(),
            subflow: None,
        }
    }

    /// Register a node factory. Keyed by `factory.meta().node_type`; a later
    /// registration under the same type wins.
    pub fn node(mut self, factory: impl NodeFactory + 'static) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Set the flow store. Default: [`InMemoryFlowStore`].
    pub fn flow_store(mut self, store: impl FlowStore + 'static) -> Self {
        self.flow_store = Some(Arc::new(store));
        self
    }

    /// Set the stream sink used for terminal output when a request asks for
    /// streaming. Default: none (streaming requests emit nothing).
    pub fn stream_sink(mut self, sink: impl StreamSink + 'static) -> Self {
        self.stream = Some(Arc::new(sink));
        self
    }

    /// Set the usage sink. Default: [`TracingUsageSink`](crate::defaults::TracingUsageSink).
    pub fn usage_sink(mut self, sink: impl UsageSink + 'static) -> Self {
        self.usage = Some(Arc::new(sink));
        self
    }

    /// Set the error sanitizer. Default: [`DefaultSanitizer`](crate::defaults::DefaultSanitizer).
    pub fn sanitizer(mut self, sanitizer: impl ErrorSanitizer + 'static) -> Self {
        self.sanitizer = Some(Arc::new(sanitizer));
        self
    }

    /// Attach a TTL cache for instantiated node runtimes. Default: no cache,
    /// every load instantiates fresh.
    pub fn runtime_cache(mut self, cache: RuntimeCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Set the shared HTTP client. Default: a fresh `reqwest::Client`.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Set the executor configuration.
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = config;
        self
    }

    /// Define an engine-level variable, resolvable as `{{$vars.<name>}}` in
    /// every execution. Request variables with the same name shadow it.
    pub fn variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_owned(), value);
        self
    }

    /// Enable the built-in sub-flow node against the given endpoint. A
    /// user-registered factory for the `subflow` type still wins.
    pub fn subflow(mut self, config: SubflowConfig) -> Self {
        self.subflow = Some(config);
        self
    }

    /// Assemble the engine, applying defaults for anything unset.
    pub fn build(self) -> FlowEngine {
        let mut registry = NodeRegistry::new();
        if let Some(config) = self.subflow {
            registry.register(Arc::new(SubflowNodeFactory::new(config)));
        }
        for factory in self.factories {
            registry.register(factory);
        }
        let registry = Arc::new(registry);

        let mut loader = NodeRuntimeLoader::new(Arc::clone(&registry));
        if let Some(cache) = self.cache {
            loader = loader.with_cache(cache);
        }

        let http = self.http.unwrap_or_default();
        let mut executor = FlowExecutor::new(Arc::new(loader))
            .with_http_client(http.clone())
            .with_config(self.executor_config);
        if let Some(sink) = self.stream {
            executor = executor.with_stream_sink(sink);
        }
        if let Some(sink) = self.usage {
            executor = executor.with_usage_sink(sink);
        }
        if let Some(sanitizer) = self.sanitizer {
            executor = executor.with_sanitizer(sanitizer);
        }

        let flow_store: Arc<dyn FlowStore> = self
            .flow_store
            .unwrap_or_else(|| Arc::new(InMemoryFlowStore::new()));

        FlowEngine {
            registry,
            flow_store,
            executor: Arc::new(executor),
            variables: self.variables,
            http,
        }
    }
}
