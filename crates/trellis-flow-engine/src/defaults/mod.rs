//! Default implementations for all pluggable engine traits.
//!
//! These defaults allow the engine to start with zero external configuration.
//! Each can be replaced via the engine builder.

pub mod discard_stream;
pub mod in_memory_flow_store;
pub mod sanitizer;
pub mod tracing_usage;

pub use discard_stream::DiscardStreamSink;
pub use in_memory_flow_store::InMemoryFlowStore;
pub use sanitizer::DefaultSanitizer;
pub use tracing_usage::TracingUsageSink;
