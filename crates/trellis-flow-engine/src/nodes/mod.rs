//! Built-in node implementations.

pub mod subflow;

pub use subflow::{SubflowConfig, SubflowNode, SubflowNodeFactory};
