pub mod configs;
pub mod document;
pub mod queue;
pub mod sink;

// Re-export common types
pub use configs::ConfigStore;
pub use document::DocumentSink;
pub use queue::QueueSink;
pub use sink::{ResultSink, SinkFactory};
