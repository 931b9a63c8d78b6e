pub mod control;
pub mod engine;

// Re-export common types
pub use control::{ControlClient, ProxyError};
pub use engine::ProxyEngine;
