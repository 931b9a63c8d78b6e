pub mod extract;
pub mod registry;
pub mod runner;
pub mod site;
pub mod task;

// Re-export common types
pub use registry::TaskRegistry;
pub use runner::TaskRunner;
pub use task::{Task, TaskStatus, TaskType};
