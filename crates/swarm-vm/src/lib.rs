pub mod config;
pub mod error;
pub mod prologue;
pub mod queue;
pub mod scope;
pub mod state;
pub mod storage;
pub mod vm;

// Re-export commonly used types
pub use config::VmConfig;
pub use error::{RuntimeError, RuntimeExCode, VmError};
pub use queue::{JobId, JobState, QueuedCall};
pub use scope::ScopeFrame;
pub use state::State;
pub use storage::{LocalStorage, SharedStorage};
pub use vm::VirtualMachine;
