//! Job scheduling and execution

pub mod coordinator;
pub mod executor;
pub mod locks;
pub mod node;
pub mod scheduler;

pub use coordinator::{ArtifactStatus, Coordinator, CoordinatorEvent, EventHandler};
pub use executor::{JobExecutor, LocalWorkspace, Workspace};
pub use locks::{LockGraph, LockReport};
pub use node::{NodeRunner, NodeSummary};
pub use scheduler::Dispatcher;
