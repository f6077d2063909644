pub mod manager;
pub mod params;
pub mod registry;
pub mod result;
pub mod state;
pub mod subtask;
#[allow(clippy::module_inception)]
pub mod task;

pub use manager::{TaskManager, TaskStatus};
pub use registry::{TaskBuilder, TaskRegistry};
pub use result::{SharedTaskResult, SubTaskEntry, TaskResult};
pub use state::{StateTransition, TaskState, TransitionError};
pub use subtask::{SubTask, SubTaskId, SubTaskOutcome};
pub use task::{Task, TaskContext};
