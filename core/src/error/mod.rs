#[allow(clippy::module_inception)]
pub mod error;
pub mod task;

pub use error::{CliError, ServiceError};
pub use task::{ErrorKind, TaskError};
