//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `labkeeper_core::api` instead of reaching into internal modules.

pub use crate::admin::{AdminApi, AdminError, AdminOperation, AdminResponse};
pub use crate::config::{
    apply_env_overrides, load_default, load_from_path, AppConfig, CollectionsConfig,
    HttpServerConfig, HttpStoreConfig, JenkinsInstanceConfig, LocalStoreConfig, LoggingConfig,
    RemoteConfig, RetryConfig, StoreConfig, StoreProvider, TaskManagerConfig, TasksConfig,
};
pub use crate::context::{AppContext, Services, ServicesFactory};
pub use crate::error::{CliError, ErrorKind, ServiceError, TaskError};
pub use crate::remote::{
    CommandOutput, HostCredentials, OsRelease, RemoteConnector, RemoteError, RemoteExecutor,
};
pub use crate::retry::{ImmediateRetry, RetryStrategy};
pub use crate::store::{Document, DocumentStore, PoolClient, Query, StoreError};
pub use crate::task::params;
pub use crate::task::{
    SharedTaskResult, StateTransition, SubTaskEntry, SubTaskId, SubTaskOutcome, Task,
    TaskBuilder, TaskContext, TaskManager, TaskRegistry, TaskResult, TaskState, TaskStatus,
    TransitionError,
};
