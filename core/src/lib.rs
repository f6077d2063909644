//! labkeeper-core: the task/subtask fan-out framework plus the collaborator
//! contracts (document store, remote execution, admin REST) that tasks talk to.

pub mod admin;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod remote;
pub mod retry;
pub mod store;
pub mod task;
