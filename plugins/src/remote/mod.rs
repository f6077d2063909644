pub mod ssh;

pub use ssh::{SshConnector, SshExecutor, SshSettings};
