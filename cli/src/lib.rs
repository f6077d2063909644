//! labkeeper-cli library: command handlers and the HTTP API, exposed for tests.

pub mod commands;
pub mod http;
pub mod logging;

use labkeeper_core::api::{CliError, ServiceError};

/// 0 ok, 11 config, 20 I/O or task failure, 50 internal.
pub fn exit_code_for_error(e: &CliError) -> i32 {
    match e {
        CliError::Config(_) => 11,
        CliError::Service(se) => match se {
            ServiceError::Config(_) => 11,
            ServiceError::Plugin(_) => 50,
        },
        CliError::Task(_) => 20,
        CliError::Io(_) => 20,
        CliError::Command(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labkeeper_core::api::TaskError;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for_error(&CliError::Config("bad".into())), 11);
        assert_eq!(
            exit_code_for_error(&ServiceError::Config("missing".into()).into()),
            11
        );
        assert_eq!(
            exit_code_for_error(&TaskError::DeadlineExceeded { waited_ms: 5 }.into()),
            20
        );
        assert_eq!(
            exit_code_for_error(&CliError::Anyhow(anyhow::anyhow!("boom"))),
            50
        );
    }
}
