use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use labkeeper_cli::commands::{cli, run};
use labkeeper_cli::{exit_code_for_error, http, logging};
use labkeeper_core::api::{self as core_api, AppContext, CliError};
use labkeeper_plugins::services::PluginServicesFactory;
use labkeeper_plugins::tasks::builtin_registry;

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg = match args.config.as_deref() {
        Some(path) => {
            let mut cfg = core_api::load_from_path(Path::new(path))
                .map_err(|e| CliError::Config(e.to_string()))?;
            core_api::apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
            cfg
        }
        None => core_api::load_default().map_err(|e| CliError::Config(e.to_string()))?,
    };
    logging::init_tracing(&cfg.logging).map_err(CliError::Command)?;

    let ctx = AppContext::new(cfg, Some(Arc::new(PluginServicesFactory::default())));
    let registry = builtin_registry();

    match args.command {
        cli::Commands::Run(run_args) => run::run_task(&run_args, &ctx, &registry).await,
        cli::Commands::Tasks => Ok(run::list_tasks(&registry)),
        cli::Commands::Serve(serve_args) => {
            http::handle_serve(serve_args, &ctx, registry).await?;
            Ok(0)
        }
    }
}
