use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "labkeeper", version, about = "Lab pool bookkeeping and health tasks")]
pub struct Args {
    /// Config file to use instead of the default lookup.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Registered task name, e.g. `NodeHealthMonitorTask`.
    pub task: String,

    /// Task params as a JSON object.
    #[arg(long, group = "input")]
    pub params: Option<String>,

    /// Read task params from a JSON file.
    #[arg(long, group = "input")]
    pub params_file: Option<String>,

    /// Give up waiting for the report after this many seconds.
    /// Defaults to `tasks.result_timeout_secs`.
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task to completion and print its report.
    Run(RunArgs),
    /// List the registered task names.
    Tasks,
    /// Serve the task API over HTTP.
    Serve(ServeArgs),
}
