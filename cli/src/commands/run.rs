//! `labkeeper run` and `labkeeper tasks`.

use std::time::Duration;

use labkeeper_core::api::{AppContext, CliError, TaskError, TaskManager, TaskRegistry};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::cli::RunArgs;

/// Params from `--params` or `--params-file`; `{}` when neither is given.
pub fn read_params(args: &RunArgs) -> Result<Value, CliError> {
    let raw = match (&args.params, &args.params_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Ok(json!({})),
    };
    let params: Value = serde_json::from_str(&raw)
        .map_err(|e| TaskError::InvalidParams(format!("params are not valid JSON: {e}")))?;
    if !params.is_object() {
        return Err(TaskError::InvalidParams("params must be a JSON object".into()).into());
    }
    Ok(params)
}

pub fn list_tasks(registry: &TaskRegistry) -> i32 {
    for name in registry.names() {
        println!("{name}");
    }
    0
}

/// Build the task, run it on a private manager and print its report.
///
/// Returns 0 when the task succeeded and 20 when it completed with an error;
/// the report is printed in both cases.
#[tracing::instrument(name = "cli.run_task", skip(args, ctx, registry), fields(task = %args.task))]
pub async fn run_task(
    args: &RunArgs,
    ctx: &AppContext,
    registry: &TaskRegistry,
) -> Result<i32, CliError> {
    let params = read_params(args)?;
    let cfg = ctx.cfg();
    let services = ctx.build_services().await?;
    let task = registry.build(&args.task, &params, &services, &cfg.tasks)?;

    let manager =
        TaskManager::with_report_store(cfg.task_manager.max_workers, services.tasks.clone());
    let task_id = manager.add_task(task);
    let timeout = Duration::from_secs(args.timeout.unwrap_or(cfg.tasks.result_timeout_secs));

    let progress = spawn_progress(
        manager.clone(),
        task_id.clone(),
        Duration::from_millis(cfg.tasks.poll_interval_ms.max(50)),
    );
    let waited = manager.await_result(&task_id, timeout).await;
    progress.abort();

    let result = match waited {
        Ok(result) => result,
        Err(err @ TaskError::DeadlineExceeded { .. }) => {
            warn!(task_id = %task_id, "no report before deadline, abandoning task");
            let _ = manager.abandon(&task_id);
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    let report = result.to_json()?;
    let pretty = serde_json::to_string_pretty(report.as_ref())
        .map_err(|e| CliError::Command(format!("cannot render report: {e}")))?;
    println!("{pretty}");

    let ok = result.success().unwrap_or(false);
    info!(task_id = %task_id, success = ok, "task finished");
    Ok(if ok { 0 } else { 20 })
}

fn spawn_progress(
    manager: TaskManager,
    task_id: String,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match manager.peek_status(&task_id) {
                Ok(status) => debug!(task_id = %task_id, state = ?status.state, "task progress"),
                Err(_) => break,
            }
        }
    })
}
