//! Command tools: ad-hoc sandbox execution and package installs.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use wf_context::types::ContextPatch;
use wf_domain::cancel::CancelToken;
use wf_domain::error::{Error, Result};
use wf_sandbox::pkg::{parse_install_targets, PackageManager};

use super::{parse_input, Executors};

#[derive(Deserialize)]
struct RunCommandInput {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Deserialize)]
struct InstallPackageInput {
    packages: Vec<String>,
    #[serde(default)]
    dev: bool,
}

pub(super) async fn run_command(
    x: &Executors,
    project_id: &str,
    input: &Value,
    cancel: &CancelToken,
) -> Result<Value> {
    let input: RunCommandInput = parse_input(input)?;
    x.sandbox.ensure_sandbox(project_id).await?;

    let outcome = x
        .sandbox
        .exec_with_cancel(
            project_id,
            &input.command,
            input.cwd,
            input.timeout_ms,
            cancel,
        )
        .await?;

    // Ad-hoc installs still land in the dependency map.
    if outcome.success() {
        let targets = parse_install_targets(&input.command);
        if !targets.is_empty() {
            let deps: BTreeMap<String, String> = targets.into_iter().collect();
            x.context
                .update(
                    project_id,
                    ContextPatch {
                        dependencies: Some(deps),
                        ..Default::default()
                    },
                )
                .await?;
        }
    }

    Ok(json!({
        "stdout": outcome.stdout,
        "stderr": outcome.stderr,
        "exit_code": outcome.exit_code,
        "duration_ms": outcome.duration_ms,
        "timed_out": outcome.timed_out,
    }))
}

/// Install packages with the detected package manager. A running dev
/// server is stopped for the install and restarted afterwards.
pub(super) async fn install_package(
    x: &Executors,
    project_id: &str,
    input: &Value,
    cancel: &CancelToken,
) -> Result<Value> {
    let input: InstallPackageInput = parse_input(input)?;
    if input.packages.is_empty() {
        return Err(Error::Validation("no packages given".into()));
    }
    x.sandbox.ensure_sandbox(project_id).await?;
    let ctx = x.context.get(project_id).await?;

    let was_running = ctx
        .server_state
        .as_ref()
        .map(|s| s.is_running)
        .unwrap_or(false);
    if was_running {
        x.devserver.stop(project_id).await?;
    }

    let pm = PackageManager::detect(ctx.files.keys().map(String::as_str));
    let command = pm.add_command(&input.packages, input.dev);
    let outcome = x
        .sandbox
        .exec_with_cancel(
            project_id,
            &command,
            None,
            Some(x.exec_cfg.install_timeout_ms),
            cancel,
        )
        .await?;
    if outcome.timed_out {
        return Err(Error::Timeout(format!("install timed out: {command}")));
    }
    if !outcome.success() {
        return Err(Error::Internal(format!(
            "install failed ({}): {}",
            outcome.exit_code, outcome.stderr
        )));
    }

    let deps: BTreeMap<String, String> = input
        .packages
        .iter()
        .map(|spec| match spec.rfind('@') {
            Some(idx) if idx > 0 => (spec[..idx].to_owned(), spec[idx + 1..].to_owned()),
            _ => (spec.clone(), "latest".to_owned()),
        })
        .collect();
    let installed: Vec<String> = deps.keys().cloned().collect();
    x.context
        .update(
            project_id,
            ContextPatch {
                dependencies: Some(deps),
                ..Default::default()
            },
        )
        .await?;

    if was_running {
        x.devserver.start(project_id, None, false).await?;
    }

    Ok(json!({
        "installed": installed,
        "dev": input.dev,
        "dev_server_restarted": was_running,
    }))
}
