//! Build diagnostics from the dev-server log.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use wf_context::types::{BuildStatus, ContextPatch};
use wf_devserver::{classify_line, LogLevel};
use wf_domain::error::Result;

use super::{parse_input, Executors};

#[derive(Deserialize)]
struct GetBuildStatusInput {
    #[serde(default)]
    log_lines: Option<usize>,
}

pub(super) async fn get_build_status(
    x: &Executors,
    project_id: &str,
    input: &Value,
) -> Result<Value> {
    let input: GetBuildStatusInput = parse_input(input)?;
    let lines = x
        .devserver
        .log_tail(project_id, input.log_lines.unwrap_or(50))
        .await;

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in &lines {
        match classify_line(line) {
            Some(LogLevel::Error) => errors.push(line.clone()),
            Some(LogLevel::Warning) => warnings.push(line.clone()),
            None => {}
        }
    }

    let status = BuildStatus {
        has_errors: !errors.is_empty(),
        has_warnings: !warnings.is_empty(),
        errors,
        warnings,
        last_checked: Utc::now(),
    };
    let summary = json!({
        "has_errors": status.has_errors,
        "has_warnings": status.has_warnings,
        "errors": status.errors,
        "warnings": status.warnings,
        "lines_inspected": lines.len(),
    });

    x.context
        .update(
            project_id,
            ContextPatch {
                build_status: Some(status),
                ..Default::default()
            },
        )
        .await?;

    Ok(summary)
}
