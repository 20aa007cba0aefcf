//! Project-level tools: state summary, structure listing, durable sync.

use serde_json::{json, Value};

use wf_context::types::TaskStatus;
use wf_domain::error::Result;

use super::Executors;

/// Summarize the project for the model: what exists, what runs, and how
/// far the plan has progressed.
pub(super) async fn analyze_project_state(x: &Executors, project_id: &str) -> Result<Value> {
    let ctx = x.context.get(project_id).await?;

    let (total, completed) = match &ctx.task_graph {
        Some(graph) => (
            graph.tasks.len(),
            graph
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
        ),
        None => (0, 0),
    };

    Ok(json!({
        "project_name": ctx.project_name,
        "sandbox_id": ctx.sandbox_id,
        "file_count": ctx.files.len(),
        "files": ctx.files.keys().collect::<Vec<_>>(),
        "dependencies": ctx.dependencies,
        "server_state": ctx.server_state,
        "build_status": ctx.build_status.as_ref().map(|b| json!({
            "has_errors": b.has_errors,
            "has_warnings": b.has_warnings,
        })),
        "tasks": { "total": total, "completed": completed },
        "last_activity": ctx.last_activity,
    }))
}

/// The file tree as the sandbox sees it; falls back to the tracked
/// snapshot when no VM is live.
pub(super) async fn get_project_structure(x: &Executors, project_id: &str) -> Result<Value> {
    let ctx = x.context.get(project_id).await?;

    if x.sandbox.handle_for(project_id).is_some() {
        let outcome = x
            .sandbox
            .exec(
                project_id,
                "find . -type f -not -path './node_modules/*' -not -path './.next/*'",
                None,
                None,
            )
            .await?;
        if outcome.success() {
            let files: Vec<String> = outcome
                .stdout
                .lines()
                .map(|l| l.trim_start_matches("./").to_owned())
                .filter(|l| !l.is_empty())
                .collect();
            return Ok(json!({ "source": "sandbox", "files": files }));
        }
    }

    Ok(json!({
        "source": "snapshot",
        "files": ctx.files.keys().collect::<Vec<_>>(),
    }))
}

/// Overwrite the durable project record with the current snapshot.
pub(super) async fn sync_project(x: &Executors, project_id: &str) -> Result<Value> {
    x.context.persist(project_id).await?;
    let ctx = x.context.get(project_id).await?;
    Ok(json!({
        "synced": true,
        "files": ctx.files.len(),
        "dependencies": ctx.dependencies.len(),
    }))
}
