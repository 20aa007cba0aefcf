//! Planning tools: install a task graph, mark steps complete.

use serde::Deserialize;
use serde_json::{json, Value};

use wf_context::types::{Task, TaskGraph, TaskStatus};
use wf_domain::error::Result;

use super::{parse_input, Executors};

#[derive(Deserialize)]
struct PlanChangesInput {
    steps: Vec<String>,
}

#[derive(Deserialize)]
struct MarkStepInput {
    id: String,
}

/// Build a task graph from ordered step titles: generated ids, each step
/// depending on the one before it.
pub(super) async fn plan_changes(x: &Executors, project_id: &str, input: &Value) -> Result<Value> {
    let input: PlanChangesInput = parse_input(input)?;

    let tasks: Vec<Task> = input
        .steps
        .iter()
        .enumerate()
        .map(|(i, title)| Task {
            id: format!("task-{}", i + 1),
            title: title.clone(),
            depends_on: if i == 0 {
                Vec::new()
            } else {
                vec![format!("task-{i}")]
            },
            status: TaskStatus::Pending,
        })
        .collect();

    let summary: Vec<Value> = tasks
        .iter()
        .map(|t| json!({ "id": t.id, "title": t.title }))
        .collect();
    let count = tasks.len();

    x.context
        .set_task_graph(project_id, TaskGraph { tasks })
        .await?;

    Ok(json!({ "tasks": summary, "count": count }))
}

pub(super) async fn mark_step_complete(
    x: &Executors,
    project_id: &str,
    input: &Value,
) -> Result<Value> {
    let input: MarkStepInput = parse_input(input)?;
    x.context.mark_step_complete(project_id, &input.id).await?;
    Ok(json!({ "completed": input.id }))
}
