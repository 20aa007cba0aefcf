//! Single-file and bulk file tools. Every path is normalized before it
//! touches the sandbox or the store; results update the context's file
//! snapshot with `created`/`updated` status.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use wf_context::types::{ContextPatch, FileState, FileStatus};
use wf_domain::error::{Error, Result};
use wf_domain::path::{language_for_path, normalize_rel_path};

use super::{parse_input, Executors};

#[derive(Deserialize)]
struct ReadFileInput {
    path: String,
}

#[derive(Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditFileInput {
    path: String,
    search: String,
    replace: String,
}

#[derive(Deserialize)]
struct BatchEntry {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct BatchWriteInput {
    files: Vec<BatchEntry>,
}

fn file_state(path: &str, content: &str, status: FileStatus) -> FileState {
    FileState {
        content: content.to_owned(),
        language: language_for_path(path).to_owned(),
        last_modified: Utc::now(),
        status,
    }
}

pub(super) async fn read_file(x: &Executors, project_id: &str, input: &Value) -> Result<Value> {
    let input: ReadFileInput = parse_input(input)?;
    let path = normalize_rel_path(&input.path)?;
    let handle = x.sandbox.ensure_sandbox(project_id).await?;
    let ctx = x.context.get(project_id).await?;
    let content = handle
        .read_file(&format!("{}/{}", ctx.project_dir, path))
        .await?;
    Ok(json!({ "path": path, "content": content }))
}

pub(super) async fn write_file(x: &Executors, project_id: &str, input: &Value) -> Result<Value> {
    let input: WriteFileInput = parse_input(input)?;
    let path = normalize_rel_path(&input.path)?;
    let handle = x.sandbox.ensure_sandbox(project_id).await?;
    let ctx = x.context.get(project_id).await?;

    handle
        .write_file(&format!("{}/{}", ctx.project_dir, path), &input.content)
        .await?;

    let status = if ctx.files.contains_key(&path) {
        FileStatus::Updated
    } else {
        FileStatus::Created
    };
    let mut files = BTreeMap::new();
    files.insert(path.clone(), file_state(&path, &input.content, status));
    x.context
        .update(
            project_id,
            ContextPatch {
                files: Some(files),
                ..Default::default()
            },
        )
        .await?;

    Ok(json!({
        "path": path,
        "status": if status == FileStatus::Created { "created" } else { "updated" },
        "bytes": input.content.len(),
    }))
}

pub(super) async fn edit_file(x: &Executors, project_id: &str, input: &Value) -> Result<Value> {
    let input: EditFileInput = parse_input(input)?;
    let path = normalize_rel_path(&input.path)?;
    let handle = x.sandbox.ensure_sandbox(project_id).await?;
    let ctx = x.context.get(project_id).await?;

    let abs = format!("{}/{}", ctx.project_dir, path);
    let current = handle.read_file(&abs).await?;
    let Some(at) = current.find(&input.search) else {
        return Err(Error::Validation(format!(
            "search string not found in '{path}'"
        )));
    };
    let mut next = current.clone();
    next.replace_range(at..at + input.search.len(), &input.replace);
    handle.write_file(&abs, &next).await?;

    let mut files = BTreeMap::new();
    files.insert(path.clone(), file_state(&path, &next, FileStatus::Updated));
    x.context
        .update(
            project_id,
            ContextPatch {
                files: Some(files),
                ..Default::default()
            },
        )
        .await?;

    Ok(json!({ "path": path, "status": "updated" }))
}

/// Concurrent bulk write. Invalid paths and failed writes are reported in
/// `failed` rather than aborting the batch; the context sees one files
/// patch (and subscribers one `FilesChanged` event) for the whole batch.
pub(super) async fn batch_write_files(
    x: &Executors,
    project_id: &str,
    input: &Value,
) -> Result<Value> {
    let input: BatchWriteInput = parse_input(input)?;
    let handle = x.sandbox.ensure_sandbox(project_id).await?;
    let ctx = x.context.get(project_id).await?;

    let mut failed: Vec<Value> = Vec::new();
    let mut valid: Vec<(String, String)> = Vec::new();
    for entry in input.files {
        match normalize_rel_path(&entry.path) {
            Ok(path) => valid.push((path, entry.content)),
            Err(e) => failed.push(json!({ "path": entry.path, "error": e.to_string() })),
        }
    }

    let writes = valid.iter().map(|(path, content)| {
        let abs = format!("{}/{}", ctx.project_dir, path);
        let handle = &handle;
        async move { (path.clone(), handle.write_file(&abs, content).await) }
    });
    let results = futures_util::future::join_all(writes).await;

    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut files = BTreeMap::new();
    for ((path, content), (_, result)) in valid.iter().zip(results) {
        match result {
            Ok(()) => {
                let status = if ctx.files.contains_key(path) {
                    updated.push(path.clone());
                    FileStatus::Updated
                } else {
                    created.push(path.clone());
                    FileStatus::Created
                };
                files.insert(path.clone(), file_state(path, content, status));
            }
            Err(e) => failed.push(json!({ "path": path, "error": e.to_string() })),
        }
    }

    if !files.is_empty() {
        x.context
            .update(
                project_id,
                ContextPatch {
                    files: Some(files),
                    ..Default::default()
                },
            )
            .await?;
    }

    Ok(json!({ "created": created, "updated": updated, "failed": failed }))
}
