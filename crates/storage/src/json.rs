//! JSON-file-backed durable store.
//!
//! Persists project rows in `projects.json` under the configured state
//! path, with per-project `context/<id>.json` and `messages/<id>.json`
//! files. Every write flushes before returning, matching the write-through
//! contract of the production database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use wf_domain::error::{Error, Result};

use crate::rows::{AgentContextRow, ProjectRow, StoredMessage};
use crate::store::DurableStore;

/// Durable store backed by JSON files.
pub struct JsonStore {
    root: PathBuf,
    projects_path: PathBuf,
    projects: RwLock<HashMap<String, ProjectRow>>,
}

impl JsonStore {
    /// Load or create the store rooted at `state_path`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let root = state_path.to_path_buf();
        std::fs::create_dir_all(root.join("context"))?;
        std::fs::create_dir_all(root.join("messages"))?;

        let projects_path = root.join("projects.json");
        let projects = if projects_path.exists() {
            let raw = std::fs::read_to_string(&projects_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            projects = projects.len(),
            path = %projects_path.display(),
            "json store loaded"
        );

        Ok(Self {
            root,
            projects_path,
            projects: RwLock::new(projects),
        })
    }

    fn flush_projects(&self) -> Result<()> {
        let projects = self.projects.read();
        let json = serde_json::to_string_pretty(&*projects)?;
        std::fs::write(&self.projects_path, json)?;
        Ok(())
    }

    fn context_path(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("context").join(format!("{}.json", fs_name(project_id)?)))
    }

    fn messages_path(&self, project_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("messages").join(format!("{}.json", fs_name(project_id)?)))
    }

    fn require_project(&self, project_id: &str) -> Result<()> {
        if self.projects.read().contains_key(project_id) {
            return Ok(());
        }
        Err(Error::NotFound(format!("project '{project_id}' does not exist")))
    }
}

/// Project ids become file names; reject anything that would escape the
/// store directory.
fn fs_name(project_id: &str) -> Result<&str> {
    if project_id.is_empty()
        || project_id.contains('/')
        || project_id.contains('\\')
        || project_id.starts_with('.')
    {
        return Err(Error::Validation(format!("invalid project id '{project_id}'")));
    }
    Ok(project_id)
}

#[async_trait::async_trait]
impl DurableStore for JsonStore {
    async fn upsert_project(&self, row: ProjectRow) -> Result<()> {
        fs_name(&row.id)?;
        {
            let mut projects = self.projects.write();
            match projects.get_mut(&row.id) {
                Some(existing) => {
                    existing.name = row.name;
                    existing.updated_at = row.updated_at;
                }
                None => {
                    projects.insert(row.id.clone(), row);
                }
            }
        }
        self.flush_projects()
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>> {
        Ok(self.projects.read().get(project_id).cloned())
    }

    async fn append_messages(&self, project_id: &str, messages: Vec<StoredMessage>) -> Result<()> {
        self.require_project(project_id)?;
        let path = self.messages_path(project_id)?;
        let mut existing: Vec<StoredMessage> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };
        existing.extend(messages);
        std::fs::write(&path, serde_json::to_string_pretty(&existing)?)?;
        Ok(())
    }

    async fn list_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        let path = self.messages_path(project_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn put_agent_context(&self, row: AgentContextRow) -> Result<()> {
        self.require_project(&row.project_id)?;
        let path = self.context_path(&row.project_id)?;
        std::fs::write(&path, serde_json::to_string_pretty(&row)?)?;
        Ok(())
    }

    async fn get_agent_context(&self, project_id: &str) -> Result<Option<AgentContextRow>> {
        let path = self.context_path(project_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let existed = self.projects.write().remove(project_id).is_some();
        if existed {
            self.flush_projects()?;
            // Cascade.
            for path in [self.context_path(project_id)?, self.messages_path(project_id)?] {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_domain::tool::Role;

    fn store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn message(text: &str) -> StoredMessage {
        StoredMessage {
            role: Role::User,
            content: text.into(),
            parts: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let (_dir, store) = store();
        store
            .upsert_project(ProjectRow::new("p1", "Coffee Shop"))
            .await
            .unwrap();
        let row = store.get_project("p1").await.unwrap().unwrap();
        assert_eq!(row.name, "Coffee Shop");
    }

    #[tokio::test]
    async fn upsert_updates_name_but_keeps_created_at() {
        let (_dir, store) = store();
        store.upsert_project(ProjectRow::new("p1", "a")).await.unwrap();
        let created = store.get_project("p1").await.unwrap().unwrap().created_at;
        store.upsert_project(ProjectRow::new("p1", "b")).await.unwrap();
        let row = store.get_project("p1").await.unwrap().unwrap();
        assert_eq!(row.name, "b");
        assert_eq!(row.created_at, created);
    }

    #[tokio::test]
    async fn messages_require_project_row() {
        let (_dir, store) = store();
        let err = store
            .append_messages("ghost", vec![message("hi")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), wf_domain::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn context_requires_project_row() {
        let (_dir, store) = store();
        let row = AgentContextRow {
            project_id: "ghost".into(),
            project_name: "x".into(),
            project_dir: "/home/user/project".into(),
            sandbox_id: None,
            files: "{}".into(),
            dependencies: "{}".into(),
            build_status: None,
            server_state: None,
            tool_history: "[]".into(),
            error_history: "[]".into(),
            task_graph: None,
            completed_steps: "[]".into(),
            updated_at: chrono::Utc::now(),
        };
        let err = store.put_agent_context(row).await.unwrap_err();
        assert_eq!(err.kind(), wf_domain::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn messages_append_in_order() {
        let (_dir, store) = store();
        store.upsert_project(ProjectRow::new("p1", "x")).await.unwrap();
        store.append_messages("p1", vec![message("one")]).await.unwrap();
        store
            .append_messages("p1", vec![message("two"), message("three")])
            .await
            .unwrap();
        let all = store.list_messages("p1").await.unwrap();
        let texts: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let (_dir, store) = store();
        store.upsert_project(ProjectRow::new("p1", "x")).await.unwrap();
        store.append_messages("p1", vec![message("hi")]).await.unwrap();
        assert!(store.delete_project("p1").await.unwrap());
        assert!(store.get_project("p1").await.unwrap().is_none());
        assert!(store.list_messages("p1").await.unwrap().is_empty());
        assert!(!store.delete_project("p1").await.unwrap());
    }

    #[tokio::test]
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonStore::new(dir.path()).unwrap();
            store.upsert_project(ProjectRow::new("p1", "x")).await.unwrap();
        }
        let store = JsonStore::new(dir.path()).unwrap();
        assert!(store.get_project("p1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejects_traversal_project_ids() {
        let (_dir, store) = store();
        let err = store
            .upsert_project(ProjectRow::new("../evil", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), wf_domain::ErrorKind::Validation);
    }
}
