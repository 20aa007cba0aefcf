use wf_domain::error::Result;

use crate::rows::{AgentContextRow, ProjectRow, StoredMessage};

/// The durable store the core writes through to.
///
/// Implementations wrap whatever the deployment uses — a relational
/// database in production, [`crate::JsonStore`] for local runs and tests.
/// The referential rules of the schema are part of the contract:
/// `messages` and `agent_context` rows require an existing project row,
/// and deleting a project cascades.
#[async_trait::async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or update a project row.
    async fn upsert_project(&self, row: ProjectRow) -> Result<()>;

    /// Fetch a project row.
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>>;

    /// Append messages to a project's message log.
    ///
    /// Fails with `NotFound` if the project row does not exist.
    async fn append_messages(&self, project_id: &str, messages: Vec<StoredMessage>) -> Result<()>;

    /// All messages for a project, oldest first.
    async fn list_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>>;

    /// Write the agent context row for a project.
    ///
    /// Fails with `NotFound` if the project row does not exist.
    async fn put_agent_context(&self, row: AgentContextRow) -> Result<()>;

    /// Fetch the agent context row for a project.
    async fn get_agent_context(&self, project_id: &str) -> Result<Option<AgentContextRow>>;

    /// Delete a project and cascade to its messages and context.
    /// Returns whether a row existed.
    async fn delete_project(&self, project_id: &str) -> Result<bool>;
}
