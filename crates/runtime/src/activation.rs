//! Per-step tool activation.
//!
//! The active subset follows the project's state: planning and discovery
//! on the opening step, build-and-fix tools while the build is broken,
//! implementation tools plus completion tracking while the plan is being
//! executed, and the full surface otherwise.

use wf_context::types::ProjectContext;
use wf_domain::tool::ToolCategory;
use wf_tools::ToolRegistry;

pub fn select_active_tools(
    registry: &ToolRegistry,
    step_number: u32,
    ctx: &ProjectContext,
) -> Vec<String> {
    if step_number == 0 {
        return registry.activate(&[ToolCategory::Planning, ToolCategory::Project], &[]);
    }

    let build_broken = ctx
        .build_status
        .as_ref()
        .map(|b| b.has_errors)
        .unwrap_or(false);
    if build_broken {
        return registry.activate(
            &[
                ToolCategory::File,
                ToolCategory::BatchFile,
                ToolCategory::Build,
            ],
            &[],
        );
    }

    let server_running = ctx
        .server_state
        .as_ref()
        .map(|s| s.is_running)
        .unwrap_or(false);
    if server_running && ctx.task_graph.is_some() {
        return registry.activate(
            &[
                ToolCategory::File,
                ToolCategory::BatchFile,
                ToolCategory::Build,
            ],
            &["markStepComplete"],
        );
    }

    registry
        .specs()
        .iter()
        .map(|s| s.definition.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wf_context::types::{BuildStatus, ServerState, TaskGraph};

    fn ctx() -> ProjectContext {
        ProjectContext::new("p1", "p1", "/home/user/project")
    }

    #[test]
    fn step_zero_is_planning_and_discovery() {
        let registry = ToolRegistry::builtin();
        let active = select_active_tools(&registry, 0, &ctx());
        assert!(active.contains(&"planChanges".to_string()));
        assert!(active.contains(&"getProjectStructure".to_string()));
        assert!(active.contains(&"analyzeProjectState".to_string()));
        assert!(!active.contains(&"writeFile".to_string()));
    }

    #[test]
    fn broken_build_activates_file_and_build_tools() {
        let registry = ToolRegistry::builtin();
        let mut ctx = ctx();
        ctx.build_status = Some(BuildStatus {
            has_errors: true,
            has_warnings: false,
            errors: vec!["Error: x".into()],
            warnings: vec![],
            last_checked: Utc::now(),
        });
        let active = select_active_tools(&registry, 3, &ctx);
        assert!(active.contains(&"writeFile".to_string()));
        assert!(active.contains(&"getBuildStatus".to_string()));
        assert!(!active.contains(&"planChanges".to_string()));
    }

    #[test]
    fn running_server_with_plan_adds_mark_step_complete() {
        let registry = ToolRegistry::builtin();
        let mut ctx = ctx();
        ctx.sandbox_id = Some("sb-1".into());
        ctx.server_state = Some(ServerState {
            is_running: true,
            port: Some(3000),
            url: None,
            started_at: None,
        });
        ctx.task_graph = Some(TaskGraph::default());
        let active = select_active_tools(&registry, 2, &ctx);
        assert!(active.contains(&"markStepComplete".to_string()));
        assert!(active.contains(&"batchWriteFiles".to_string()));
        assert!(!active.contains(&"planChanges".to_string()));
    }

    #[test]
    fn otherwise_the_full_surface_is_active() {
        let registry = ToolRegistry::builtin();
        let active = select_active_tools(&registry, 1, &ctx());
        assert_eq!(active.len(), registry.specs().len());
    }
}
