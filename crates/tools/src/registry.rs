//! The typed tool registry: every tool the LLM may call, with its JSON
//! schema, category, and validation entry point.

use serde_json::Value;

use wf_domain::tool::{ToolCategory, ToolDefinition};

use crate::schema::{validate_input, ToolCallError};

/// One registered tool: the LLM-facing definition plus its category for
/// the orchestrator's per-step activation policy.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub category: ToolCategory,
}

pub struct ToolRegistry {
    specs: Vec<ToolSpec>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    /// The built-in tool surface of the app builder.
    pub fn builtin() -> Self {
        let mut specs = Vec::new();
        let mut add = |name: &str, description: &str, category: ToolCategory, parameters: Value| {
            specs.push(ToolSpec {
                definition: ToolDefinition {
                    name: name.into(),
                    description: description.into(),
                    parameters,
                },
                category,
            });
        };

        add(
            "planChanges",
            "Plan the requested work as an ordered list of steps. Later steps depend on earlier ones.",
            ToolCategory::Planning,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "steps": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Step titles, in execution order"
                    }
                },
                "required": ["steps"]
            }),
        );

        add(
            "markStepComplete",
            "Mark a planned step as completed.",
            ToolCategory::Planning,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Task id from the plan" }
                },
                "required": ["id"]
            }),
        );

        add(
            "analyzeProjectState",
            "Summarize the current project: files, dependencies, server and build status, plan progress.",
            ToolCategory::Project,
            serde_json::json!({ "type": "object", "properties": {} }),
        );

        add(
            "getProjectStructure",
            "List the project's file tree from the sandbox.",
            ToolCategory::Project,
            serde_json::json!({ "type": "object", "properties": {} }),
        );

        add(
            "readFile",
            "Read one file from the project.",
            ToolCategory::File,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" }
                },
                "required": ["path"]
            }),
        );

        add(
            "writeFile",
            "Create or overwrite one file in the project.",
            ToolCategory::File,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" },
                    "content": { "type": "string", "description": "Full file contents" }
                },
                "required": ["path", "content"]
            }),
        );

        add(
            "editFile",
            "Edit one file by replacing the first occurrence of a search string.",
            ToolCategory::File,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path relative to the project root" },
                    "search": { "type": "string", "description": "Exact text to find" },
                    "replace": { "type": "string", "description": "Replacement text" }
                },
                "required": ["path", "search", "replace"]
            }),
        );

        add(
            "batchWriteFiles",
            "Write many files in one call. Returns created, updated, and failed paths.",
            ToolCategory::BatchFile,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "object" },
                        "description": "Entries of {path, content}"
                    }
                },
                "required": ["files"]
            }),
        );

        add(
            "runCommand",
            "Run a shell command inside the sandbox and return its output.",
            ToolCategory::Code,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "cwd": { "type": "string", "description": "Working directory (default: project root)" },
                    "timeout_ms": { "type": "integer", "description": "Hard timeout in milliseconds" }
                },
                "required": ["command"]
            }),
        );

        add(
            "installPackage",
            "Install npm packages with the project's package manager, restarting the dev server around the install.",
            ToolCategory::Build,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "packages": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Package specs, e.g. 'zod' or 'zod@3.23.8'"
                    },
                    "dev": { "type": "boolean", "description": "Install as devDependencies" }
                },
                "required": ["packages"]
            }),
        );

        add(
            "getBuildStatus",
            "Read the dev-server log and classify recent errors and warnings.",
            ToolCategory::Build,
            serde_json::json!({
                "type": "object",
                "properties": {
                    "log_lines": { "type": "integer", "description": "How many log lines to inspect (default 50)" }
                }
            }),
        );

        add(
            "syncProject",
            "Persist the current files and dependencies to the project's durable record.",
            ToolCategory::Sync,
            serde_json::json!({ "type": "object", "properties": {} }),
        );

        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.definition.name == name)
    }

    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs.iter().map(|s| s.definition.clone()).collect()
    }

    pub fn list_by_name(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.get(n))
            .map(|s| s.definition.clone())
            .collect()
    }

    pub fn list_by_category(&self, categories: &[ToolCategory]) -> Vec<&ToolSpec> {
        self.specs
            .iter()
            .filter(|s| categories.contains(&s.category))
            .collect()
    }

    /// Tool names for an active subset: the given categories plus any
    /// extra names, deduplicated in registry order.
    pub fn activate(&self, categories: &[ToolCategory], extra: &[&str]) -> Vec<String> {
        self.specs
            .iter()
            .filter(|s| {
                categories.contains(&s.category) || extra.contains(&s.definition.name.as_str())
            })
            .map(|s| s.definition.name.clone())
            .collect()
    }

    /// Validate a tool call's input against the tool's schema.
    pub fn validate(&self, name: &str, input: &Value) -> Result<(), ToolCallError> {
        let spec = self.get(name).ok_or_else(|| ToolCallError::UnknownTool {
            name: name.to_owned(),
        })?;
        validate_input(&spec.definition.parameters, input)
    }
}
