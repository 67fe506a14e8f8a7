//! File tools: read, write, and list directory.
//!
//! All tools enforce workspace containment by canonicalizing paths and
//! verifying they remain within the configured workspace directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use clawgate_core::tools::Tool;
use clawgate_types::GateError;

fn tool_err(message: impl Into<String>) -> GateError {
    GateError::Tool {
        message: message.into(),
    }
}

/// Validate that `path` resolves to an existing location within
/// `workspace`, returning the canonical path.
fn validate_path(path: &str, workspace: &Path) -> clawgate_types::Result<PathBuf> {
    let resolved = workspace.join(path);
    let canonical = std::fs::canonicalize(&resolved)
        .map_err(|_| tool_err(format!("file not found: {path}")))?;
    let workspace_canonical = std::fs::canonicalize(workspace)
        .map_err(|e| tool_err(format!("workspace unavailable: {e}")))?;
    if !canonical.starts_with(&workspace_canonical) {
        return Err(tool_err(format!("path escapes workspace: {path}")));
    }
    Ok(canonical)
}

/// Validate a path that may not exist yet (write operations): the
/// deepest existing ancestor must be inside the workspace.
fn validate_parent_path(path: &str, workspace: &Path) -> clawgate_types::Result<PathBuf> {
    let resolved = workspace.join(path);
    let mut ancestor = resolved.as_path();
    loop {
        if ancestor.exists() {
            break;
        }
        ancestor = ancestor
            .parent()
            .ok_or_else(|| tool_err(format!("path escapes workspace: {path}")))?;
    }
    let canonical_ancestor = std::fs::canonicalize(ancestor)
        .map_err(|e| tool_err(format!("cannot resolve path: {e}")))?;
    let workspace_canonical = std::fs::canonicalize(workspace)
        .map_err(|e| tool_err(format!("workspace unavailable: {e}")))?;
    if !canonical_ancestor.starts_with(&workspace_canonical) {
        return Err(tool_err(format!("path escapes workspace: {path}")));
    }
    Ok(resolved)
}

/// Extract a required string field from a JSON arguments object.
fn required_str(args: &serde_json::Value, field: &str) -> clawgate_types::Result<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| tool_err(format!("missing required field: {field}")))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

/// Read the contents of a file within the workspace.
pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    /// Create a `read_file` tool sandboxed to `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read (relative to workspace)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
        let path = required_str(&args, "path")?;
        let canonical = validate_path(&path, &self.workspace)?;
        debug!(path = %canonical.display(), "reading file");
        tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| tool_err(format!("read failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

/// Write content to a file within the workspace, creating parent
/// directories as needed.
pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    /// Create a `write_file` tool sandboxed to `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if necessary."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write (relative to workspace)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let resolved = validate_parent_path(&path, &self.workspace)?;

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| tool_err(format!("mkdir failed: {e}")))?;
        }
        debug!(path = %resolved.display(), bytes = content.len(), "writing file");
        tokio::fs::write(&resolved, &content)
            .await
            .map_err(|e| tool_err(format!("write failed: {e}")))?;
        Ok(format!("wrote {} bytes to {path}", content.len()))
    }
}

// ---------------------------------------------------------------------------
// list_directory
// ---------------------------------------------------------------------------

/// List the entries of a directory within the workspace.
pub struct ListDirectoryTool {
    workspace: PathBuf,
}

impl ListDirectoryTool {
    /// Create a `list_directory` tool sandboxed to `workspace`.
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to list (relative to workspace, default: .)"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> clawgate_types::Result<String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let canonical = validate_path(&path, &self.workspace)?;

        let mut entries = tokio::fs::read_dir(&canonical)
            .await
            .map_err(|e| tool_err(format!("list failed: {e}")))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| tool_err(format!("list failed: {e}")))?
        {
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            names.push(format!("{}{suffix}", entry.file_name().to_string_lossy()));
        }
        names.sort();
        Ok(names.join("\n"))
    }
}
