//! Built-in tools for clawgate agents.
//!
//! - **File tools** ([`file_tools`]): `read_file`, `write_file`,
//!   `list_directory`
//!
//! All file and directory operations enforce workspace path containment
//! to prevent directory traversal.

pub mod file_tools;

use std::path::PathBuf;
use std::sync::Arc;

use clawgate_core::tools::ToolRegistry;

use crate::file_tools::{ListDirectoryTool, ReadFileTool, WriteFileTool};

/// Register every built-in tool with `registry`, sandboxed to
/// `workspace`.
pub fn register_all(registry: &ToolRegistry, workspace: PathBuf) {
    registry.register(Arc::new(ReadFileTool::new(workspace.clone())));
    registry.register(Arc::new(WriteFileTool::new(workspace.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(workspace)));
}
