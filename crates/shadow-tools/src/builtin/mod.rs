// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod delete_file;
mod file_search;
mod grep;
mod list_dir;
mod read_file;
mod run_command;
mod search_replace;
mod semantic_search;
mod todo_write;
mod web_search;
mod write_file;

use std::sync::Arc;

pub use delete_file::DeleteFileTool;
pub use file_search::FileSearchTool;
pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use search_replace::SearchReplaceTool;
pub use semantic_search::SemanticSearchTool;
pub use todo_write::{TodoSink, TodoWriteTool};
pub use web_search::WebSearchTool;
pub use write_file::WriteFileTool;

use crate::{Tool, ToolEventSender, ToolRegistry, WorkspaceExecutor};

/// Build the full native tool registry for one stream.
///
/// The event sender and todo sink are injected here rather than reached via
/// globals; the kernel owns both ends.
pub fn builtin_registry(
    executor: Arc<dyn WorkspaceExecutor>,
    events: ToolEventSender,
    todos: Arc<dyn TodoSink>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(ReadFileTool::new(executor.clone())),
        Arc::new(WriteFileTool::new(executor.clone())),
        Arc::new(SearchReplaceTool::new(executor.clone())),
        Arc::new(ListDirTool::new(executor.clone())),
        Arc::new(GrepTool::new(executor.clone())),
        Arc::new(FileSearchTool::new(executor.clone())),
        Arc::new(DeleteFileTool::new(executor.clone())),
        Arc::new(RunCommandTool::new(executor.clone(), events.clone())),
        Arc::new(WebSearchTool::new(executor.clone())),
        Arc::new(SemanticSearchTool::new(executor)),
        Arc::new(TodoWriteTool::new(todos, events)),
    ];
    for tool in tools {
        registry.register(tool);
    }
    registry
}
