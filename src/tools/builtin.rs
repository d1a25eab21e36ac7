//! Builtin tools: workspace file access and a risk-gated shell.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use super::risk::assess_command;
use super::traits::{FnHandler, RiskLevel, ToolAnnotations, ToolDefinition, ToolEntry};

/// Resolve `path` inside `root`, rejecting traversal outside it.
fn resolve_in_workspace(root: &Path, path: &str) -> std::result::Result<PathBuf, String> {
    if path.contains('\0') {
        return Err("path contains a null byte".to_string());
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err("path traversal ('..') is not allowed".to_string());
    }
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        root.join(path)
    };
    if !joined.starts_with(root) {
        return Err(format!("path is outside the workspace root '{}'", root.display()));
    }
    Ok(joined)
}

pub fn read_file_tool(workspace_root: PathBuf) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "read_file",
            "Read a UTF-8 text file from the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path, relative to the workspace root"}
                },
                "required": ["path"]
            }),
        )
        .with_annotations(ToolAnnotations::read_only()),
        FnHandler::new(move |args| {
            let root = workspace_root.clone();
            async move {
                let path = args["path"].as_str().ok_or("'path' must be a string")?;
                let resolved = resolve_in_workspace(&root, path)?;
                tokio::fs::read_to_string(&resolved)
                    .await
                    .map(Value::String)
                    .map_err(|e| format!("failed to read {path}: {e}"))
            }
        }),
    )
}

pub fn write_file_tool(workspace_root: PathBuf) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "write_file",
            "Write a UTF-8 text file inside the workspace, creating parent directories.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        )
        .with_annotations(ToolAnnotations {
            risk_level: RiskLevel::Yellow,
            read_only: false,
            destructive: false,
            idempotent: true,
        }),
        FnHandler::new(move |args| {
            let root = workspace_root.clone();
            async move {
                let path = args["path"].as_str().ok_or("'path' must be a string")?;
                let content = args["content"].as_str().ok_or("'content' must be a string")?;
                let resolved = resolve_in_workspace(&root, path)?;
                if let Some(parent) = resolved.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
                }
                tokio::fs::write(&resolved, content)
                    .await
                    .map_err(|e| format!("failed to write {path}: {e}"))?;
                Ok(json!({"written": path, "bytes": content.len()}))
            }
        }),
    )
}

pub fn list_dir_tool(workspace_root: PathBuf) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "list_dir",
            "List the entries of a workspace directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Directory path; defaults to the workspace root"}
                }
            }),
        )
        .with_annotations(ToolAnnotations::read_only()),
        FnHandler::new(move |args| {
            let root = workspace_root.clone();
            async move {
                let path = args["path"].as_str().unwrap_or(".");
                let resolved = resolve_in_workspace(&root, path)?;
                let mut dir = tokio::fs::read_dir(&resolved)
                    .await
                    .map_err(|e| format!("failed to list {path}: {e}"))?;
                let mut names = Vec::new();
                loop {
                    match dir.next_entry().await {
                        Ok(Some(entry)) => {
                            names.push(entry.file_name().to_string_lossy().to_string());
                        }
                        Ok(None) => break,
                        Err(e) => return Err(format!("failed to read entry in {path}: {e}")),
                    }
                }
                names.sort();
                Ok(json!(names))
            }
        }),
    )
}

/// Shell tool gated by the risk classifier. Critical commands are blocked
/// unconditionally; red commands are refused unless `yolo_mode` was
/// configured; yellow commands run but are logged.
pub fn bash_tool(workspace_root: PathBuf, yolo_mode: bool) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "bash",
            "Run a shell command in the workspace and return stdout, stderr, and the exit code.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"}
                },
                "required": ["command"]
            }),
        )
        .with_annotations(ToolAnnotations {
            risk_level: RiskLevel::Red,
            read_only: false,
            destructive: true,
            idempotent: false,
        }),
        FnHandler::new(move |args| {
            let cwd = workspace_root.clone();
            async move {
                let command = args["command"].as_str().ok_or("'command' must be a string")?;
                let assessment = assess_command(command);
                if assessment.blocked {
                    return Err(format!(
                        "blocked: {}",
                        assessment.reason.unwrap_or_else(|| "critical command".to_string())
                    ));
                }
                match assessment.level {
                    RiskLevel::Red if !yolo_mode => {
                        return Err(format!(
                            "refused: '{command}' is classified red; enable yoloMode to run it"
                        ));
                    }
                    RiskLevel::Yellow => {
                        tracing::info!(command, "running yellow-risk shell command");
                    }
                    _ => {}
                }

                let output = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .current_dir(&cwd)
                    .output()
                    .await
                    .map_err(|e| format!("failed to spawn shell: {e}"))?;

                Ok(json!({
                    "stdout": String::from_utf8_lossy(&output.stdout),
                    "stderr": String::from_utf8_lossy(&output.stderr),
                    "exitCode": output.status.code(),
                }))
            }
        }),
    )
}

/// Register the full builtin set.
pub fn register_builtins(
    registry: &super::registry::ToolRegistry,
    workspace_root: &Path,
    yolo_mode: bool,
) -> crate::error::Result<()> {
    registry.register(read_file_tool(workspace_root.to_path_buf()))?;
    registry.register(write_file_tool(workspace_root.to_path_buf()))?;
    registry.register(list_dir_tool(workspace_root.to_path_buf()))?;
    registry.register(bash_tool(workspace_root.to_path_buf(), yolo_mode))?;
    Ok(())
}

/// Builtin group aliases for the policy engine.
pub fn builtin_groups() -> std::collections::HashMap<String, Vec<String>> {
    let mut groups = std::collections::HashMap::new();
    groups.insert("group:fs_read".to_string(), vec!["read_file".to_string(), "list_dir".to_string()]);
    groups.insert(
        "group:fs".to_string(),
        vec!["read_file".to_string(), "list_dir".to_string(), "write_file".to_string()],
    );
    groups.insert("group:shell".to_string(), vec!["bash".to_string()]);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn call(entry: &ToolEntry, args: Value) -> std::result::Result<Value, String> {
        entry.handler.call(args).await
    }

    #[tokio::test]
    async fn read_file_round_trip() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "test file content").unwrap();
        let tool = read_file_tool(dir.path().to_path_buf());

        let out = call(&tool, json!({"path": "hello.txt"})).await.unwrap();
        assert_eq!(out, json!("test file content"));
    }

    #[tokio::test]
    async fn read_file_missing_is_error() {
        let dir = TempDir::new().unwrap();
        let tool = read_file_tool(dir.path().to_path_buf());
        let err = call(&tool, json!({"path": "absent.txt"})).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let tool = read_file_tool(dir.path().to_path_buf());
        let err = call(&tool, json!({"path": "../../etc/passwd"})).await;
        assert!(err.unwrap_err().contains("traversal"));
    }

    #[tokio::test]
    async fn write_then_list() {
        let dir = TempDir::new().unwrap();
        let write = write_file_tool(dir.path().to_path_buf());
        let list = list_dir_tool(dir.path().to_path_buf());

        call(&write, json!({"path": "notes/a.txt", "content": "x"})).await.unwrap();
        let entries = call(&list, json!({"path": "notes"})).await.unwrap();
        assert_eq!(entries, json!(["a.txt"]));
    }

    #[tokio::test]
    async fn bash_runs_green_commands() {
        let dir = TempDir::new().unwrap();
        let tool = bash_tool(dir.path().to_path_buf(), false);
        let out = call(&tool, json!({"command": "echo hello"})).await.unwrap();
        assert_eq!(out["stdout"], "hello\n");
        assert_eq!(out["exitCode"], 0);
    }

    #[tokio::test]
    async fn bash_blocks_critical() {
        let dir = TempDir::new().unwrap();
        let tool = bash_tool(dir.path().to_path_buf(), true);
        let err = call(&tool, json!({"command": "rm -rf /"})).await.unwrap_err();
        assert!(err.starts_with("blocked:"));
    }

    #[tokio::test]
    async fn bash_refuses_red_without_yolo() {
        let dir = TempDir::new().unwrap();
        let tool = bash_tool(dir.path().to_path_buf(), false);
        let err = call(&tool, json!({"command": "curl https://example.com"})).await.unwrap_err();
        assert!(err.starts_with("refused:"));

        let yolo = bash_tool(dir.path().to_path_buf(), true);
        // With yolo the same command is admitted (it may still fail to run).
        let result = call(&yolo, json!({"command": "curl --version"})).await;
        assert!(!matches!(result, Err(ref e) if e.starts_with("refused:")));
    }

    #[tokio::test]
    async fn register_builtins_installs_four_tools() {
        let dir = TempDir::new().unwrap();
        let registry = crate::tools::ToolRegistry::new();
        register_builtins(&registry, dir.path(), false).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("bash").is_some());
    }
}
