//! Local filesystem nodes.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use super::{forward_input, string_prop_or_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};

/// Reads a file and outputs its contents plus basic metadata.
pub struct ReadFileNode;

#[async_trait]
impl NodeExecutor for ReadFileNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let path = string_prop_or_input(node, &input, "path");
        if path.is_empty() {
            return Err(NodeError::Config("read_file node: 'path' is required".to_string()));
        }
        let encoding = node.prop_str("encoding").filter(|e| !e.is_empty()).unwrap_or("utf-8");

        let data = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| NodeError::Execution(format!("read_file node: failed to read {path}: {e}")))?;

        let mut output = JsonMap::new();
        output.insert("size".to_string(), json!(data.len()));
        output.insert("content".to_string(), json!(data));
        output.insert("path".to_string(), json!(path));
        output.insert("encoding".to_string(), json!(encoding));
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if let Some(name) = Path::new(&path).file_name().and_then(|n| n.to_str()) {
                output.insert("filename".to_string(), json!(name));
            }
            output.insert("isDir".to_string(), json!(meta.is_dir()));
        }
        forward_input(&mut output, input);
        Ok(output)
    }
}

/// Writes content to a file, creating parent directories. Mode is
/// `overwrite` (default) or `append`.
pub struct WriteFileNode;

#[async_trait]
impl NodeExecutor for WriteFileNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let path = string_prop_or_input(node, &input, "path");
        if path.is_empty() {
            return Err(NodeError::Config("write_file node: 'path' is required".to_string()));
        }
        let content = string_prop_or_input(node, &input, "content");
        let mode = node.prop_str("mode").filter(|m| !m.is_empty()).unwrap_or("overwrite");

        if let Some(dir) = Path::new(&path).parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    NodeError::Execution(format!(
                        "write_file node: failed to create directory {}: {e}",
                        dir.display()
                    ))
                })?;
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true);
        match mode {
            "append" => options.append(true),
            _ => options.truncate(true),
        };
        let mut file = options
            .open(&path)
            .await
            .map_err(|e| NodeError::Execution(format!("write_file node: failed to open {path}: {e}")))?;

        use tokio::io::AsyncWriteExt;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| NodeError::Execution(format!("write_file node: failed to write: {e}")))?;
        file.flush().await.map_err(NodeError::Io)?;

        let mut output = JsonMap::new();
        output.insert("written".to_string(), json!(true));
        output.insert("bytes".to_string(), json!(content.len()));
        output.insert("path".to_string(), json!(path));
        output.insert("mode".to_string(), json!(mode));
        if let Some(name) = Path::new(&path).file_name().and_then(|n| n.to_str()) {
            output.insert("filename".to_string(), json!(name));
        }
        forward_input(&mut output, input);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props, obj};
    use serde_json::json;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        let path_str = path.to_str().unwrap();

        let write = node_with_props(
            "w",
            "write_file",
            json!({"path": path_str, "content": "line one"}),
        );
        let out = WriteFileNode.execute(&ctx().await, &write, JsonMap::new()).await.unwrap();
        assert_eq!(out.get("written"), Some(&json!(true)));
        assert_eq!(out.get("bytes"), Some(&json!(8)));

        let read = node_with_props("r", "read_file", json!({"path": path_str}));
        let out = ReadFileNode.execute(&ctx().await, &read, JsonMap::new()).await.unwrap();
        assert_eq!(out.get("content"), Some(&json!("line one")));
        assert_eq!(out.get("filename"), Some(&json!("out.txt")));
    }

    #[tokio::test]
    async fn test_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let path_str = path.to_str().unwrap();

        for chunk in ["a", "b"] {
            let node = node_with_props(
                "w",
                "write_file",
                json!({"path": path_str, "content": chunk, "mode": "append"}),
            );
            WriteFileNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_path_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        std::fs::write(&path, "data").unwrap();

        let node = node_with_props("r", "read_file", json!({}));
        let out = ReadFileNode
            .execute(&ctx().await, &node, obj(json!({"path": path.to_str().unwrap()})))
            .await
            .unwrap();
        assert_eq!(out.get("content"), Some(&json!("data")));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let node = node_with_props("r", "read_file", json!({"path": "/nonexistent/nope.txt"}));
        assert!(ReadFileNode.execute(&ctx().await, &node, JsonMap::new()).await.is_err());
    }
}
