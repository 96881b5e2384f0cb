//! Shell command execution node.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use super::{forward_input, string_prop_or_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};

const DEFAULT_EXEC_TIMEOUT_MS: f64 = 30_000.0;

/// Runs a command under a shell and captures output and duration. A
/// non-zero exit is reflected in `exitCode`/`success`, not reported as an
/// error.
pub struct ExecNode;

#[async_trait]
impl NodeExecutor for ExecNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let command = string_prop_or_input(node, &input, "command");
        if command.is_empty() {
            return Err(NodeError::Config("exec node: 'command' is required".to_string()));
        }

        let shell = node
            .prop_str("shell")
            .filter(|s| !s.is_empty())
            .unwrap_or(if cfg!(windows) { "cmd" } else { "/bin/sh" })
            .to_string();

        let mut timeout_ms = node.prop_f64("timeoutMs").unwrap_or(0.0);
        if timeout_ms <= 0.0 {
            timeout_ms = DEFAULT_EXEC_TIMEOUT_MS;
        }

        let mut cmd = if cfg!(windows) && (shell == "cmd" || shell == "cmd.exe") {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(&command);
            c
        } else if shell.contains("powershell") {
            let mut c = tokio::process::Command::new(&shell);
            c.arg("-Command").arg(&command);
            c
        } else {
            let mut c = tokio::process::Command::new(&shell);
            c.arg("-c").arg(&command);
            c
        };
        if let Some(dir) = node.prop_str("workingDir").filter(|d| !d.is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms as u64),
            cmd.output(),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let output_bytes = match result {
            Err(_) => return Err(NodeError::Timeout),
            Ok(Err(e)) => {
                return Err(NodeError::Execution(format!(
                    "exec node: failed to run command: {e}"
                )))
            }
            Ok(Ok(out)) => out,
        };

        let exit_code = output_bytes.status.code().unwrap_or(-1);
        let mut output = JsonMap::new();
        output.insert("stdout".to_string(), json!(String::from_utf8_lossy(&output_bytes.stdout)));
        output.insert("stderr".to_string(), json!(String::from_utf8_lossy(&output_bytes.stderr)));
        output.insert("exitCode".to_string(), json!(exit_code));
        output.insert("command".to_string(), json!(command));
        output.insert("shell".to_string(), json!(shell));
        output.insert("durationMs".to_string(), json!(duration_ms));
        output.insert("success".to_string(), json!(exit_code == 0));
        forward_input(&mut output, input);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let node = node_with_props("x", "exec", json!({"command": "echo hello"}));
        let out = ExecNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        assert_eq!(out.get("stdout").and_then(Value::as_str).unwrap().trim(), "hello");
        assert_eq!(out.get("exitCode"), Some(&json!(0)));
        assert_eq!(out.get("success"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_is_not_an_error() {
        let node = node_with_props("x", "exec", json!({"command": "exit 3"}));
        let out = ExecNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        assert_eq!(out.get("exitCode"), Some(&json!(3)));
        assert_eq!(out.get("success"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_exec_timeout() {
        let node = node_with_props("x", "exec", json!({"command": "sleep 5", "timeoutMs": 50}));
        let err = ExecNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::Timeout));
    }

    #[tokio::test]
    async fn test_exec_requires_command() {
        let node = node_with_props("x", "exec", json!({}));
        assert!(ExecNode.execute(&ctx().await, &node, JsonMap::new()).await.is_err());
    }
}
