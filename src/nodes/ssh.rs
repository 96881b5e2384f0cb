//! SSH command node: opens a TCP+SSH session against a shared ssh config,
//! runs one command on a blocking thread, captures stdout/stderr/exit code.
//!
//! Host key verification is not performed; the node is an operator-scoped
//! tool against hosts the operator already controls.

use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use super::{forward_input, string_prop_or_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};

const DEFAULT_SSH_TIMEOUT_MS: f64 = 30_000.0;

pub struct SshNode;

struct SshJob {
    host: String,
    port: u16,
    user: String,
    auth: SshAuth,
    command: String,
    timeout: Duration,
}

enum SshAuth {
    Password(String),
    PrivateKey(String),
}

struct SshResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

#[async_trait]
impl NodeExecutor for SshNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let config_id = node
            .prop_i64("configId")
            .ok_or_else(|| NodeError::Config("ssh node: configId is required".to_string()))?;
        let cfg = ctx.resolve_config(config_id).await?;
        if cfg.config_type != "ssh" {
            return Err(NodeError::Config(format!(
                "ssh node: config {config_id} is not ssh type (got {})",
                cfg.config_type
            )));
        }

        let host = cfg.get_str("host").unwrap_or("").to_string();
        if host.is_empty() {
            return Err(NodeError::Config("ssh node: config host is required".to_string()));
        }
        let port = cfg.get_u16("port").unwrap_or(22);
        let user = cfg
            .get_str("username")
            .filter(|u| !u.is_empty())
            .or_else(|| cfg.get_str("user"))
            .unwrap_or("")
            .to_string();
        if user.is_empty() {
            return Err(NodeError::Config("ssh node: config username is required".to_string()));
        }

        let auth = match cfg.get_str("authMethod").filter(|m| !m.is_empty()).unwrap_or("password") {
            "password" => SshAuth::Password(cfg.get_str("password").unwrap_or("").to_string()),
            "privateKey" => {
                let pem = cfg.get_str("privateKey").unwrap_or("");
                if pem.is_empty() {
                    return Err(NodeError::Config(
                        "ssh node: config privateKey is required when authMethod is privateKey"
                            .to_string(),
                    ));
                }
                SshAuth::PrivateKey(pem.to_string())
            }
            other => {
                return Err(NodeError::Config(format!(
                    "ssh node: unsupported authMethod {other:?}"
                )))
            }
        };

        let command = string_prop_or_input(node, &input, "command");
        if command.is_empty() {
            return Err(NodeError::Config("ssh node: command is required".to_string()));
        }

        let mut timeout_ms = node.prop_f64("timeoutMs").unwrap_or(0.0);
        if timeout_ms <= 0.0 {
            timeout_ms = DEFAULT_SSH_TIMEOUT_MS;
        }
        let timeout = Duration::from_millis(timeout_ms as u64);

        let job = SshJob {
            host: host.clone(),
            port,
            user,
            auth,
            command: command.clone(),
            timeout,
        };

        let started = Instant::now();
        let run = tokio::task::spawn_blocking(move || run_blocking(job));
        let result = match tokio::time::timeout(timeout, run).await {
            Err(_) => return Err(NodeError::Timeout),
            Ok(joined) => joined.map_err(|e| NodeError::Execution(format!("ssh task: {e}")))??,
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut output = JsonMap::new();
        output.insert("stdout".to_string(), json!(result.stdout));
        output.insert("stderr".to_string(), json!(result.stderr));
        output.insert("exitCode".to_string(), json!(result.exit_code));
        output.insert("command".to_string(), json!(command));
        output.insert("host".to_string(), json!(host));
        output.insert("durationMs".to_string(), json!(duration_ms));
        output.insert("success".to_string(), json!(result.exit_code == 0));
        forward_input(&mut output, input);
        Ok(output)
    }
}

fn run_blocking(job: SshJob) -> Result<SshResult, NodeError> {
    let addr = format!("{}:{}", job.host, job.port);
    let tcp = TcpStream::connect(&addr)
        .map_err(|e| NodeError::Execution(format!("ssh node: dial {addr}: {e}")))?;

    let mut session = ssh2::Session::new()
        .map_err(|e| NodeError::Execution(format!("ssh node: session: {e}")))?;
    session.set_timeout(job.timeout.as_millis() as u32);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| NodeError::Execution(format!("ssh node: handshake: {e}")))?;

    match &job.auth {
        SshAuth::Password(password) => session
            .userauth_password(&job.user, password)
            .map_err(|e| NodeError::Execution(format!("ssh node: password auth: {e}")))?,
        SshAuth::PrivateKey(pem) => session
            .userauth_pubkey_memory(&job.user, None, pem, None)
            .map_err(|e| NodeError::Execution(format!("ssh node: key auth: {e}")))?,
    }

    let mut channel = session
        .channel_session()
        .map_err(|e| NodeError::Execution(format!("ssh node: new session: {e}")))?;
    channel
        .exec(&job.command)
        .map_err(|e| NodeError::Execution(format!("ssh node: exec: {e}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| NodeError::Execution(format!("ssh node: read stdout: {e}")))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| NodeError::Execution(format!("ssh node: read stderr: {e}")))?;

    channel
        .wait_close()
        .map_err(|e| NodeError::Execution(format!("ssh node: close: {e}")))?;
    let exit_code = channel
        .exit_status()
        .map_err(|e| NodeError::Execution(format!("ssh node: exit status: {e}")))?;

    Ok(SshResult {
        stdout,
        stderr,
        exit_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props};
    use crate::store::NodeConfigStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_config_id() {
        let node = node_with_props("s", "ssh", json!({"command": "uptime"}));
        assert!(SshNode.execute(&ctx().await, &node, JsonMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_wrong_config_type() {
        let ctx = ctx().await;
        let cfg = ctx
            .node_configs
            .create(
                serde_json::from_value(json!({
                    "id": 0, "name": "r", "type": "redis", "config": {"host": "h"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        let node = node_with_props("s", "ssh", json!({"configId": cfg.id, "command": "ls"}));
        let err = SshNode.execute(&ctx, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("not ssh type"));
    }

    #[tokio::test]
    async fn test_private_key_auth_requires_key_material() {
        let ctx = ctx().await;
        let cfg = ctx
            .node_configs
            .create(
                serde_json::from_value(json!({
                    "id": 0, "name": "s", "type": "ssh",
                    "config": {"host": "h", "username": "u", "authMethod": "privateKey"}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        let node = node_with_props("s", "ssh", json!({"configId": cfg.id, "command": "ls"}));
        let err = SshNode.execute(&ctx, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("privateKey"));
    }
}
