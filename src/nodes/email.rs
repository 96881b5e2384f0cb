//! Email nodes: SMTP send via a shared email config, and the trigger-entry
//! passthrough for mailbox-driven flows.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{forward_input, string_prop_or_input, NodeExecutor};
use crate::engine::NodeContext;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeDef};
use crate::net::smtp::{send_mail, SmtpParams};

/// Sends an email through the SMTP account of a referenced email config.
/// Recipient list is to ∪ cc ∪ bcc; STARTTLS on non-SSL ports, direct TLS
/// on 465.
pub struct EmailNode;

#[async_trait]
impl NodeExecutor for EmailNode {
    async fn execute(
        &self,
        ctx: &NodeContext,
        node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let config_id = node
            .prop_i64("configId")
            .ok_or_else(|| NodeError::Config("email node: configId is required".to_string()))?;
        let cfg = ctx.resolve_config(config_id).await?;
        if cfg.config_type != "email" {
            return Err(NodeError::Config(format!(
                "email node: config {config_id} is not an email config (got {})",
                cfg.config_type
            )));
        }

        let smtp_host = cfg.get_str("host").filter(|h| !h.is_empty()).unwrap_or("smtp.gmail.com");
        let smtp_port = cfg.get_u16("port").unwrap_or(587);
        let username = cfg.get_str("username").unwrap_or("");
        let password = cfg.get_str("password").unwrap_or("");
        let from = cfg.get_str("from").filter(|f| !f.is_empty()).unwrap_or(username);
        let use_tls = cfg.get_bool("tls").unwrap_or(true);

        let to = string_prop_or_input(node, &input, "to");
        let cc = string_prop_or_input(node, &input, "cc");
        let bcc = string_prop_or_input(node, &input, "bcc");
        let mut subject = string_prop_or_input(node, &input, "subject");
        let body = string_prop_or_input(node, &input, "body");
        let content_type = node
            .prop_str("contentType")
            .filter(|ct| !ct.is_empty())
            .unwrap_or("text/plain");

        if to.is_empty() {
            return Err(NodeError::Config("email node: 'to' address is required".to_string()));
        }
        if subject.is_empty() {
            subject = "(no subject)".to_string();
        }

        let to_addrs = parse_addresses(&to);
        let cc_addrs = parse_addresses(&cc);
        let bcc_addrs = parse_addresses(&bcc);
        let mut recipients = to_addrs.clone();
        recipients.extend(cc_addrs.iter().cloned());
        recipients.extend(bcc_addrs.iter().cloned());

        let mut headers = String::new();
        headers.push_str(&format!("From: {from}\r\n"));
        headers.push_str(&format!("To: {}\r\n", to_addrs.join(", ")));
        if !cc_addrs.is_empty() {
            headers.push_str(&format!("Cc: {}\r\n", cc_addrs.join(", ")));
        }
        headers.push_str(&format!("Subject: {subject}\r\n"));
        headers.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
        headers.push_str("MIME-Version: 1.0\r\n");
        headers.push_str(&format!("Content-Type: {content_type}; charset=\"utf-8\"\r\n"));
        headers.push_str("\r\n");
        let message = headers + &body;

        send_mail(SmtpParams {
            host: smtp_host,
            port: smtp_port,
            use_tls,
            username,
            password,
            from,
            recipients: &recipients,
            message: &message,
        })
        .await
        .map_err(|e| NodeError::Execution(format!("email node: failed to send: {e}")))?;

        let mut output = JsonMap::new();
        output.insert("sent".to_string(), json!(true));
        output.insert("to".to_string(), json!(to));
        output.insert("cc".to_string(), json!(cc));
        output.insert("bcc".to_string(), json!(bcc));
        output.insert("subject".to_string(), json!(subject));
        output.insert("from".to_string(), json!(from));
        output.insert("smtpHost".to_string(), json!(smtp_host));
        output.insert("sentAt".to_string(), json!(Utc::now().to_rfc3339()));
        output.insert("recipients".to_string(), json!(recipients.len()));
        Ok(output)
    }
}

/// Trigger-entry passthrough for mailbox-driven flows; the poller injects
/// the email header fields.
pub struct EmailReceiveNode;

#[async_trait]
impl NodeExecutor for EmailReceiveNode {
    async fn execute(
        &self,
        _ctx: &NodeContext,
        _node: &NodeDef,
        input: JsonMap,
    ) -> Result<JsonMap, NodeError> {
        let mut output = JsonMap::new();
        output.insert("triggered".to_string(), json!(true));
        output.insert("triggeredAt".to_string(), json!(Utc::now().to_rfc3339()));
        forward_input(&mut output, input);

        if !output.contains_key("subject") {
            output.insert(
                "subject".to_string(),
                json!("(manual trigger — no email data)"),
            );
        }
        Ok(output)
    }
}

fn parse_addresses(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx, node_with_props, obj};
    use serde_json::json;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            parse_addresses("a@x.com, b@y.com ,, c@z.com"),
            vec!["a@x.com", "b@y.com", "c@z.com"]
        );
        assert!(parse_addresses("").is_empty());
    }

    #[tokio::test]
    async fn test_email_requires_config_id() {
        let node = node_with_props("e", "email", json!({"to": "a@x.com"}));
        let err = EmailNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("configId"));
    }

    #[tokio::test]
    async fn test_email_receive_injected_fields_win() {
        let node = node_with_props("e", "email_receive", json!({}));
        let out = EmailReceiveNode
            .execute(&ctx().await, &node, obj(json!({"subject": "hello", "from": "a@x.com"})))
            .await
            .unwrap();
        assert_eq!(out.get("subject"), Some(&json!("hello")));
        assert_eq!(out.get("triggered"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_email_receive_manual_run_placeholder_subject() {
        let node = node_with_props("e", "email_receive", json!({}));
        let out = EmailReceiveNode.execute(&ctx().await, &node, JsonMap::new()).await.unwrap();
        assert!(out.get("subject").is_some());
    }
}
