//! Minimal IMAP client for the mailbox poller: connect over TLS, LOGIN,
//! SELECT, SEARCH UNSEEN, per-message header FETCH, optional \Seen STORE,
//! LOGOUT. Header parsing covers exactly the fields the email trigger
//! forwards into workflows.

use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::warn;

use super::tls;
use crate::error::NodeError;
use crate::model::{JsonMap, NodeConfig};

type ImapStream = BufStream<TlsStream<TcpStream>>;

/// Fetch unseen message headers from the account described by an email
/// config. Returns one map per message, ready to be a workflow input.
pub async fn fetch_new_emails(
    cfg: &NodeConfig,
    mailbox: &str,
    mark_seen: bool,
    max_fetch: u32,
) -> Result<Vec<JsonMap>, NodeError> {
    if cfg.config_type != "email" {
        return Err(NodeError::Config(format!(
            "config is not email type (got {})",
            cfg.config_type
        )));
    }

    let host = imap_host(cfg);
    if host.is_empty() {
        return Err(NodeError::Config("email config has no host".to_string()));
    }
    let port = cfg.get_u16("imapPort").unwrap_or(993);
    let username = cfg.get_str("username").unwrap_or("");
    let password = cfg.get_str("password").unwrap_or("");
    let mailbox = if mailbox.is_empty() { "INBOX" } else { mailbox };
    let max_fetch = if max_fetch == 0 { 10 } else { max_fetch };

    let mut session = BufStream::new(tls::connect(&host, port).await?);

    // Server greeting.
    read_line(&mut session).await?;

    command(
        &mut session,
        "A001",
        &format!(r#"LOGIN "{}" "{}""#, escape(username), escape(password)),
    )
    .await
    .map_err(|e| NodeError::Execution(format!("IMAP LOGIN failed: {e}")))?;

    command(&mut session, "A002", &format!("SELECT {mailbox}"))
        .await
        .map_err(|e| NodeError::Execution(format!("IMAP SELECT failed: {e}")))?;

    let search = command_untagged(&mut session, "A003", "SEARCH UNSEEN")
        .await
        .map_err(|e| NodeError::Execution(format!("IMAP SEARCH failed: {e}")))?;

    let mut uids = parse_search(&search);
    if uids.is_empty() {
        let _ = command(&mut session, "A999", "LOGOUT").await;
        return Ok(Vec::new());
    }
    // Newest messages win when the backlog exceeds the batch size.
    if uids.len() > max_fetch as usize {
        uids = uids.split_off(uids.len() - max_fetch as usize);
    }

    let mut results = Vec::new();
    for (i, uid) in uids.iter().enumerate() {
        let fetch = format!(
            "FETCH {uid} (FLAGS BODY.PEEK[HEADER.FIELDS (FROM TO CC SUBJECT DATE MESSAGE-ID)])"
        );
        let lines = match command_untagged(&mut session, &format!("F{i}"), &fetch).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(uid, error = %e, "IMAP FETCH failed");
                continue;
            }
        };

        let mut email = parse_headers(&lines, *uid);
        email.insert("fetchedAt".to_string(), json!(Utc::now().to_rfc3339()));
        results.push(email);

        if mark_seen {
            let _ = command(
                &mut session,
                &format!("S{i}"),
                &format!(r"STORE {uid} +FLAGS (\Seen)"),
            )
            .await;
        }
    }

    let _ = command(&mut session, "A999", "LOGOUT").await;
    Ok(results)
}

/// The IMAP host: explicit `imapHost`, else derived from the SMTP host
/// (`smtp.<x>` → `imap.<x>`).
fn imap_host(cfg: &NodeConfig) -> String {
    if let Some(h) = cfg.get_str("imapHost").filter(|h| !h.is_empty()) {
        return h.to_string();
    }
    let smtp_host = cfg.get_str("host").unwrap_or("");
    match smtp_host.strip_prefix("smtp.") {
        Some(rest) => format!("imap.{rest}"),
        None => smtp_host.to_string(),
    }
}

async fn read_line(session: &mut ImapStream) -> Result<String, NodeError> {
    let mut line = String::new();
    let n = session.read_line(&mut line).await.map_err(NodeError::Io)?;
    if n == 0 {
        return Err(NodeError::Execution("IMAP connection closed".to_string()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn send(session: &mut ImapStream, tag: &str, cmd: &str) -> Result<(), NodeError> {
    session
        .write_all(format!("{tag} {cmd}\r\n").as_bytes())
        .await
        .map_err(NodeError::Io)?;
    session.flush().await.map_err(NodeError::Io)
}

/// Run a command, discarding untagged responses, until the tagged status.
async fn command(session: &mut ImapStream, tag: &str, cmd: &str) -> Result<(), NodeError> {
    send(session, tag, cmd).await?;
    loop {
        let line = read_line(session).await?;
        if line.starts_with(&format!("{tag} OK")) {
            return Ok(());
        }
        if line.starts_with(&format!("{tag} NO")) || line.starts_with(&format!("{tag} BAD")) {
            return Err(NodeError::Execution(line));
        }
    }
}

/// Run a command and collect the untagged responses before the tagged OK.
async fn command_untagged(
    session: &mut ImapStream,
    tag: &str,
    cmd: &str,
) -> Result<Vec<String>, NodeError> {
    send(session, tag, cmd).await?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(session).await?;
        if line.starts_with(&format!("{tag} OK")) {
            return Ok(lines);
        }
        if line.starts_with(&format!("{tag} NO")) || line.starts_with(&format!("{tag} BAD")) {
            return Err(NodeError::Execution(line));
        }
        lines.push(line);
    }
}

fn parse_search(lines: &[String]) -> Vec<u32> {
    let mut uids = Vec::new();
    for line in lines {
        if line.contains("SEARCH") {
            for part in line.split_whitespace() {
                if let Ok(uid) = part.parse::<u32>() {
                    uids.push(uid);
                }
            }
        }
    }
    uids
}

fn parse_headers(lines: &[String], seq_num: u32) -> JsonMap {
    let full = lines.join("\n");
    let mut data = JsonMap::new();
    data.insert("seqNum".to_string(), json!(seq_num));

    for (field, key) in [
        ("From", "from"),
        ("To", "to"),
        ("Cc", "cc"),
        ("Subject", "subject"),
        ("Date", "date"),
        ("Message-ID", "messageId"),
    ] {
        if let Some(value) = extract_header(&full, field) {
            data.insert(key.to_string(), json!(value));
        }
    }
    data
}

fn extract_header(full: &str, name: &str) -> Option<String> {
    let lower = full.to_lowercase();
    let key = format!("{}:", name.to_lowercase());
    let idx = lower.find(&key)?;
    let start = idx + key.len();
    let rest = &full[start..];
    let end = rest.find(['\r', '\n', ')']).unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', r"\\").replace('"', "\\\"")
}
