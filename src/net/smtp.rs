//! Minimal SMTP client for the `email` node.
//!
//! Dialogue: EHLO, then STARTTLS on non-SSL ports (direct TLS on 465),
//! AUTH LOGIN when credentials are present, MAIL FROM / RCPT TO / DATA.
//! Just enough of RFC 5321 to hand a composed message to a relay.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use super::tls;
use crate::error::NodeError;

pub struct SmtpParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub use_tls: bool,
    pub username: &'a str,
    pub password: &'a str,
    pub from: &'a str,
    pub recipients: &'a [String],
    /// Full RFC-style message: headers, blank line, body.
    pub message: &'a str,
}

/// Send one message. Port 465 gets implicit TLS; other ports start plain
/// and upgrade with STARTTLS when `use_tls` is set.
pub async fn send_mail(params: SmtpParams<'_>) -> Result<(), NodeError> {
    if params.port == 465 && params.use_tls {
        let stream = tls::connect(params.host, params.port).await?;
        let mut session = BufStream::new(stream);
        expect(&mut session, 220).await?;
        session_dialogue(&mut session, &params).await
    } else {
        let tcp = TcpStream::connect((params.host, params.port))
            .await
            .map_err(|e| NodeError::Execution(format!("connect {}:{}: {e}", params.host, params.port)))?;
        let mut plain = BufStream::new(tcp);
        expect(&mut plain, 220).await?;
        command(&mut plain, &format!("EHLO {}", ehlo_name()), 250).await?;

        if params.use_tls {
            command(&mut plain, "STARTTLS", 220).await?;
            let tcp = plain.into_inner();
            let stream = tls::wrap(params.host, tcp).await?;
            let mut session = BufStream::new(stream);
            // Greeting was consumed before the upgrade; re-EHLO happens in
            // the shared dialogue.
            session_dialogue(&mut session, &params).await
        } else {
            session_tail(&mut plain, &params).await
        }
    }
}

/// EHLO then the authenticated message hand-off (post-TLS path).
async fn session_dialogue<S>(session: &mut BufStream<S>, params: &SmtpParams<'_>) -> Result<(), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    command(session, &format!("EHLO {}", ehlo_name()), 250).await?;
    session_tail(session, params).await
}

async fn session_tail<S>(session: &mut BufStream<S>, params: &SmtpParams<'_>) -> Result<(), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if !params.username.is_empty() && !params.password.is_empty() {
        command(session, "AUTH LOGIN", 334).await?;
        command(session, &BASE64.encode(params.username), 334).await?;
        command(session, &BASE64.encode(params.password), 235).await?;
    }

    command(session, &format!("MAIL FROM:<{}>", params.from), 250).await?;
    for rcpt in params.recipients {
        command(session, &format!("RCPT TO:<{rcpt}>"), 250).await?;
    }
    command(session, "DATA", 354).await?;

    // Dot-stuff lines starting with '.' (RFC 5321 §4.5.2).
    for line in params.message.split("\r\n") {
        if line.starts_with('.') {
            session.write_all(b".").await.map_err(NodeError::Io)?;
        }
        session.write_all(line.as_bytes()).await.map_err(NodeError::Io)?;
        session.write_all(b"\r\n").await.map_err(NodeError::Io)?;
    }
    session.write_all(b".\r\n").await.map_err(NodeError::Io)?;
    session.flush().await.map_err(NodeError::Io)?;
    expect(session, 250).await?;

    let _ = write_line(session, "QUIT").await;
    Ok(())
}

fn ehlo_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

async fn write_line<S>(session: &mut BufStream<S>, line: &str) -> Result<(), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    session.write_all(line.as_bytes()).await.map_err(NodeError::Io)?;
    session.write_all(b"\r\n").await.map_err(NodeError::Io)?;
    session.flush().await.map_err(NodeError::Io)?;
    Ok(())
}

async fn command<S>(session: &mut BufStream<S>, line: &str, expected: u16) -> Result<(), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_line(session, line).await?;
    expect(session, expected).await
}

/// Read one (possibly multi-line) SMTP reply and check its status code.
async fn expect<S>(session: &mut BufStream<S>, expected: u16) -> Result<(), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let mut line = String::new();
        let n = session.read_line(&mut line).await.map_err(NodeError::Io)?;
        if n == 0 {
            return Err(NodeError::Execution("SMTP connection closed".to_string()));
        }
        let line = line.trim_end();
        if line.len() < 4 {
            return Err(NodeError::Execution(format!("malformed SMTP reply: {line:?}")));
        }
        let code: u16 = line[..3]
            .parse()
            .map_err(|_| NodeError::Execution(format!("malformed SMTP reply: {line:?}")))?;
        // "250-..." marks a continuation line; "250 ..." ends the reply.
        if line.as_bytes()[3] == b'-' {
            continue;
        }
        if code != expected {
            return Err(NodeError::Execution(format!("SMTP: expected {expected}, got {line:?}")));
        }
        return Ok(());
    }
}
