//! TLS client setup over tokio, with the webpki root set.

use std::sync::Arc;

use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use crate::error::NodeError;

fn connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Wrap an established TCP stream in TLS for `host`.
pub async fn wrap(host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>, NodeError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| NodeError::Config(format!("bad TLS server name {host:?}: {e}")))?;
    connector()
        .connect(server_name, stream)
        .await
        .map_err(|e| NodeError::Execution(format!("TLS handshake with {host} failed: {e}")))
}

/// Dial `host:port` and negotiate TLS immediately (implicit TLS).
pub async fn connect(host: &str, port: u16) -> Result<TlsStream<TcpStream>, NodeError> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| NodeError::Execution(format!("connect {host}:{port}: {e}")))?;
    wrap(host, stream).await
}
