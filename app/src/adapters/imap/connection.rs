use async_imap::types::Mailbox;
use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::DeskError;

// An IMAP session is generic over the stream type; ours is TLS over TCP.
pub type ImapSession = Session<TlsStream<TcpStream>>;

pub struct ImapConnection {
    pub session: ImapSession,
}

impl ImapConnection {
    /// SELECT (read-write) so flags can be stored afterwards
    pub async fn select_folder(&mut self, folder: &str) -> Result<Mailbox, DeskError> {
        self.session
            .select(folder)
            .await
            .map_err(|e| DeskError::Backend(format!("SELECT {} failed: {}", folder, e)))
    }

    /// Best-effort LOGOUT; the connection is dropped either way
    pub async fn logout(mut self) {
        if let Err(e) = self.session.logout().await {
            warn!("IMAP logout failed: {}", e);
        } else {
            debug!("IMAP session closed");
        }
    }
}

pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
) -> Result<ImapConnection, DeskError> {
    info!(host = %host, port = port, "Connecting to IMAP server");

    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| DeskError::Backend(format!("TCP connection failed: {}", e)))?;

    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tls
        .connect(host, tcp)
        .await
        .map_err(|e| DeskError::Backend(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);

    let session = client
        .login(username, password)
        .await
        .map_err(|(e, _)| DeskError::Backend(format!("Login failed: {}", e)))?;

    Ok(ImapConnection { session })
}
