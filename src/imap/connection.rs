use async_imap::types::Fetch;
use async_imap::Session;
use async_native_tls::TlsStream;
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::types::error::{BridgeError, Result};
use crate::types::ImapCredentials;

/// An authenticated IMAP session, generic over transport security.
///
/// The session type is generic over its stream, so TLS and plaintext
/// sessions are different types; this enum erases that difference for the
/// client layer. Plaintext exists for local test servers only.
pub enum ImapConnection {
    Tls(Session<TlsStream<TcpStream>>),
    Plain(Session<TcpStream>),
}

impl ImapConnection {
    /// SELECT the inbox. Read-write select is fine: the engine never stores
    /// flags, so nothing is modified server-side.
    pub async fn select_inbox(&mut self) -> Result<()> {
        let mailbox = match self {
            ImapConnection::Tls(session) => session.select("INBOX").await,
            ImapConnection::Plain(session) => session.select("INBOX").await,
        }
        .map_err(|e| BridgeError::Search(format!("SELECT INBOX failed: {}", e)))?;

        debug!(exists = mailbox.exists, "Selected INBOX");
        Ok(())
    }

    /// Run a UID SEARCH, returning matching UIDs in ascending order.
    pub async fn uid_search(&mut self, query: &str) -> Result<Vec<u32>> {
        let uid_set = match self {
            ImapConnection::Tls(session) => session.uid_search(query).await,
            ImapConnection::Plain(session) => session.uid_search(query).await,
        }
        .map_err(|e| BridgeError::Search(format!("SEARCH failed: {}", e)))?;

        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// UID FETCH, collecting the response stream.
    pub async fn uid_fetch(&mut self, uid_list: &str, query: &str) -> Result<Vec<Fetch>> {
        match self {
            ImapConnection::Tls(session) => {
                session
                    .uid_fetch(uid_list, query)
                    .await
                    .map_err(|e| BridgeError::Search(format!("FETCH failed: {}", e)))?
                    .try_collect()
                    .await
            }
            ImapConnection::Plain(session) => {
                session
                    .uid_fetch(uid_list, query)
                    .await
                    .map_err(|e| BridgeError::Search(format!("FETCH failed: {}", e)))?
                    .try_collect()
                    .await
            }
        }
        .map_err(|e| BridgeError::Search(format!("FETCH collect failed: {}", e)))
    }

    /// LOGOUT and drop the session.
    pub async fn logout(&mut self) -> Result<()> {
        match self {
            ImapConnection::Tls(session) => session.logout().await,
            ImapConnection::Plain(session) => session.logout().await,
        }
        .map_err(|e| BridgeError::Connection(format!("LOGOUT failed: {}", e)))
    }
}

/// Establish an authenticated session for one mailbox.
///
/// Bad host, refused connection, TLS failure and rejected credentials all
/// surface as `Connection` errors, which park the integration in ERROR
/// state at the scheduler boundary.
pub async fn connect(credentials: &ImapCredentials) -> Result<ImapConnection> {
    info!(
        host = %credentials.host,
        port = credentials.port,
        secure = credentials.secure,
        "Connecting to IMAP server"
    );

    let tcp = TcpStream::connect((credentials.host.as_str(), credentials.port))
        .await
        .map_err(|e| BridgeError::Connection(format!("TCP connection failed: {}", e)))?;

    if credentials.secure {
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(&credentials.host, tcp)
            .await
            .map_err(|e| BridgeError::Connection(format!("TLS handshake failed: {}", e)))?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(&credentials.username, &credentials.password)
            .await
            .map_err(|(e, _)| BridgeError::Connection(format!("Login failed: {}", e)))?;

        Ok(ImapConnection::Tls(session))
    } else {
        let client = async_imap::Client::new(tcp);
        let session = client
            .login(&credentials.username, &credentials.password)
            .await
            .map_err(|(e, _)| BridgeError::Connection(format!("Login failed: {}", e)))?;

        Ok(ImapConnection::Plain(session))
    }
}
