//! Mailbox access
//!
//! `connection` owns session establishment (TLS or plaintext), `client`
//! layers the bounded search/fetch/parse contract on top. The scheduler
//! talks to mailboxes only through the [`MailboxSource`] seam so tests can
//! script mailbox behavior without a server.

pub mod client;
pub mod connection;

pub use client::{MailboxClient, since_query};
pub use connection::{connect, ImapConnection};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::error::Result;
use crate::types::{ImapCredentials, RawEmail};

/// An open session against one mailbox.
#[async_trait]
pub trait MailboxSession: Send {
    /// All messages from `sender` in the account's inbox since `since`,
    /// parsed. Messages are fetched without being marked consumed; callers
    /// must tolerate re-seeing them on later polls.
    async fn search_by_sender_since(
        &mut self,
        sender: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawEmail>>;

    /// Release the session. Best-effort; always attempted on error paths.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Factory for mailbox sessions.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    async fn open(&self, credentials: &ImapCredentials) -> Result<Box<dyn MailboxSession>>;
}

/// The real thing: IMAP over TLS (or plaintext for test servers).
pub struct ImapMailboxSource;

#[async_trait]
impl MailboxSource for ImapMailboxSource {
    async fn open(&self, credentials: &ImapCredentials) -> Result<Box<dyn MailboxSession>> {
        let client = MailboxClient::connect(credentials).await?;
        Ok(Box::new(client))
    }
}
