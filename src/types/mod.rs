pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel a ticket lives on. Only EMAIL is driven by this engine; the
/// variant exists so the store schema can be shared with other channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Email,
    Web,
}

/// Health of one mailbox integration, persisted after every poll attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Active,
    Error,
}

/// Ticket lifecycle status. Closed tickets are never matched or reopened
/// by inbound mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Active,
    Resolved,
    Closed,
}

/// Direction of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

/// Connection details for one shared support mailbox.
///
/// Read from the settings layer, never mutated here. `secure` selects
/// implicit TLS (the default, port 993); plaintext is only for test servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapCredentials {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub secure: bool,
    pub username: String,
    pub password: String,
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

/// One organization's configured support mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxIntegration {
    pub id: String,
    pub organization_id: String,
    pub channel: Channel,
    pub credentials: ImapCredentials,
    pub enabled: bool,
    pub sync_status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One customer support conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub organization_id: String,
    pub channel: Channel,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub subject: String,
    pub status: TicketStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating a new ticket; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub organization_id: String,
    pub channel: Channel,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub subject: String,
}

/// One stored unit of conversation content.
///
/// `protocol_message_id` is the mail system's globally-unique id. When
/// present it is unique within an organization and is the sole idempotency
/// key against reprocessing the same email on a later poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub ticket_id: String,
    pub organization_id: String,
    pub content: String,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub direction: MessageDirection,
    pub protocol_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Fields for creating a new message; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub ticket_id: String,
    pub organization_id: String,
    pub content: String,
    pub sender_name: Option<String>,
    pub sender_email: String,
    pub direction: MessageDirection,
    pub protocol_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Parsed representation of one fetched email.
///
/// Ephemeral: lives only for the duration of one poll cycle, never persisted
/// as-is.
#[derive(Debug, Clone, Default)]
pub struct RawEmail {
    pub message_id: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub subject: String,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub date: Option<DateTime<Utc>>,
}

impl RawEmail {
    /// All protocol ids this email claims to be a reply to, `In-Reply-To`
    /// first. Empty when the email carries no threading headers.
    pub fn thread_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        if let Some(irt) = self.in_reply_to.as_deref() {
            ids.push(irt);
        }
        for r in &self.references {
            if !ids.contains(&r.as_str()) {
                ids.push(r);
            }
        }
        ids
    }

    /// Whether the email carries reply-threading headers at all.
    pub fn has_thread_headers(&self) -> bool {
        self.in_reply_to.is_some() || !self.references.is_empty()
    }
}
