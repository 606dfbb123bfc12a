//! Persistence collaborator seam
//!
//! The relational store (tickets, messages, integration records) is owned by
//! the surrounding application; the engine only sees this trait. The
//! in-memory implementation backs tests and standalone daemon runs.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::error::Result;
use crate::types::{
    MailboxIntegration, NewMessage, NewTicket, StoredMessage, SyncStatus, Ticket,
};

/// Health fields written after every poll attempt.
#[derive(Debug, Clone)]
pub struct HealthUpdate {
    pub status: SyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Ticket/message persistence as seen by the engine.
///
/// Implementations must return open tickets ordered most-recently-updated
/// first and enforce protocol-id uniqueness per organization on
/// `create_message`.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Integrations eligible for the next poll tick: EMAIL channel, enabled,
    /// not parked in ERROR state.
    async fn integrations_to_poll(&self) -> Result<Vec<MailboxIntegration>>;

    /// Distinct customer addresses with non-CLOSED tickets in this
    /// organization. Bounds mailbox search cost to open conversations.
    async fn open_ticket_customers(&self, organization_id: &str) -> Result<Vec<String>>;

    /// Non-CLOSED tickets for one customer, most-recently-updated first.
    async fn open_tickets_for_customer(
        &self,
        organization_id: &str,
        customer_email: &str,
    ) -> Result<Vec<Ticket>>;

    /// Look up a stored message by its protocol message id.
    async fn message_by_protocol_id(
        &self,
        organization_id: &str,
        protocol_id: &str,
    ) -> Result<Option<StoredMessage>>;

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket>;

    /// Insert one message. Fails when the protocol id already exists within
    /// the organization.
    async fn create_message(&self, new: NewMessage) -> Result<StoredMessage>;

    /// Bump ticket activity: last-message time, unread counter, updated-at.
    async fn update_ticket_activity(
        &self,
        ticket_id: &str,
        last_message_at: DateTime<Utc>,
        unread_delta: i64,
    ) -> Result<()>;

    async fn update_integration_health(
        &self,
        integration_id: &str,
        update: HealthUpdate,
    ) -> Result<()>;
}
