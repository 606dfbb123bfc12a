//! In-memory TicketStore
//!
//! Backs tests and standalone daemon runs. Mirrors the constraints the
//! production relational store carries: protocol-id uniqueness per
//! organization, open-ticket ordering by recency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::store::{HealthUpdate, TicketStore};
use crate::types::error::{BridgeError, Result};
use crate::types::{
    Channel, MailboxIntegration, NewMessage, NewTicket, StoredMessage, SyncStatus, Ticket,
    TicketStatus,
};

#[derive(Default)]
struct Inner {
    integrations: Vec<MailboxIntegration>,
    tickets: HashMap<String, Ticket>,
    messages: HashMap<String, StoredMessage>,
}

/// Mutex-guarded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an integration record (settings-layer stand-in).
    pub fn add_integration(&self, integration: MailboxIntegration) {
        self.inner.lock().unwrap().integrations.push(integration);
    }

    /// Seed a ticket directly, bypassing the pipeline. Test setup only.
    pub fn add_ticket(&self, ticket: Ticket) {
        self.inner
            .lock()
            .unwrap()
            .tickets
            .insert(ticket.id.clone(), ticket);
    }

    /// Seed a message directly, bypassing the pipeline. Test setup only.
    pub fn add_message(&self, message: StoredMessage) {
        self.inner
            .lock()
            .unwrap()
            .messages
            .insert(message.id.clone(), message);
    }

    /// Out-of-band ERROR reset, the external admin action that un-parks a
    /// mailbox. Settings-layer stand-in.
    pub fn reset_integration(&self, integration_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(integration) = inner
            .integrations
            .iter_mut()
            .find(|i| i.id == integration_id)
        {
            integration.sync_status = SyncStatus::Active;
            integration.last_error = None;
        }
    }

    pub fn ticket(&self, ticket_id: &str) -> Option<Ticket> {
        self.inner.lock().unwrap().tickets.get(ticket_id).cloned()
    }

    pub fn integration(&self, integration_id: &str) -> Option<MailboxIntegration> {
        self.inner
            .lock()
            .unwrap()
            .integrations
            .iter()
            .find(|i| i.id == integration_id)
            .cloned()
    }

    pub fn all_tickets(&self) -> Vec<Ticket> {
        self.inner.lock().unwrap().tickets.values().cloned().collect()
    }

    pub fn messages_for_ticket(&self, ticket_id: &str) -> Vec<StoredMessage> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .values()
            .filter(|m| m.ticket_id == ticket_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn integrations_to_poll(&self) -> Result<Vec<MailboxIntegration>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .integrations
            .iter()
            .filter(|i| {
                i.channel == Channel::Email && i.enabled && i.sync_status != SyncStatus::Error
            })
            .cloned()
            .collect())
    }

    async fn open_ticket_customers(&self, organization_id: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut customers: Vec<String> = inner
            .tickets
            .values()
            .filter(|t| {
                t.organization_id == organization_id && t.status != TicketStatus::Closed
            })
            .map(|t| t.customer_email.clone())
            .collect();
        customers.sort();
        customers.dedup();
        Ok(customers)
    }

    async fn open_tickets_for_customer(
        &self,
        organization_id: &str,
        customer_email: &str,
    ) -> Result<Vec<Ticket>> {
        let inner = self.inner.lock().unwrap();
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| {
                t.organization_id == organization_id
                    && t.customer_email.eq_ignore_ascii_case(customer_email)
                    && t.status != TicketStatus::Closed
            })
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tickets)
    }

    async fn message_by_protocol_id(
        &self,
        organization_id: &str,
        protocol_id: &str,
    ) -> Result<Option<StoredMessage>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .values()
            .find(|m| {
                m.organization_id == organization_id
                    && m.protocol_message_id.as_deref() == Some(protocol_id)
            })
            .cloned())
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<Ticket> {
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4().to_string(),
            organization_id: new.organization_id,
            channel: new.channel,
            customer_email: new.customer_email,
            customer_name: new.customer_name,
            subject: new.subject,
            status: TicketStatus::Active,
            last_message_at: None,
            unread_count: 0,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock().unwrap();
        inner.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn create_message(&self, new: NewMessage) -> Result<StoredMessage> {
        let mut inner = self.inner.lock().unwrap();

        // Unique constraint on (organization, protocol id)
        if let Some(protocol_id) = new.protocol_message_id.as_deref() {
            let duplicate = inner.messages.values().any(|m| {
                m.organization_id == new.organization_id
                    && m.protocol_message_id.as_deref() == Some(protocol_id)
            });
            if duplicate {
                return Err(BridgeError::Store(format!(
                    "duplicate protocol message id '{}' in organization '{}'",
                    protocol_id, new.organization_id
                )));
            }
        }

        if !inner.tickets.contains_key(&new.ticket_id) {
            return Err(BridgeError::TicketNotFound(new.ticket_id));
        }

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            ticket_id: new.ticket_id,
            organization_id: new.organization_id,
            content: new.content,
            sender_name: new.sender_name,
            sender_email: new.sender_email,
            direction: new.direction,
            protocol_message_id: new.protocol_message_id,
            sent_at: new.sent_at,
        };

        inner.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn update_ticket_activity(
        &self,
        ticket_id: &str,
        last_message_at: DateTime<Utc>,
        unread_delta: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let ticket = inner
            .tickets
            .get_mut(ticket_id)
            .ok_or_else(|| BridgeError::TicketNotFound(ticket_id.to_string()))?;

        ticket.last_message_at = Some(last_message_at);
        ticket.unread_count = (ticket.unread_count as i64 + unread_delta).max(0) as u32;
        ticket.updated_at = Utc::now();
        Ok(())
    }

    async fn update_integration_health(
        &self,
        integration_id: &str,
        update: HealthUpdate,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let integration = inner
            .integrations
            .iter_mut()
            .find(|i| i.id == integration_id)
            .ok_or_else(|| BridgeError::IntegrationNotFound(integration_id.to_string()))?;

        integration.sync_status = update.status;
        if let Some(last_sync) = update.last_sync_at {
            integration.last_sync_at = Some(last_sync);
        }
        integration.last_error = update.error_message;
        Ok(())
    }
}
