//! Ingestion Pipeline
//!
//! Takes one parsed email, finds or creates the ticket it belongs to, and
//! persists it idempotently. The protocol message id is the sole defense
//! against reprocessing: the same mailbox is re-searched every tick and the
//! protocol has no consume semantics, so duplicates on the wire are normal.

use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, info};

use crate::matcher::{match_conversation, MatchResult, ThreadIndex};
use crate::notify::{Notifier, TicketEvent};
use crate::store::TicketStore;
use crate::types::error::{BridgeError, Result};
use crate::types::{Channel, MessageDirection, NewMessage, NewTicket, RawEmail, Ticket};

/// Placeholder stored when an email has neither a text nor an HTML body.
pub const EMPTY_BODY_PLACEHOLDER: &str = "(no content)";

/// What happened to one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored as a new message on `ticket_id`.
    Ingested {
        ticket_id: String,
        message_id: String,
        created_ticket: bool,
    },
    /// Already stored in a previous poll; nothing done.
    DuplicateSkipped,
}

/// Matches and persists inbound emails for one organization at a time.
pub struct IngestionPipeline {
    store: Arc<dyn TicketStore>,
    notifier: Notifier,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn TicketStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    /// Full path for one email: dedup, match-or-create, ingest.
    pub async fn process_email(
        &self,
        organization_id: &str,
        email: &RawEmail,
    ) -> Result<IngestOutcome> {
        // Re-fetched mail is the common case across overlapping polls;
        // bail before doing any matching work.
        if self.already_stored(organization_id, email).await? {
            debug!(
                protocol_id = ?email.message_id,
                "Skipping already-ingested message"
            );
            return Ok(IngestOutcome::DuplicateSkipped);
        }

        let candidates = self
            .store
            .open_tickets_for_customer(organization_id, &email.from_address)
            .await?;

        let thread_index = self.build_thread_index(organization_id, email).await?;

        match match_conversation(email, &candidates, &thread_index) {
            MatchResult::ExistingTicket(ticket_id) => {
                let ticket = candidates
                    .into_iter()
                    .find(|t| t.id == ticket_id)
                    .ok_or_else(|| BridgeError::TicketNotFound(ticket_id))?;
                self.ingest(email, &ticket, false).await
            }
            MatchResult::NewTicket => {
                let subject = email.subject.trim();
                let ticket = self
                    .store
                    .create_ticket(NewTicket {
                        organization_id: organization_id.to_string(),
                        channel: Channel::Email,
                        customer_email: email.from_address.clone(),
                        customer_name: email.from_name.clone(),
                        subject: if subject.is_empty() {
                            "(no subject)".to_string()
                        } else {
                            subject.to_string()
                        },
                    })
                    .await
                    .map_err(|e| BridgeError::Ingestion(e.to_string()))?;

                info!(
                    ticket_id = %ticket.id,
                    customer = %email.from_address,
                    subject = %ticket.subject,
                    "Opened new ticket from inbound email"
                );

                self.notifier.emit(TicketEvent::TicketCreated {
                    ticket_id: ticket.id.clone(),
                    customer_email: ticket.customer_email.clone(),
                    subject: ticket.subject.clone(),
                });

                self.ingest(email, &ticket, true).await
            }
        }
    }

    /// Idempotent insert of one email into a known ticket.
    pub async fn ingest(
        &self,
        email: &RawEmail,
        ticket: &Ticket,
        created_ticket: bool,
    ) -> Result<IngestOutcome> {
        if self.already_stored(&ticket.organization_id, email).await? {
            return Ok(IngestOutcome::DuplicateSkipped);
        }

        let sent_at = email.date.unwrap_or_else(Utc::now);

        let message = self
            .store
            .create_message(NewMessage {
                ticket_id: ticket.id.clone(),
                organization_id: ticket.organization_id.clone(),
                content: select_content(email),
                sender_name: email.from_name.clone(),
                sender_email: email.from_address.clone(),
                direction: MessageDirection::Inbound,
                protocol_message_id: email.message_id.clone(),
                sent_at,
            })
            .await
            .map_err(|e| BridgeError::Ingestion(e.to_string()))?;

        self.store
            .update_ticket_activity(&ticket.id, sent_at, 1)
            .await
            .map_err(|e| BridgeError::Ingestion(e.to_string()))?;

        debug!(
            ticket_id = %ticket.id,
            message_id = %message.id,
            "Ingested inbound message"
        );

        // Independent side effect, never rolls back the insert.
        self.notifier.emit(TicketEvent::Reply {
            ticket_id: ticket.id.clone(),
            message_id: message.id.clone(),
            customer_email: email.from_address.clone(),
        });

        Ok(IngestOutcome::Ingested {
            ticket_id: ticket.id.clone(),
            message_id: message.id,
            created_ticket,
        })
    }

    async fn already_stored(&self, organization_id: &str, email: &RawEmail) -> Result<bool> {
        match email.message_id.as_deref() {
            Some(protocol_id) => Ok(self
                .store
                .message_by_protocol_id(organization_id, protocol_id)
                .await?
                .is_some()),
            // No protocol id means no idempotency key; ingest every time.
            None => Ok(false),
        }
    }

    /// Resolve this email's threading headers against stored messages.
    async fn build_thread_index(
        &self,
        organization_id: &str,
        email: &RawEmail,
    ) -> Result<ThreadIndex> {
        let mut index = ThreadIndex::new();
        for id in email.thread_ids() {
            if let Some(stored) = self
                .store
                .message_by_protocol_id(organization_id, id)
                .await?
            {
                index.insert(id.to_string(), stored.ticket_id);
            }
        }
        Ok(index)
    }
}

/// Pick the stored content for an email: plain text, then HTML converted to
/// text, then a literal placeholder. Never fails.
pub fn select_content(email: &RawEmail) -> String {
    if let Some(text) = email.text_body.as_deref() {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if let Some(html) = email.html_body.as_deref() {
        let converted = html2text::from_read(html.as_bytes(), 80)
            .unwrap_or_else(|_| html.to_string());
        let trimmed = converted.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    EMPTY_BODY_PLACEHOLDER.to_string()
}
