//! Reply notification events
//!
//! Fire-and-forget fan-out to whatever collaborator cares (webhooks, UI
//! push, digest emails — all external). A dropped receiver must never fail
//! or roll back ingestion, so send errors are logged and swallowed.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Event emitted by the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TicketEvent {
    /// A new inbound message landed on a ticket.
    Reply {
        ticket_id: String,
        message_id: String,
        customer_email: String,
    },
    /// A brand-new ticket was opened from inbound mail.
    TicketCreated {
        ticket_id: String,
        customer_email: String,
        subject: String,
    },
}

/// Cloneable sender handle for ticket events.
#[derive(Clone)]
pub struct Notifier {
    tx: flume::Sender<TicketEvent>,
}

impl Notifier {
    /// Create a notifier plus the receiving end for subscribers.
    pub fn new() -> (Self, flume::Receiver<TicketEvent>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    /// Best-effort emit. Never fails the caller.
    pub fn emit(&self, event: TicketEvent) {
        if let Err(e) = self.tx.send(event) {
            warn!("Dropping ticket event, no listeners: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_delivers_to_receiver() {
        let (notifier, rx) = Notifier::new();
        notifier.emit(TicketEvent::Reply {
            ticket_id: "t-1".to_string(),
            message_id: "m-1".to_string(),
            customer_email: "a@x.com".to_string(),
        });

        match rx.try_recv().unwrap() {
            TicketEvent::Reply { ticket_id, .. } => assert_eq!(ticket_id, "t-1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_receiver_does_not_panic() {
        let (notifier, rx) = Notifier::new();
        drop(rx);
        notifier.emit(TicketEvent::TicketCreated {
            ticket_id: "t-1".to_string(),
            customer_email: "a@x.com".to_string(),
            subject: "hello".to_string(),
        });
    }
}
