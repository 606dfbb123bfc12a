//! mailbridge — email-to-ticket reconciliation engine
//!
//! Periodically scans shared support mailboxes over IMAP and files every
//! fetched message into the right support conversation: header threading
//! first, normalized-subject matching second, new ticket as the fallback.
//! Repeated scans of the same mailbox are expected; the protocol message id
//! is the idempotency key that keeps messages from being ingested twice.
//!
//! Persistence is a collaborator, not a component: the engine talks to
//! tickets and messages only through [`store::TicketStore`].

pub mod config;
pub mod health;
pub mod imap;
pub mod ingest;
pub mod matcher;
pub mod notify;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{AppConfig, PollerConfig};
pub use health::HealthTracker;
pub use imap::{ImapMailboxSource, MailboxSession, MailboxSource};
pub use ingest::{IngestOutcome, IngestionPipeline};
pub use matcher::{match_conversation, normalize_subject, MatchResult};
pub use notify::{Notifier, TicketEvent};
pub use scheduler::{PollScheduler, SchedulerStatus, TickSummary};
pub use store::{HealthUpdate, MemoryStore, TicketStore};
pub use types::error::{BridgeError, Result};
