//! End-to-end scenarios for the poll/match/ingest path, driven through the
//! scheduler with a scripted mailbox in place of a live IMAP server.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mailbridge::types::{
    Channel, ImapCredentials, MailboxIntegration, RawEmail, StoredMessage, SyncStatus, Ticket,
    TicketStatus,
};
use mailbridge::types::MessageDirection;
use mailbridge::{
    BridgeError, MailboxSession, MailboxSource, MemoryStore, Notifier, PollScheduler,
    PollerConfig, Result, TicketEvent,
};

/// Mailbox contents shared by every session this source opens, so tests can
/// add mail between ticks.
#[derive(Default)]
struct ScriptedMailbox {
    by_sender: Mutex<HashMap<String, Vec<RawEmail>>>,
    fail_connect: Mutex<bool>,
}

impl ScriptedMailbox {
    fn deliver(&self, email: RawEmail) {
        self.by_sender
            .lock()
            .unwrap()
            .entry(email.from_address.clone())
            .or_default()
            .push(email);
    }

    fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().unwrap() = fail;
    }
}

struct ScriptedSession {
    by_sender: HashMap<String, Vec<RawEmail>>,
}

#[async_trait]
impl MailboxSession for ScriptedSession {
    async fn search_by_sender_since(
        &mut self,
        sender: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawEmail>> {
        // Mirror the server-side date bound with day granularity.
        Ok(self
            .by_sender
            .get(sender)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|e| match e.date {
                Some(date) => date.date_naive() >= since.date_naive(),
                None => true,
            })
            .collect())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MailboxSource for ScriptedMailbox {
    async fn open(&self, credentials: &ImapCredentials) -> Result<Box<dyn MailboxSession>> {
        if *self.fail_connect.lock().unwrap() {
            return Err(BridgeError::Connection(format!(
                "refused: {}",
                credentials.host
            )));
        }
        Ok(Box::new(ScriptedSession {
            by_sender: self.by_sender.lock().unwrap().clone(),
        }))
    }
}

fn integration(org: &str) -> MailboxIntegration {
    MailboxIntegration {
        id: format!("int-{}", org),
        organization_id: org.to_string(),
        channel: Channel::Email,
        credentials: ImapCredentials {
            host: "imap.example.com".to_string(),
            port: 993,
            secure: true,
            username: "support@example.com".to_string(),
            password: "hunter2".to_string(),
        },
        enabled: true,
        sync_status: SyncStatus::Active,
        last_sync_at: None,
        last_error: None,
    }
}

fn active_ticket(org: &str, id: &str, customer: &str, subject: &str, age: Duration) -> Ticket {
    let now = Utc::now();
    Ticket {
        id: id.to_string(),
        organization_id: org.to_string(),
        channel: Channel::Email,
        customer_email: customer.to_string(),
        customer_name: None,
        subject: subject.to_string(),
        status: TicketStatus::Active,
        last_message_at: Some(now - age),
        unread_count: 0,
        created_at: now - age,
        updated_at: now - age,
    }
}

fn email(from: &str, subject: &str, protocol_id: &str, age: Duration) -> RawEmail {
    RawEmail {
        message_id: Some(protocol_id.to_string()),
        from_address: from.to_string(),
        from_name: Some("Customer".to_string()),
        subject: subject.to_string(),
        text_body: Some("please advise".to_string()),
        date: Some(Utc::now() - age),
        ..Default::default()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    mailbox: Arc<ScriptedMailbox>,
    scheduler: PollScheduler,
    events: flume::Receiver<TicketEvent>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.add_integration(integration("org-1"));

    let mailbox = Arc::new(ScriptedMailbox::default());
    let (notifier, events) = Notifier::new();
    let scheduler = PollScheduler::new(
        store.clone(),
        mailbox.clone(),
        notifier,
        PollerConfig::default(),
    );

    Harness {
        store,
        mailbox,
        scheduler,
        events,
    }
}

#[tokio::test]
async fn subject_reply_lands_on_existing_ticket() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-billing",
        "a@x.com",
        "Billing issue",
        Duration::days(1),
    ));

    let reply = email("a@x.com", "Re: Billing issue", "m1@mail", Duration::hours(1));
    let reply_date = reply.date.unwrap();
    h.mailbox.deliver(reply);

    let summary = h.scheduler.run_tick().await;
    assert_eq!(summary.emails_ingested, 1);
    assert_eq!(summary.mailboxes_failed, 0);

    // Matched by subject normalization, not a new ticket.
    assert_eq!(h.store.all_tickets().len(), 1);

    let ticket = h.store.ticket("t-billing").unwrap();
    assert_eq!(ticket.unread_count, 1);
    assert_eq!(ticket.last_message_at, Some(reply_date));

    let messages = h.store.messages_for_ticket("t-billing");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].direction, MessageDirection::Inbound);
    assert_eq!(messages[0].protocol_message_id.as_deref(), Some("m1@mail"));

    // A reply notification was emitted.
    let saw_reply = h
        .events
        .drain()
        .any(|e| matches!(e, TicketEvent::Reply { ticket_id, .. } if ticket_id == "t-billing"));
    assert!(saw_reply);
}

#[tokio::test]
async fn unresolved_headers_fall_back_to_most_recent_ticket() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-billing",
        "a@x.com",
        "Billing issue",
        Duration::days(1),
    ));

    // In-Reply-To points at a message id nothing in the store knows, and
    // the subject matches no candidate either.
    let mut reply = email("a@x.com", "New question", "m2@mail", Duration::hours(1));
    reply.in_reply_to = Some("unknown@elsewhere".to_string());
    h.mailbox.deliver(reply);

    h.scheduler.run_tick().await;

    assert_eq!(h.store.all_tickets().len(), 1);
    assert_eq!(h.store.messages_for_ticket("t-billing").len(), 1);
}

#[tokio::test]
async fn header_threading_wins_over_subject() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-subject",
        "a@x.com",
        "Billing issue",
        Duration::hours(2),
    ));
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-thread",
        "a@x.com",
        "Shipping delay",
        Duration::days(2),
    ));
    h.store.add_message(StoredMessage {
        id: "msg-stored".to_string(),
        ticket_id: "t-thread".to_string(),
        organization_id: "org-1".to_string(),
        content: "original".to_string(),
        sender_name: None,
        sender_email: "a@x.com".to_string(),
        direction: MessageDirection::Inbound,
        protocol_message_id: Some("root@mail".to_string()),
        sent_at: Utc::now() - Duration::days(2),
    });

    // Subject says "Billing issue" but the headers thread onto t-thread.
    let mut reply = email("a@x.com", "Re: Billing issue", "m3@mail", Duration::hours(1));
    reply.in_reply_to = Some("root@mail".to_string());
    h.mailbox.deliver(reply);

    h.scheduler.run_tick().await;

    assert_eq!(h.store.messages_for_ticket("t-thread").len(), 2);
    assert!(h.store.messages_for_ticket("t-subject").is_empty());
}

#[tokio::test]
async fn repeated_ticks_ingest_once() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-billing",
        "a@x.com",
        "Billing issue",
        Duration::days(1),
    ));
    h.mailbox.deliver(email(
        "a@x.com",
        "Re: Billing issue",
        "m1@mail",
        Duration::hours(1),
    ));

    let first = h.scheduler.run_tick().await;
    let second = h.scheduler.run_tick().await;
    let third = h.scheduler.run_tick().await;

    assert_eq!(first.emails_ingested, 1);
    assert_eq!(second.emails_ingested, 0);
    assert_eq!(second.duplicates_skipped, 1);
    assert_eq!(third.duplicates_skipped, 1);

    assert_eq!(h.store.messages_for_ticket("t-billing").len(), 1);
    assert_eq!(h.store.ticket("t-billing").unwrap().unread_count, 1);
}

#[tokio::test]
async fn old_mail_outside_lookback_window_is_not_seen() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-billing",
        "a@x.com",
        "Billing issue",
        Duration::days(30),
    ));
    h.mailbox.deliver(email(
        "a@x.com",
        "Re: Billing issue",
        "m-old@mail",
        Duration::days(8),
    ));

    let summary = h.scheduler.run_tick().await;
    assert_eq!(summary.emails_ingested, 0);
    assert!(h.store.messages_for_ticket("t-billing").is_empty());
}

#[tokio::test]
async fn connect_failure_parks_integration_then_recovers_after_reset() {
    let h = harness();
    h.store.add_ticket(active_ticket(
        "org-1",
        "t-billing",
        "a@x.com",
        "Billing issue",
        Duration::days(1),
    ));

    h.mailbox.set_fail_connect(true);
    let summary = h.scheduler.run_tick().await;
    assert_eq!(summary.mailboxes_failed, 1);

    let record = h.store.integration("int-org-1").unwrap();
    assert_eq!(record.sync_status, SyncStatus::Error);
    assert!(record.last_error.is_some());

    // While parked, ticks skip the mailbox entirely.
    h.mailbox.set_fail_connect(false);
    h.mailbox.deliver(email(
        "a@x.com",
        "Re: Billing issue",
        "m1@mail",
        Duration::hours(1),
    ));
    let skipped = h.scheduler.run_tick().await;
    assert_eq!(skipped.mailboxes_polled, 0);

    // Out-of-band reset: the settings layer flips the integration back.
    h.store.reset_integration("int-org-1");

    let recovered = h.scheduler.run_tick().await;
    assert_eq!(recovered.emails_ingested, 1);
}

#[tokio::test]
async fn brand_new_customer_creates_ticket_via_manual_check() {
    let h = harness();
    h.mailbox.deliver(email(
        "new@customer.com",
        "Need an invoice copy",
        "m1@mail",
        Duration::hours(1),
    ));

    // Scheduled ticks search only open-ticket customers; this one has none.
    let tick = h.scheduler.run_tick().await;
    assert_eq!(tick.emails_ingested, 0);

    let summary = h
        .scheduler
        .check_customer_now("int-org-1", "new@customer.com")
        .await
        .unwrap();
    assert_eq!(summary.emails_ingested, 1);

    let tickets = h.store.all_tickets();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].subject, "Need an invoice copy");
    assert_eq!(tickets[0].customer_email, "new@customer.com");

    // Once the ticket exists, scheduled ticks pick the customer up and the
    // idempotency key keeps the same email from duplicating.
    let next = h.scheduler.run_tick().await;
    assert_eq!(next.emails_ingested, 0);
    assert_eq!(next.duplicates_skipped, 1);
}
