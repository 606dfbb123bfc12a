//! Poll Scheduler
//!
//! A recurring tick over all enabled mailbox integrations. Integrations are
//! processed sequentially within a tick — cheap on the store, and two polls
//! can never interleave writes to the same ticket within one process.
//! Failures are isolated per integration: one bad mailbox is parked in
//! ERROR state and the tick moves on.
//!
//! The scheduler is an owned instance, not a global: multiple instances
//! (one per test, say) don't interfere.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::health::HealthTracker;
use crate::imap::{MailboxSession, MailboxSource};
use crate::ingest::{IngestOutcome, IngestionPipeline};
use crate::notify::Notifier;
use crate::store::TicketStore;
use crate::types::error::{BridgeError, Result};
use crate::types::MailboxIntegration;

/// Snapshot of the scheduler's state, for the operational status surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub ticks_completed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Outcome counts for one tick (or one manual check).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub mailboxes_polled: u32,
    pub mailboxes_failed: u32,
    pub emails_ingested: u32,
    pub duplicates_skipped: u32,
}

/// Per-mailbox counters accumulated while scanning customers.
#[derive(Debug, Clone, Default)]
struct MailboxStats {
    ingested: u32,
    duplicates: u32,
}

/// Timer-driven poller over all eligible mailbox integrations.
///
/// Cheap to clone; all clones drive the same underlying loop.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TicketStore>,
    mailboxes: Arc<dyn MailboxSource>,
    pipeline: IngestionPipeline,
    health: HealthTracker,
    config: PollerConfig,
    running: AtomicBool,
    // Bumped on every start(); a loop whose generation no longer matches has
    // been superseded and must exit even if the scheduler is running again.
    generation: AtomicU64,
    shutdown: Notify,
    status: Mutex<SchedulerStatus>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(
        store: Arc<dyn TicketStore>,
        mailboxes: Arc<dyn MailboxSource>,
        notifier: Notifier,
        config: PollerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                pipeline: IngestionPipeline::new(store.clone(), notifier),
                health: HealthTracker::new(store.clone()),
                store,
                mailboxes,
                config,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown: Notify::new(),
                status: Mutex::new(SchedulerStatus::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.status.lock().unwrap().clone()
    }

    /// Start the tick loop in a background task. No-op when already running.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running, ignoring start");
            return;
        }
        inner.status.lock().unwrap().running = true;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            interval_secs = inner.config.poll_interval_secs,
            "Starting poll scheduler"
        );

        let loop_inner = Arc::clone(inner);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(loop_inner.config.poll_interval());

            loop {
                // The shutdown wake only interrupts the timer wait; a tick
                // already in flight always runs to completion.
                tokio::select! {
                    _ = interval.tick() => {
                        if !loop_inner.is_live(generation) {
                            break;
                        }
                        let summary = loop_inner.run_tick().await;
                        debug!(?summary, "Poll tick complete");
                    }
                    _ = loop_inner.shutdown.notified() => {
                        // A wake without a live matching generation means
                        // this loop was stopped or superseded by a restart.
                        if !loop_inner.is_live(generation) {
                            break;
                        }
                    }
                }
            }

            info!("Poll scheduler stopped");
        });

        *inner.handle.lock().unwrap() = Some(task);
    }

    /// Stop scheduling. Only prevents the next tick; an in-flight tick runs
    /// to completion. Reversible via `start()`.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        inner.status.lock().unwrap().running = false;
        info!("Stopping poll scheduler");

        // Wake the loop out of its timer wait so it exits promptly.
        inner.shutdown.notify_one();
        inner.handle.lock().unwrap().take();
    }

    /// One pass over all eligible integrations. Public so tests and the
    /// manual trigger can run it without the timer.
    pub async fn run_tick(&self) -> TickSummary {
        self.inner.run_tick().await
    }

    /// Run the connect/search/ingest path for one customer outside the
    /// scheduled tick (the "check now" operational trigger).
    pub async fn check_customer_now(
        &self,
        integration_id: &str,
        customer_email: &str,
    ) -> Result<TickSummary> {
        self.inner
            .check_customer_now(integration_id, customer_email)
            .await
    }
}

impl Inner {
    /// Whether a loop spawned at `generation` is still the one loop allowed
    /// to tick. Exactly one loop can ever be live.
    fn is_live(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let integrations = match self.store.integrations_to_poll().await {
            Ok(integrations) => integrations,
            Err(e) => {
                error!(error = %e, "Failed to enumerate integrations, skipping tick");
                return summary;
            }
        };

        debug!(count = integrations.len(), "Polling mailbox integrations");

        for integration in &integrations {
            let outcome = tokio::time::timeout(
                self.config.mailbox_timeout(),
                self.poll_integration(integration),
            )
            .await
            .unwrap_or(Err(BridgeError::Timeout(self.config.mailbox_timeout_secs)));

            match outcome {
                Ok(stats) => {
                    summary.mailboxes_polled += 1;
                    summary.emails_ingested += stats.ingested;
                    summary.duplicates_skipped += stats.duplicates;
                    if let Err(e) = self.health.record_success(&integration.id).await {
                        error!(integration_id = %integration.id, error = %e, "Failed to record health");
                    }
                }
                Err(e) => {
                    summary.mailboxes_failed += 1;
                    if let Err(record_err) = self
                        .health
                        .record_failure(&integration.id, &e.to_string())
                        .await
                    {
                        error!(
                            integration_id = %integration.id,
                            error = %record_err,
                            "Failed to record health"
                        );
                    }
                }
            }
        }

        let mut status = self.status.lock().unwrap();
        status.ticks_completed += 1;
        status.last_tick_at = Some(Utc::now());

        summary
    }

    async fn check_customer_now(
        &self,
        integration_id: &str,
        customer_email: &str,
    ) -> Result<TickSummary> {
        let integration = self
            .store
            .integrations_to_poll()
            .await?
            .into_iter()
            .find(|i| i.id == integration_id)
            .ok_or_else(|| BridgeError::IntegrationNotFound(integration_id.to_string()))?;

        let mut summary = TickSummary::default();
        let customers = vec![customer_email.to_string()];

        let outcome = tokio::time::timeout(
            self.config.mailbox_timeout(),
            self.poll_customers(&integration, &customers),
        )
        .await
        .unwrap_or(Err(BridgeError::Timeout(self.config.mailbox_timeout_secs)));

        match outcome {
            Ok(stats) => {
                summary.mailboxes_polled = 1;
                summary.emails_ingested = stats.ingested;
                summary.duplicates_skipped = stats.duplicates;
                self.health.record_success(&integration.id).await?;
                Ok(summary)
            }
            Err(e) => {
                self.health
                    .record_failure(&integration.id, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Poll one integration: all customers with open tickets.
    async fn poll_integration(&self, integration: &MailboxIntegration) -> Result<MailboxStats> {
        let customers = self
            .store
            .open_ticket_customers(&integration.organization_id)
            .await?;

        if customers.is_empty() {
            debug!(
                integration_id = %integration.id,
                "No open-ticket customers, skipping mailbox"
            );
            return Ok(MailboxStats::default());
        }

        self.poll_customers(integration, &customers).await
    }

    async fn poll_customers(
        &self,
        integration: &MailboxIntegration,
        customers: &[String],
    ) -> Result<MailboxStats> {
        let mut session = self.mailboxes.open(&integration.credentials).await?;

        let result = self
            .scan_customers(session.as_mut(), integration, customers)
            .await;

        // Release the session on success and error paths alike.
        if let Err(e) = session.disconnect().await {
            debug!(integration_id = %integration.id, error = %e, "LOGOUT failed");
        }

        result
    }

    async fn scan_customers(
        &self,
        session: &mut dyn MailboxSession,
        integration: &MailboxIntegration,
        customers: &[String],
    ) -> Result<MailboxStats> {
        let since = Utc::now() - ChronoDuration::days(self.config.lookback_days);
        let mut stats = MailboxStats::default();

        for customer in customers {
            // Search failures are integration-fatal and abort the mailbox.
            let emails = session.search_by_sender_since(customer, since).await?;

            for email in &emails {
                match self
                    .pipeline
                    .process_email(&integration.organization_id, email)
                    .await
                {
                    Ok(IngestOutcome::Ingested { .. }) => stats.ingested += 1,
                    Ok(IngestOutcome::DuplicateSkipped) => stats.duplicates += 1,
                    // A single bad email never aborts the batch.
                    Err(e) => {
                        error!(
                            integration_id = %integration.id,
                            customer = %customer,
                            protocol_id = ?email.message_id,
                            error = %e,
                            "Failed to ingest email, continuing batch"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }
}
