//! Standalone poller daemon
//!
//! Loads mailbox integrations from the config file into the in-memory
//! store and runs the scheduler until interrupted. Deployments embedding
//! the engine wire their own `TicketStore` instead.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mailbridge::types::{Channel, MailboxIntegration, SyncStatus};
use mailbridge::{
    AppConfig, ImapMailboxSource, MemoryStore, Notifier, PollScheduler, TicketEvent,
};

#[derive(Parser, Debug)]
#[command(name = "mailbridge")]
#[command(about = "Poll shared IMAP mailboxes and file replies into support tickets")]
struct Cli {
    /// Path to the TOML config file (default: XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single poll tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> mailbridge::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    if let Some(interval) = cli.interval {
        config.poller.poll_interval_secs = interval;
        config.validate()?;
    }

    let store = Arc::new(MemoryStore::new());
    for entry in &config.integrations {
        store.add_integration(MailboxIntegration {
            id: Uuid::new_v4().to_string(),
            organization_id: entry.organization_id.clone(),
            channel: Channel::Email,
            credentials: entry.credentials.clone(),
            enabled: entry.enabled,
            sync_status: SyncStatus::Active,
            last_sync_at: None,
            last_error: None,
        });
    }

    if config.integrations.is_empty() {
        warn!("No mailbox integrations configured; nothing to poll");
    }

    let (notifier, events) = Notifier::new();

    // Drain reply events into the log; a real deployment hangs webhooks or
    // push notifications off this receiver.
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            match event {
                TicketEvent::Reply {
                    ticket_id,
                    customer_email,
                    ..
                } => info!(ticket_id = %ticket_id, customer = %customer_email, "Ticket reply"),
                TicketEvent::TicketCreated {
                    ticket_id,
                    customer_email,
                    subject,
                } => info!(
                    ticket_id = %ticket_id,
                    customer = %customer_email,
                    subject = %subject,
                    "Ticket created"
                ),
            }
        }
    });

    let scheduler = PollScheduler::new(
        store,
        Arc::new(ImapMailboxSource),
        notifier,
        config.poller.clone(),
    );

    if cli.once {
        let summary = scheduler.run_tick().await;
        info!(?summary, "Single tick complete");
        return Ok(());
    }

    scheduler.start();

    tokio::signal::ctrl_c().await?;
    scheduler.stop();

    Ok(())
}
