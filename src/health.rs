//! Integration Health Tracking
//!
//! Records the outcome of every poll attempt on the integration record.
//! A mailbox recorded in ERROR state is skipped on subsequent ticks until
//! reset out-of-band, so bad credentials don't get hammered every minute.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{HealthUpdate, TicketStore};
use crate::types::error::Result;
use crate::types::SyncStatus;

/// Thin recorder over the store's integration-health fields.
pub struct HealthTracker {
    store: Arc<dyn TicketStore>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    /// Mark a poll as successful: ACTIVE, refreshed last-sync time, error
    /// cleared. Idempotent beyond the timestamp refresh.
    pub async fn record_success(&self, integration_id: &str) -> Result<()> {
        info!(integration_id = %integration_id, "Mailbox poll succeeded");
        self.store
            .update_integration_health(
                integration_id,
                HealthUpdate {
                    status: SyncStatus::Active,
                    last_sync_at: Some(Utc::now()),
                    error_message: None,
                },
            )
            .await
    }

    /// Park the integration in ERROR state with the failure message.
    /// The last successful sync time is left untouched.
    pub async fn record_failure(&self, integration_id: &str, message: &str) -> Result<()> {
        warn!(
            integration_id = %integration_id,
            error = %message,
            "Mailbox poll failed, parking integration in ERROR state"
        );
        self.store
            .update_integration_health(
                integration_id,
                HealthUpdate {
                    status: SyncStatus::Error,
                    last_sync_at: None,
                    error_message: Some(message.to_string()),
                },
            )
            .await
    }
}
