//! Off-chain status mirror
//!
//! The off-chain task store keeps a denormalized `status` column for
//! display. This module models it as a one-way, eventually-consistent
//! projection of the engine's committed transition events: it is written
//! only after a transition is observed, read-only for everyone else, and
//! never drives a transition decision.

use crate::models::{EscrowEvent, EscrowStatus};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

/// Denormalized task-id → status map.
pub struct StatusMirror {
    states: Arc<RwLock<HashMap<String, EscrowStatus>>>,
}

impl StatusMirror {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Apply one committed transition event.
    pub async fn apply(&self, event: &EscrowEvent) {
        let mut states = self.states.write().await;
        states.insert(event.task_id.clone(), event.status);
        debug!(
            task_id = %event.task_id,
            status = %event.status,
            event_type = %event.event_type,
            "status mirrored"
        );
    }

    /// Mirrored status for a task, if any transition has been observed.
    /// Eventually consistent; never authoritative.
    pub async fn status_of(&self, task_id: &str) -> Option<EscrowStatus> {
        let states = self.states.read().await;
        states.get(task_id).copied()
    }

    /// Consume a transition event stream until the engine drops its sender.
    /// A lagged receiver skips to the newest events; the per-task status
    /// converges because every event carries the full current status.
    pub async fn run(&self, mut rx: broadcast::Receiver<EscrowEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.apply(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status mirror lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl Default for StatusMirror {
    fn default() -> Self {
        Self::new()
    }
}
