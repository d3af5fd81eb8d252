// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Change notifications for connected observers.
//
// Publishing is fire-and-forget.  The transport that delivers events to
// dashboards or push services subscribes to the broadcast channel; having no
// subscriber at all is normal and not an error.

use tokio::sync::broadcast;
use tracing::debug;

use kioskprint_core::types::JobEvent;

/// Receives job change events.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Sink backed by a `tokio::sync::broadcast` channel.
///
/// Slow subscribers that fall more than `capacity` events behind see a
/// `Lagged` error on their receiver and skip ahead.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<JobEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, event: JobEvent) {
        let job_id = event.job_id;
        let status = event.status;
        match self.sender.send(event) {
            Ok(receivers) => debug!(job_id = %job_id, %status, receivers, "event published"),
            Err(_) => debug!(job_id = %job_id, %status, "event published with no subscribers"),
        }
    }
}
