use std::sync::Arc;
use std::time::{Duration, Instant};

use crumble_codec::wire::WorldState;
use log::warn;
use tokio::runtime::Handle;

use crate::backend::{Backend, with_deadline};

/// Forwards gameplay snapshots to the server at most once per interval.
/// Reports in between are dropped; the next one sent supersedes them.
pub struct SnapshotThrottle {
    world_id: String,
    backend: Arc<dyn Backend>,
    handle: Handle,
    interval: Duration,
    timeout: Duration,
    last_sent: Option<Instant>,
}

impl SnapshotThrottle {
    pub fn new(
        world_id: &str,
        backend: Arc<dyn Backend>,
        handle: Handle,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            world_id: world_id.to_string(),
            backend,
            handle,
            interval,
            timeout,
            last_sent: None,
        }
    }

    /// Returns true when the snapshot was sent.
    pub fn report(&mut self, state: WorldState, now: Instant) -> bool {
        if self
            .last_sent
            .is_some_and(|last| now.saturating_duration_since(last) < self.interval)
        {
            return false;
        }
        self.last_sent = Some(now);

        let fut = self.backend.report_state(&self.world_id, state);
        let timeout = self.timeout;
        let world_id = self.world_id.clone();
        self.handle.spawn(async move {
            if let Err(e) = with_deadline(timeout, fut).await {
                warn!("Failed to report state of world {}: {}", world_id, e);
            }
        });
        true
    }
}
