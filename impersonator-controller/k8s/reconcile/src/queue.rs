use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, time};

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// A work queue for a single reconciliation key.
///
/// Any number of triggers between two syncs coalesce into one pending sync.
/// Failed syncs are retried with exponential backoff until `forget` is called.
#[derive(Clone, Debug, Default)]
pub struct Queue(Arc<Inner>);

#[derive(Debug, Default)]
struct Inner {
    notify: Notify,
    failures: AtomicU32,
}

// === impl Queue ===

impl Queue {
    pub fn add(&self) {
        self.0.notify.notify_one();
    }

    /// Schedules a trigger after the key's next backoff delay.
    pub fn add_rate_limited(&self) {
        let delay = self.next_delay();
        tracing::debug!(?delay, "Requeueing");
        let queue = self.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            queue.add();
        });
    }

    /// Resets the key's backoff.
    pub fn forget(&self) {
        self.0.failures.store(0, Ordering::Release);
    }

    /// Waits until a sync is pending.
    pub async fn next(&self) {
        self.0.notify.notified().await
    }

    fn next_delay(&self) -> Duration {
        let failures = self.0.failures.fetch_add(1, Ordering::AcqRel);
        backoff(failures)
    }
}

fn backoff(failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    BASE_DELAY.saturating_mul(factor).min(MAX_DELAY)
}
