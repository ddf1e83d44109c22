//! Global duration watchdog.

use std::time::Duration;
use tracing::{debug, warn};

use super::task::{TaskControl, cancel_unfinished};

/// Cancels the unfinished tasks it watches once the pipeline has run for
/// `timeout`. The orchestrator hands it the readers; writers stop on the
/// end-of-stream marker that follows.
#[derive(Debug, Clone, Copy)]
pub struct DurationMonitor {
    timeout: Duration,
}

impl DurationMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Sleep for the timeout, then cancel the unfinished tasks among
    /// `controls` in order. Fires once and returns how many were cancelled.
    ///
    /// The monitor has no token of its own; the orchestrator aborts it when
    /// the pipeline stops first.
    pub async fn run(self, controls: Vec<TaskControl>) -> usize {
        debug!(timeout_secs = self.timeout.as_secs(), "Duration monitor armed");
        tokio::time::sleep(self.timeout).await;

        warn!(
            "Max duration ({} secs) exceeded, cancelling tasks",
            self.timeout.as_secs()
        );
        cancel_unfinished(&controls, "max duration exceeded")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::task::{TaskKind, TaskRegistry};

    #[tokio::test(start_paused = true)]
    async fn test_cancels_unfinished_after_timeout() {
        let mut registry = TaskRegistry::new();
        let a = registry.register("a", TaskKind::Reader);
        let b = registry.register("b", TaskKind::Writer);

        let monitor = tokio::spawn(
            DurationMonitor::new(Duration::from_secs(10)).run(registry.controls().to_vec()),
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!a.is_cancelled());
        assert!(!b.is_cancelled());

        assert_eq!(monitor.await.unwrap(), 2);
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_already_cancelled_tasks() {
        let mut registry = TaskRegistry::new();
        let a = registry.register("a", TaskKind::Reader);
        let b = registry.register("b", TaskKind::Reader);
        a.cancel();

        let cancelled = DurationMonitor::new(Duration::from_secs(10))
            .run(registry.controls().to_vec())
            .await;
        assert_eq!(cancelled, 1);
        assert!(b.is_cancelled());
    }
}
