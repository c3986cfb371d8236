//! Scheduler backed by tokio timers on the current thread.

use std::time::Duration;

use crate::ports::{Scheduler, Task};

/// Runs tasks with `tokio::task::spawn_local` after a `tokio::time::sleep`.
///
/// Must be used from inside a `tokio::task::LocalSet` on a current-thread
/// runtime; `spawn_local` panics anywhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl TokioScheduler {
    /// Create a new scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) {
        tokio::task::spawn_local(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test(flavor = "current_thread")]
    async fn test_tasks_run_on_local_set() {
        let local = tokio::task::LocalSet::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        local
            .run_until(async move {
                let scheduler = TokioScheduler::new();
                scheduler.schedule_after(
                    Duration::from_millis(5),
                    Box::new(move || h.set(h.get() + 1)),
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .await;

        assert_eq!(hits.get(), 1);
    }
}
