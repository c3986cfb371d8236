//! Host-driven scheduler with a virtual clock.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::ports::{Scheduler, Task};

#[derive(Default)]
struct State {
    now: Duration,
    next_seq: u64,
    /// Pending tasks keyed by (due time, insertion order).
    queue: BTreeMap<(Duration, u64), Task>,
}

/// A scheduler whose clock only moves when the host advances it.
///
/// Tasks due at the same instant run in the order they were scheduled.
/// Tasks may schedule further tasks while running.
#[derive(Default)]
pub struct ManualScheduler {
    state: RefCell<State>,
}

impl ManualScheduler {
    /// Create a scheduler at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now() + by;
        let mut ran = 0;

        while let Some(task) = self.pop_due(target) {
            task();
            ran += 1;
        }

        self.state.borrow_mut().now = target;
        ran
    }

    /// Jump to the earliest pending task and run it.
    ///
    /// Returns `false` when nothing is pending.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut state = self.state.borrow_mut();
            state.queue.pop_first().map(|((due, _), task)| {
                state.now = state.now.max(due);
                task
            })
        };

        match next {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    fn pop_due(&self, target: Duration) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let (&(due, _), _) = state.queue.first_key_value()?;
        if due > target {
            return None;
        }
        let ((due, _), task) = state.queue.pop_first()?;
        state.now = state.now.max(due);
        Some(task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Task) {
        let mut state = self.state.borrow_mut();
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.insert((due, seq), task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_tasks_run_when_due() {
        let scheduler = ManualScheduler::new();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        scheduler.schedule_after(Duration::from_millis(100), Box::new(move || h.set(h.get() + 1)));

        assert_eq!(scheduler.advance(Duration::from_millis(99)), 0);
        assert_eq!(hits.get(), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(scheduler.now(), Duration::from_millis(100));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_same_instant_runs_in_schedule_order() {
        let scheduler = ManualScheduler::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let order = Rc::clone(&order);
            scheduler.schedule_after(
                Duration::from_millis(10),
                Box::new(move || order.borrow_mut().push(i)),
            );
        }

        scheduler.advance(Duration::from_millis(10));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_task_can_reschedule_itself() {
        fn tick(scheduler: Rc<ManualScheduler>, count: Rc<Cell<u32>>) {
            count.set(count.get() + 1);
            if count.get() < 5 {
                let next = Rc::clone(&scheduler);
                scheduler.schedule_after(
                    Duration::from_millis(100),
                    Box::new(move || tick(next, count)),
                );
            }
        }

        let scheduler = Rc::new(ManualScheduler::new());
        let count = Rc::new(Cell::new(0));
        let (s, c) = (Rc::clone(&scheduler), Rc::clone(&count));
        scheduler.schedule_after(Duration::ZERO, Box::new(move || tick(s, c)));

        scheduler.advance(Duration::from_millis(250));
        assert_eq!(count.get(), 3);

        while scheduler.run_next() {}
        assert_eq!(count.get(), 5);
        assert_eq!(scheduler.now(), Duration::from_millis(400));
    }
}
