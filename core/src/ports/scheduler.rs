//! Cooperative scheduler port (interface).

use std::time::Duration;

/// A deferred unit of work for the UI thread.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Port for the single-threaded cooperative scheduler the UI runs on.
///
/// Any event loop that can run a callback after a delay satisfies this, such
/// as a GUI main loop or a tokio `LocalSet`. Tasks run one at a time on the
/// scheduler's own thread and must not block.
pub trait Scheduler {
    /// Run `task` once, no earlier than `delay` from now.
    fn schedule_after(&self, delay: Duration, task: Task);
}
