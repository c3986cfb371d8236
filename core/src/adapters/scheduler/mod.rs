//! Cooperative scheduler adapters.
//!
//! - `ManualScheduler`: virtual clock advanced by the host (tests, custom loops)
//! - `TokioScheduler`: timers on a current-thread tokio `LocalSet`

mod local;
mod manual;

pub use local::TokioScheduler;
pub use manual::ManualScheduler;
