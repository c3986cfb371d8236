//! Scan engine - process supervision, output streaming and cancellation.
//!
//! The reader worker ([`streamer`]) is the only code that blocks on I/O.
//! Everything else runs on the host's single UI thread, driven by consumer
//! ticks scheduled through the [`Scheduler`](crate::ports::Scheduler) port.

pub mod cancellation;
pub mod consumer;
pub mod controller;
pub mod streamer;

pub use cancellation::{CancelReason, CancellationManager, Outcome};
pub use consumer::{Drained, OutputConsumer};
pub use controller::{ScanController, ScanRequest, TargetSpec};
pub use streamer::{OutputStreamer, StreamSummary};
