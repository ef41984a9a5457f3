//! Queue Scheduler (C5) + Availability Monitor (C6).
//!
//! Two independent background loops sharing the persistence store, client
//! pool, availability probe, and notifier. See `scheduler` and `monitor`
//! for the two loops; `transition` is the pure state-machine core of C5's
//! tick algorithm; `backoff` is the 429 backoff helper shared by both.

pub mod backoff;
pub mod monitor;
pub mod scheduler;
pub mod transition;

pub use monitor::{AvailabilityMonitor, MonitorStatus};
pub use scheduler::{pool_size_for, QueueScheduler};
pub use transition::{decide, TickEffect, TickEvent};
