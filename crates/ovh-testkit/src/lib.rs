//! Test-only fakes and scenario harness for the acquisition engine.
//!
//! `ScriptedProber` and `ScriptedOrderDriver` plug into the same traits the
//! production `ovh-probe`/`ovh-order` crates implement, so `ScenarioHarness`
//! drives a real `QueueScheduler` against a real (temp-dir) `Store` without
//! any network I/O — the real pieces composed around a deterministic fake
//! rather than a live OVH client.

pub mod fake_order;
pub mod fake_probe;
pub mod harness;

pub use fake_order::{ScriptedOrderDriver, ScriptedOutcome};
pub use fake_probe::ScriptedProber;
pub use harness::{sample_account, ScenarioHarness, TaskBuilder};
