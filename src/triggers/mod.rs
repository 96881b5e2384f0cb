//! Long-lived trigger supervisors. Each owns a population of external
//! sources (cron entries, pub/sub subscriptions, mailbox pollers) and
//! translates their events into engine runs.
//!
//! Shared lifecycle shape: an `id → handle` map behind a mutex held only
//! for map mutation; `add` replaces any prior handle for the same id;
//! `remove` signals the task and lets in-flight work drain; `stop` drains
//! everything. A failing source is logged and skipped, never fatal to its
//! supervisor. The HTTP-in dispatcher has no task population and lives in
//! the API layer.

pub mod email_poller;
pub mod redis_subscriber;
pub mod scheduler;

use std::time::Duration;

/// Deadline applied to every trigger-initiated workflow run.
pub const TRIGGER_RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
