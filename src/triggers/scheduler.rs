//! Cron scheduler: one tokio task per enabled schedule, firing workflow
//! runs at the instants its expression produces.
//!
//! Overlapping executions of the same schedule are permitted: a firing
//! starts the run and the next occurrence is computed from the wall clock,
//! not from run completion. Operators who need single-flight semantics
//! model it inside the workflow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use croner::Cron;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::TRIGGER_RUN_TIMEOUT;
use crate::engine::{Engine, RunOptions};
use crate::store::{CronScheduleStore, WorkflowStore};

/// Parse a 5-field cron expression or a descriptor shortcut (`@hourly`, …).
pub fn parse_expression(expression: &str) -> Result<Cron, String> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| e.to_string())
}

/// Next firing instant strictly after `after`.
pub fn next_occurrence(cron: &Cron, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    cron.find_next_occurrence(&after, false).ok()
}

struct Entry {
    // Dropping the sender tells the schedule task to exit after any
    // in-flight run.
    _shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the `scheduleId → entry` population.
#[derive(Clone)]
pub struct CronScheduler {
    engine: Engine,
    entries: Arc<Mutex<HashMap<i64, Entry>>>,
}

impl CronScheduler {
    pub fn new(engine: Engine) -> Self {
        CronScheduler {
            engine,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load all enabled schedules and start their tasks.
    pub async fn start(&self) -> Result<(), String> {
        let schedules = self
            .engine
            .stores()
            .cron_schedules
            .list_enabled()
            .await
            .map_err(|e| e.to_string())?;

        let count = schedules.len();
        for schedule in schedules {
            if let Err(e) = self
                .add_job(schedule.id, schedule.workflow_id, &schedule.expression)
                .await
            {
                warn!(schedule_id = schedule.id, error = %e, "failed to add schedule");
            }
        }
        info!(count, "scheduler started");
        Ok(())
    }

    /// Signal every task and wait for in-flight jobs to drain.
    pub async fn stop(&self) {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            drop(entry._shutdown);
            let _ = entry.handle.await;
        }
        info!("scheduler stopped");
    }

    /// Drop every entry and reload the enabled set from the store.
    pub async fn reload(&self) -> Result<(), String> {
        self.entries.lock().clear();
        self.start().await
    }

    /// Register a schedule; replaces any prior entry for the same id.
    pub async fn add_job(
        &self,
        schedule_id: i64,
        workflow_id: i64,
        expression: &str,
    ) -> Result<(), String> {
        let cron = parse_expression(expression)?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = next_occurrence(&cron, now) else {
                    warn!(schedule_id, "cron expression yields no further occurrences");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(wait) => {
                        scheduler.fire(schedule_id, workflow_id, &cron).await;
                    }
                }
            }
        });

        // Replacing the old entry drops its shutdown sender.
        self.entries.lock().insert(
            schedule_id,
            Entry {
                _shutdown: shutdown_tx,
                handle,
            },
        );
        Ok(())
    }

    /// Unregister a schedule. The task exits after any in-flight run.
    pub fn remove_job(&self, schedule_id: i64) {
        self.entries.lock().remove(&schedule_id);
    }

    pub fn active_jobs(&self) -> usize {
        self.entries.lock().len()
    }

    async fn fire(&self, schedule_id: i64, workflow_id: i64, cron: &Cron) {
        info!(schedule_id, workflow_id, "schedule fired");

        let stores = self.engine.stores();
        let workflow = match stores.workflows.get_by_id(workflow_id).await {
            Ok(wf) => wf,
            Err(e) => {
                error!(schedule_id, workflow_id, error = %e, "failed to load workflow");
                return;
            }
        };

        let result = self
            .engine
            .run_with(
                &workflow,
                RunOptions {
                    timeout: Some(TRIGGER_RUN_TIMEOUT),
                    ..Default::default()
                },
            )
            .await;
        match &result {
            Ok(outcome) if outcome.is_completed() => {
                info!(workflow_id, execution_id = outcome.execution_id, "schedule run completed");
            }
            Ok(outcome) => {
                warn!(
                    workflow_id,
                    execution_id = outcome.execution_id,
                    error = ?outcome.error,
                    "schedule run failed"
                );
            }
            Err(e) => error!(workflow_id, error = %e, "schedule run could not start"),
        }

        let now = Utc::now();
        let next = next_occurrence(cron, now);
        if let Err(e) = stores
            .cron_schedules
            .update_last_run(schedule_id, now, next)
            .await
        {
            warn!(schedule_id, error = %e, "failed to update schedule run times");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_standard_and_descriptor_expressions() {
        assert!(parse_expression("* * * * *").is_ok());
        assert!(parse_expression("*/5 8-18 * * 1-5").is_ok());
        assert!(parse_expression("@hourly").is_ok());
        assert!(parse_expression("nonsense").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn test_next_occurrence_minute_boundary() {
        let cron = parse_expression("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 15).unwrap();
        let next = next_occurrence(&cron, after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 31, 0).unwrap());
    }

    #[tokio::test]
    async fn test_add_job_replaces_prior_entry() {
        let stores = crate::store::Stores::in_memory();
        let registry = std::sync::Arc::new(crate::nodes::registry::create_default_registry());
        let scheduler = CronScheduler::new(Engine::new(stores, registry));

        scheduler.add_job(1, 10, "* * * * *").await.unwrap();
        scheduler.add_job(1, 10, "*/2 * * * *").await.unwrap();
        assert_eq!(scheduler.active_jobs(), 1);

        scheduler.add_job(2, 11, "@daily").await.unwrap();
        assert_eq!(scheduler.active_jobs(), 2);

        scheduler.remove_job(1);
        assert_eq!(scheduler.active_jobs(), 1);
        scheduler.stop().await;
        assert_eq!(scheduler.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_add_job_rejects_bad_expression() {
        let stores = crate::store::Stores::in_memory();
        let registry = std::sync::Arc::new(crate::nodes::registry::create_default_registry());
        let scheduler = CronScheduler::new(Engine::new(stores, registry));
        assert!(scheduler.add_job(1, 10, "bad").await.is_err());
        assert_eq!(scheduler.active_jobs(), 0);
    }
}
