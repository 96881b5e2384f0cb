//! Mailbox poller: one ticker task per enabled email trigger, fetching
//! unseen messages over IMAP and dispatching each as a workflow run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::TRIGGER_RUN_TIMEOUT;
use crate::engine::{Engine, RunOptions};
use crate::model::EmailTrigger;
use crate::net::imap;
use crate::store::{EmailTriggerStore, NodeConfigStore, WorkflowStore};

const MIN_POLL_INTERVAL_SEC: u64 = 10;
const DEFAULT_POLL_INTERVAL_SEC: u64 = 60;
const DEFAULT_MAX_FETCH: u32 = 10;

struct Entry {
    _shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the `triggerId → poller` population.
#[derive(Clone)]
pub struct EmailPoller {
    engine: Engine,
    pollers: Arc<Mutex<HashMap<i64, Entry>>>,
}

impl EmailPoller {
    pub fn new(engine: Engine) -> Self {
        EmailPoller {
            engine,
            pollers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn start(&self) -> Result<(), String> {
        let triggers = self
            .engine
            .stores()
            .email_triggers
            .list_enabled()
            .await
            .map_err(|e| e.to_string())?;

        let count = triggers.len();
        for trigger in triggers {
            self.add_trigger(&trigger).await;
        }
        info!(count, "email poller started");
        Ok(())
    }

    pub async fn stop(&self) {
        let drained: Vec<Entry> = self.pollers.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            drop(entry._shutdown);
            let _ = entry.handle.await;
        }
        info!("email poller stopped");
    }

    /// Spawn the ticker for a trigger; replaces any prior poller for the
    /// same id. An immediate initial poll precedes the interval.
    pub async fn add_trigger(&self, trigger: &EmailTrigger) {
        self.remove_trigger(trigger.id).await;

        let interval_sec = if trigger.poll_interval_sec < MIN_POLL_INTERVAL_SEC {
            DEFAULT_POLL_INTERVAL_SEC
        } else {
            trigger.poll_interval_sec
        };
        let max_fetch = if trigger.max_fetch == 0 {
            DEFAULT_MAX_FETCH
        } else {
            trigger.max_fetch
        };

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let poller = self.clone();
        let trigger = trigger.clone();
        let trigger_id = trigger.id;
        let handle = tokio::spawn(async move {
            info!(
                trigger_id,
                workflow_id = trigger.workflow_id,
                interval_sec,
                mailbox = %trigger.mailbox,
                "mailbox polling"
            );
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_sec));
            // The first tick fires immediately; that is the initial poll.
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(trigger_id, "mailbox poller stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        poller.poll(&trigger, max_fetch).await;
                    }
                }
            }
        });

        self.pollers.lock().insert(
            trigger_id,
            Entry {
                _shutdown: shutdown_tx,
                handle,
            },
        );
    }

    pub async fn remove_trigger(&self, trigger_id: i64) {
        let entry = self.pollers.lock().remove(&trigger_id);
        if let Some(entry) = entry {
            drop(entry._shutdown);
            let _ = entry.handle.await;
        }
    }

    pub fn active_triggers(&self) -> usize {
        self.pollers.lock().len()
    }

    /// One tick: fetch unseen headers and run the workflow per message.
    /// Errors are logged and the next tick proceeds.
    async fn poll(&self, trigger: &EmailTrigger, max_fetch: u32) {
        let stores = self.engine.stores();
        let cfg = match stores.node_configs.get_by_id(trigger.config_id).await {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(trigger_id = trigger.id, error = %e, "failed to resolve email config");
                return;
            }
        };

        let emails =
            match imap::fetch_new_emails(&cfg, &trigger.mailbox, trigger.mark_seen, max_fetch).await {
                Ok(emails) => emails,
                Err(e) => {
                    warn!(trigger_id = trigger.id, error = %e, "mailbox fetch failed");
                    return;
                }
            };

        if let Err(e) = stores.email_triggers.update_last_poll(trigger.id, Utc::now()).await {
            warn!(trigger_id = trigger.id, error = %e, "failed to update lastPollAt");
        }
        if emails.is_empty() {
            return;
        }
        info!(trigger_id = trigger.id, count = emails.len(), "new emails");

        let workflow = match stores.workflows.get_by_id(trigger.workflow_id).await {
            Ok(wf) => wf,
            Err(e) => {
                error!(trigger_id = trigger.id, workflow_id = trigger.workflow_id, error = %e, "failed to load workflow");
                return;
            }
        };

        for mut email in emails {
            email.insert("triggerId".to_string(), json!(trigger.id));
            email.insert("receivedAt".to_string(), json!(Utc::now().to_rfc3339()));
            let subject = email.get("subject").cloned().unwrap_or_default();

            let result = self
                .engine
                .run_with(
                    &workflow,
                    RunOptions {
                        initial_input: Some(email),
                        timeout: Some(TRIGGER_RUN_TIMEOUT),
                        ..Default::default()
                    },
                )
                .await;

            if let Err(e) = stores.email_triggers.increment_msg_count(trigger.id).await {
                warn!(trigger_id = trigger.id, error = %e, "failed to bump msgCount");
            }

            match result {
                Ok(outcome) if outcome.is_completed() => {
                    info!(
                        workflow_id = trigger.workflow_id,
                        execution_id = outcome.execution_id,
                        subject = %subject,
                        "email run completed"
                    );
                }
                Ok(outcome) => {
                    warn!(
                        workflow_id = trigger.workflow_id,
                        execution_id = outcome.execution_id,
                        "email run failed"
                    );
                }
                Err(e) => error!(workflow_id = trigger.workflow_id, error = %e, "email run could not start"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EmailTriggerStore, Stores};

    fn poller() -> (EmailPoller, Stores) {
        let stores = Stores::in_memory();
        let registry = Arc::new(crate::nodes::registry::create_default_registry());
        (EmailPoller::new(Engine::new(stores.clone(), registry)), stores)
    }

    fn trigger(id_hint: &str) -> EmailTrigger {
        serde_json::from_value(json!({
            "id": 0,
            "workflowId": 1,
            "configId": 1,
            "mailbox": id_hint,
            "pollIntervalSec": 3600,
            "markSeen": false,
            "maxFetch": 5,
            "enabled": true
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_trigger_replaces_prior_poller() {
        let (poller, stores) = poller();
        let t = stores.email_triggers.create(trigger("INBOX")).await.unwrap();

        poller.add_trigger(&t).await;
        poller.add_trigger(&t).await;
        assert_eq!(poller.active_triggers(), 1);

        poller.remove_trigger(t.id).await;
        assert_eq!(poller.active_triggers(), 0);
        poller.stop().await;
    }

    #[tokio::test]
    async fn test_poll_with_missing_config_does_not_kill_poller() {
        let (poller, stores) = poller();
        let t = stores.email_triggers.create(trigger("INBOX")).await.unwrap();
        poller.add_trigger(&t).await;
        // First tick runs immediately against a missing config id and is
        // logged and skipped; the poller must still be alive.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(poller.active_triggers(), 1);
        poller.stop().await;
    }
}
