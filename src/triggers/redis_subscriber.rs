//! Redis pub/sub supervisor: one long-lived reader task per enabled
//! subscription, dispatching each message as a workflow run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::TRIGGER_RUN_TIMEOUT;
use crate::engine::{Engine, RunOptions};
use crate::model::{JsonMap, RedisSubscription};
use crate::nodes::redis::connection_url;
use crate::store::{NodeConfigStore, RedisSubscriptionStore, WorkflowStore};

struct Entry {
    _shutdown: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the `subscriptionId → reader` population.
#[derive(Clone)]
pub struct RedisSubscriber {
    engine: Engine,
    readers: Arc<Mutex<HashMap<i64, Entry>>>,
}

impl RedisSubscriber {
    pub fn new(engine: Engine) -> Self {
        RedisSubscriber {
            engine,
            readers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load all enabled subscriptions and begin listening.
    pub async fn start(&self) -> Result<(), String> {
        let subs = self
            .engine
            .stores()
            .redis_subscriptions
            .list_enabled()
            .await
            .map_err(|e| e.to_string())?;

        let count = subs.len();
        for sub in subs {
            if let Err(e) = self.add_subscription(&sub).await {
                warn!(subscription_id = sub.id, error = %e, "failed to start subscription");
            }
        }
        info!(count, "redis subscriber started");
        Ok(())
    }

    /// Cancel every reader and wait for them to finish.
    pub async fn stop(&self) {
        let drained: Vec<Entry> = self.readers.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            drop(entry._shutdown);
            let _ = entry.handle.await;
        }
        info!("redis subscriber stopped");
    }

    /// Open the pub/sub connection and spawn the reader; replaces any
    /// existing reader for the same id.
    pub async fn add_subscription(&self, sub: &RedisSubscription) -> Result<(), String> {
        let cfg = self
            .engine
            .stores()
            .node_configs
            .get_by_id(sub.config_id)
            .await
            .map_err(|e| format!("failed to resolve config {}: {e}", sub.config_id))?;
        if cfg.config_type != "redis" {
            return Err(format!(
                "config {} is not redis type (got {})",
                sub.config_id, cfg.config_type
            ));
        }

        let client = redis::Client::open(connection_url(&cfg)).map_err(|e| e.to_string())?;

        // Validate the connection before committing a reader to it.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| format!("redis connection failed: {e}"))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| format!("redis connection failed: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("redis pubsub failed: {e}"))?;
        if sub.is_pattern {
            pubsub.psubscribe(&sub.channel).await.map_err(|e| e.to_string())?;
        } else {
            pubsub.subscribe(&sub.channel).await.map_err(|e| e.to_string())?;
        }
        info!(
            subscription_id = sub.id,
            workflow_id = sub.workflow_id,
            channel = %sub.channel,
            mode = if sub.is_pattern { "PSUBSCRIBE" } else { "SUBSCRIBE" },
            "subscription listening"
        );

        self.remove_subscription(sub.id).await;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let subscriber = self.clone();
        let sub_id = sub.id;
        let workflow_id = sub.workflow_id;
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subscription_id = sub_id, "subscription stopped");
                        break;
                    }
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            warn!(subscription_id = sub_id, "pubsub channel closed");
                            break;
                        };
                        subscriber.handle_message(sub_id, workflow_id, &msg).await;
                    }
                }
            }
        });

        self.readers.lock().insert(
            sub_id,
            Entry {
                _shutdown: shutdown_tx,
                handle,
            },
        );
        Ok(())
    }

    /// Cancel one reader and wait for it.
    pub async fn remove_subscription(&self, sub_id: i64) {
        let entry = self.readers.lock().remove(&sub_id);
        if let Some(entry) = entry {
            drop(entry._shutdown);
            let _ = entry.handle.await;
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.readers.lock().len()
    }

    async fn handle_message(&self, sub_id: i64, workflow_id: i64, msg: &redis::Msg) {
        let payload: String = msg.get_payload().unwrap_or_default();
        let channel = msg.get_channel_name().to_string();
        let pattern: String = msg.get_pattern::<Option<String>>().ok().flatten().unwrap_or_default();

        let stores = self.engine.stores();
        if let Err(e) = stores.redis_subscriptions.increment_msg_count(sub_id).await {
            warn!(subscription_id = sub_id, error = %e, "failed to bump msgCount");
        }

        let workflow = match stores.workflows.get_by_id(workflow_id).await {
            Ok(wf) => wf,
            Err(e) => {
                error!(subscription_id = sub_id, workflow_id, error = %e, "failed to load workflow");
                return;
            }
        };

        let mut input = JsonMap::new();
        input.insert("message".to_string(), json!(payload));
        input.insert("channel".to_string(), json!(channel));
        input.insert("pattern".to_string(), json!(pattern));
        input.insert("subscriptionId".to_string(), json!(sub_id));
        input.insert("receivedAt".to_string(), json!(Utc::now().to_rfc3339()));

        let result = self
            .engine
            .run_with(
                &workflow,
                RunOptions {
                    initial_input: Some(input),
                    timeout: Some(TRIGGER_RUN_TIMEOUT),
                    ..Default::default()
                },
            )
            .await;
        match result {
            Ok(outcome) if outcome.is_completed() => {
                info!(workflow_id, execution_id = outcome.execution_id, "subscription run completed");
            }
            Ok(outcome) => {
                warn!(workflow_id, execution_id = outcome.execution_id, "subscription run failed");
            }
            Err(e) => error!(workflow_id, error = %e, "subscription run could not start"),
        }
    }
}
