//! Persistence adapter: one trait per entity, exposing only the operations
//! the engine and supervisors actually consume. The backing store is opaque;
//! [`memory::MemoryStore`] is the reference implementation used by the server
//! binary and the tests, and a relational store can slot in behind the same
//! traits.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{
    ConfigStoreEntry, CronSchedule, EmailTrigger, Execution, ExecutionLog, HttpTrigger,
    NodeConfig, RedisSubscription, Workflow,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Backend(String),
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create(&self, wf: Workflow) -> StoreResult<Workflow>;
    async fn update(&self, wf: Workflow) -> StoreResult<Workflow>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<Workflow>;
    async fn list(&self) -> StoreResult<Vec<Workflow>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Create the row in `running` state, stamping `started_at`.
    async fn create(&self, workflow_id: i64) -> StoreResult<Execution>;
    /// Mark the row finished with the terminal status and optional error.
    async fn finish(&self, id: i64, status: &str, error: &str) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<Execution>;
    async fn list_by_workflow(&self, workflow_id: i64) -> StoreResult<Vec<Execution>>;
    async fn global_stats(&self) -> StoreResult<GlobalStats>;
    async fn day_stats(&self, days: u32) -> StoreResult<Vec<DayStat>>;
}

#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    async fn append(&self, log: ExecutionLog) -> StoreResult<ExecutionLog>;
    async fn list_by_execution(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLog>>;
}

#[async_trait]
pub trait NodeConfigStore: Send + Sync {
    async fn create(&self, cfg: NodeConfig) -> StoreResult<NodeConfig>;
    async fn update(&self, cfg: NodeConfig) -> StoreResult<NodeConfig>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<NodeConfig>;
    async fn list(&self) -> StoreResult<Vec<NodeConfig>>;
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Value for a key, if present.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn get_entry(&self, key: &str) -> StoreResult<ConfigStoreEntry>;
    /// Upsert; preserves `created_at` on update.
    async fn set(&self, key: &str, value: &str, description: &str) -> StoreResult<ConfigStoreEntry>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
    async fn list(&self) -> StoreResult<Vec<ConfigStoreEntry>>;
}

#[async_trait]
pub trait CronScheduleStore: Send + Sync {
    async fn create(&self, s: CronSchedule) -> StoreResult<CronSchedule>;
    async fn update(&self, s: CronSchedule) -> StoreResult<CronSchedule>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<CronSchedule>;
    async fn list(&self) -> StoreResult<Vec<CronSchedule>>;
    async fn list_enabled(&self) -> StoreResult<Vec<CronSchedule>>;
    async fn update_last_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait RedisSubscriptionStore: Send + Sync {
    async fn create(&self, s: RedisSubscription) -> StoreResult<RedisSubscription>;
    async fn update(&self, s: RedisSubscription) -> StoreResult<RedisSubscription>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<RedisSubscription>;
    async fn list(&self) -> StoreResult<Vec<RedisSubscription>>;
    async fn list_enabled(&self) -> StoreResult<Vec<RedisSubscription>>;
    async fn increment_msg_count(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait EmailTriggerStore: Send + Sync {
    async fn create(&self, t: EmailTrigger) -> StoreResult<EmailTrigger>;
    async fn update(&self, t: EmailTrigger) -> StoreResult<EmailTrigger>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<EmailTrigger>;
    async fn list(&self) -> StoreResult<Vec<EmailTrigger>>;
    async fn list_enabled(&self) -> StoreResult<Vec<EmailTrigger>>;
    async fn increment_msg_count(&self, id: i64) -> StoreResult<()>;
    async fn update_last_poll(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait HttpTriggerStore: Send + Sync {
    async fn create(&self, t: HttpTrigger) -> StoreResult<HttpTrigger>;
    async fn update(&self, t: HttpTrigger) -> StoreResult<HttpTrigger>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
    async fn get_by_id(&self, id: i64) -> StoreResult<HttpTrigger>;
    async fn list(&self) -> StoreResult<Vec<HttpTrigger>>;
    /// Lookup among enabled triggers only.
    async fn find_by_path_and_method(&self, path: &str, method: &str) -> StoreResult<HttpTrigger>;
}

/// Aggregate execution metrics over completed runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GlobalStats {
    #[serde(rename = "totalCount")]
    pub total_count: i64,
    #[serde(rename = "totalDurationSec")]
    pub total_duration_sec: f64,
    #[serde(rename = "avgDurationSec")]
    pub avg_duration_sec: f64,
    #[serde(rename = "minDurationSec")]
    pub min_duration_sec: f64,
    #[serde(rename = "maxDurationSec")]
    pub max_duration_sec: f64,
}

/// Per-day execution count and duration for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DayStat {
    pub date: String,
    pub count: i64,
    #[serde(rename = "avgDurationSec")]
    pub avg_duration_sec: f64,
    #[serde(rename = "totalDurationSec")]
    pub total_duration_sec: f64,
}

/// Every store handle the engine, the supervisors, and the API share.
/// Cloning is cheap (all `Arc`s).
#[derive(Clone)]
pub struct Stores {
    pub workflows: std::sync::Arc<dyn WorkflowStore>,
    pub executions: std::sync::Arc<dyn ExecutionStore>,
    pub execution_logs: std::sync::Arc<dyn ExecutionLogStore>,
    pub node_configs: std::sync::Arc<dyn NodeConfigStore>,
    pub config_store: std::sync::Arc<dyn ConfigStore>,
    pub cron_schedules: std::sync::Arc<dyn CronScheduleStore>,
    pub redis_subscriptions: std::sync::Arc<dyn RedisSubscriptionStore>,
    pub email_triggers: std::sync::Arc<dyn EmailTriggerStore>,
    pub http_triggers: std::sync::Arc<dyn HttpTriggerStore>,
}

impl Stores {
    /// Wire every trait to a single shared in-memory store.
    pub fn in_memory() -> Self {
        let store = std::sync::Arc::new(memory::MemoryStore::new());
        Stores {
            workflows: store.clone(),
            executions: store.clone(),
            execution_logs: store.clone(),
            node_configs: store.clone(),
            config_store: store.clone(),
            cron_schedules: store.clone(),
            redis_subscriptions: store.clone(),
            email_triggers: store.clone(),
            http_triggers: store,
        }
    }
}
