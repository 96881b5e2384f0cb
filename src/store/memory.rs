//! In-memory reference store. Maps guarded by `parking_lot::RwLock`, ids
//! assigned from a single monotonic counter so log ordering follows insert
//! order even within one timestamp tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::{
    ConfigStore, CronScheduleStore, DayStat, EmailTriggerStore, ExecutionLogStore,
    ExecutionStore, GlobalStats, HttpTriggerStore, NodeConfigStore, RedisSubscriptionStore,
    StoreError, StoreResult, WorkflowStore,
};
use crate::model::{
    ConfigStoreEntry, CronSchedule, EmailTrigger, Execution, ExecutionLog, HttpTrigger,
    NodeConfig, RedisSubscription, Workflow,
};

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    workflows: RwLock<HashMap<i64, Workflow>>,
    executions: RwLock<HashMap<i64, Execution>>,
    execution_logs: RwLock<Vec<ExecutionLog>>,
    node_configs: RwLock<HashMap<i64, NodeConfig>>,
    config_entries: RwLock<HashMap<String, ConfigStoreEntry>>,
    cron_schedules: RwLock<HashMap<i64, CronSchedule>>,
    redis_subscriptions: RwLock<HashMap<i64, RedisSubscription>>,
    email_triggers: RwLock<HashMap<i64, EmailTrigger>>,
    http_triggers: RwLock<HashMap<i64, HttpTrigger>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn create(&self, mut wf: Workflow) -> StoreResult<Workflow> {
        wf.id = self.alloc_id();
        wf.created_at = Utc::now();
        wf.updated_at = wf.created_at;
        self.workflows.write().insert(wf.id, wf.clone());
        Ok(wf)
    }

    async fn update(&self, mut wf: Workflow) -> StoreResult<Workflow> {
        let mut map = self.workflows.write();
        let existing = map.get(&wf.id).ok_or(StoreError::NotFound)?;
        wf.created_at = existing.created_at;
        wf.updated_at = Utc::now();
        map.insert(wf.id, wf.clone());
        Ok(wf)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.workflows
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<Workflow> {
        self.workflows
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<Workflow>> {
        let mut list: Vec<_> = self.workflows.read().values().cloned().collect();
        list.sort_by_key(|w| w.id);
        Ok(list)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create(&self, workflow_id: i64) -> StoreResult<Execution> {
        let exec = Execution {
            id: self.alloc_id(),
            workflow_id,
            status: "running".to_string(),
            started_at: Utc::now(),
            finished_at: None,
            error: String::new(),
        };
        self.executions.write().insert(exec.id, exec.clone());
        Ok(exec)
    }

    async fn finish(&self, id: i64, status: &str, error: &str) -> StoreResult<()> {
        let mut map = self.executions.write();
        let exec = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        exec.status = status.to_string();
        exec.error = error.to_string();
        exec.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<Execution> {
        self.executions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_by_workflow(&self, workflow_id: i64) -> StoreResult<Vec<Execution>> {
        let mut list: Vec<_> = self
            .executions
            .read()
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(list)
    }

    async fn global_stats(&self) -> StoreResult<GlobalStats> {
        let durations: Vec<f64> = self
            .executions
            .read()
            .values()
            .filter_map(|e| {
                e.finished_at
                    .map(|f| (f - e.started_at).num_milliseconds() as f64 / 1000.0)
            })
            .collect();
        if durations.is_empty() {
            return Ok(GlobalStats::default());
        }
        let total: f64 = durations.iter().sum();
        Ok(GlobalStats {
            total_count: durations.len() as i64,
            total_duration_sec: total,
            avg_duration_sec: total / durations.len() as f64,
            min_duration_sec: durations.iter().cloned().fold(f64::INFINITY, f64::min),
            max_duration_sec: durations.iter().cloned().fold(0.0, f64::max),
        })
    }

    async fn day_stats(&self, days: u32) -> StoreResult<Vec<DayStat>> {
        let cutoff = Utc::now() - Duration::days(days as i64);
        let mut by_day: HashMap<String, (i64, f64)> = HashMap::new();
        for e in self.executions.read().values() {
            let finished = match e.finished_at {
                Some(f) => f,
                None => continue,
            };
            if e.started_at < cutoff {
                continue;
            }
            let day = e.started_at.format("%Y-%m-%d").to_string();
            let dur = (finished - e.started_at).num_milliseconds() as f64 / 1000.0;
            let slot = by_day.entry(day).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += dur;
        }
        let mut list: Vec<DayStat> = by_day
            .into_iter()
            .map(|(date, (count, total))| DayStat {
                date,
                count,
                avg_duration_sec: if count > 0 { total / count as f64 } else { 0.0 },
                total_duration_sec: total,
            })
            .collect();
        list.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(list)
    }
}

#[async_trait]
impl ExecutionLogStore for MemoryStore {
    async fn append(&self, mut log: ExecutionLog) -> StoreResult<ExecutionLog> {
        log.id = self.alloc_id();
        self.execution_logs.write().push(log.clone());
        Ok(log)
    }

    async fn list_by_execution(&self, execution_id: i64) -> StoreResult<Vec<ExecutionLog>> {
        Ok(self
            .execution_logs
            .read()
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NodeConfigStore for MemoryStore {
    async fn create(&self, mut cfg: NodeConfig) -> StoreResult<NodeConfig> {
        cfg.id = self.alloc_id();
        cfg.created_at = Utc::now();
        cfg.updated_at = cfg.created_at;
        self.node_configs.write().insert(cfg.id, cfg.clone());
        Ok(cfg)
    }

    async fn update(&self, mut cfg: NodeConfig) -> StoreResult<NodeConfig> {
        let mut map = self.node_configs.write();
        let existing = map.get(&cfg.id).ok_or(StoreError::NotFound)?;
        cfg.created_at = existing.created_at;
        cfg.updated_at = Utc::now();
        map.insert(cfg.id, cfg.clone());
        Ok(cfg)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.node_configs
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<NodeConfig> {
        self.node_configs
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<NodeConfig>> {
        let mut list: Vec<_> = self.node_configs.read().values().cloned().collect();
        list.sort_by_key(|c| c.id);
        Ok(list)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.config_entries.read().get(key).map(|e| e.value.clone()))
    }

    async fn get_entry(&self, key: &str) -> StoreResult<ConfigStoreEntry> {
        self.config_entries
            .read()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn set(&self, key: &str, value: &str, description: &str) -> StoreResult<ConfigStoreEntry> {
        let mut map = self.config_entries.write();
        let now = Utc::now();
        let entry = match map.get(key) {
            Some(existing) => ConfigStoreEntry {
                key: key.to_string(),
                value: value.to_string(),
                description: description.to_string(),
                created_at: existing.created_at,
                updated_at: now,
            },
            None => ConfigStoreEntry {
                key: key.to_string(),
                value: value.to_string(),
                description: description.to_string(),
                created_at: now,
                updated_at: now,
            },
        };
        map.insert(key.to_string(), entry.clone());
        Ok(entry)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.config_entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<ConfigStoreEntry>> {
        let mut list: Vec<_> = self.config_entries.read().values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(list)
    }
}

#[async_trait]
impl CronScheduleStore for MemoryStore {
    async fn create(&self, mut s: CronSchedule) -> StoreResult<CronSchedule> {
        s.id = self.alloc_id();
        s.created_at = Utc::now();
        s.updated_at = s.created_at;
        self.cron_schedules.write().insert(s.id, s.clone());
        Ok(s)
    }

    async fn update(&self, mut s: CronSchedule) -> StoreResult<CronSchedule> {
        let mut map = self.cron_schedules.write();
        let existing = map.get(&s.id).ok_or(StoreError::NotFound)?;
        s.created_at = existing.created_at;
        s.updated_at = Utc::now();
        map.insert(s.id, s.clone());
        Ok(s)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.cron_schedules
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<CronSchedule> {
        self.cron_schedules
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<CronSchedule>> {
        let mut list: Vec<_> = self.cron_schedules.read().values().cloned().collect();
        list.sort_by_key(|s| s.id);
        Ok(list)
    }

    async fn list_enabled(&self) -> StoreResult<Vec<CronSchedule>> {
        let mut list: Vec<_> = self
            .cron_schedules
            .read()
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        list.sort_by_key(|s| s.id);
        Ok(list)
    }

    async fn update_last_run(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut map = self.cron_schedules.write();
        let s = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        s.last_run_at = Some(last_run_at);
        s.next_run_at = next_run_at;
        s.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RedisSubscriptionStore for MemoryStore {
    async fn create(&self, mut s: RedisSubscription) -> StoreResult<RedisSubscription> {
        s.id = self.alloc_id();
        s.created_at = Utc::now();
        s.updated_at = s.created_at;
        self.redis_subscriptions.write().insert(s.id, s.clone());
        Ok(s)
    }

    async fn update(&self, mut s: RedisSubscription) -> StoreResult<RedisSubscription> {
        let mut map = self.redis_subscriptions.write();
        let existing = map.get(&s.id).ok_or(StoreError::NotFound)?;
        s.created_at = existing.created_at;
        s.msg_count = existing.msg_count;
        s.updated_at = Utc::now();
        map.insert(s.id, s.clone());
        Ok(s)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.redis_subscriptions
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<RedisSubscription> {
        self.redis_subscriptions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<RedisSubscription>> {
        let mut list: Vec<_> = self.redis_subscriptions.read().values().cloned().collect();
        list.sort_by_key(|s| s.id);
        Ok(list)
    }

    async fn list_enabled(&self) -> StoreResult<Vec<RedisSubscription>> {
        let mut list: Vec<_> = self
            .redis_subscriptions
            .read()
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        list.sort_by_key(|s| s.id);
        Ok(list)
    }

    async fn increment_msg_count(&self, id: i64) -> StoreResult<()> {
        let mut map = self.redis_subscriptions.write();
        let s = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        s.msg_count += 1;
        s.last_msg_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl EmailTriggerStore for MemoryStore {
    async fn create(&self, mut t: EmailTrigger) -> StoreResult<EmailTrigger> {
        t.id = self.alloc_id();
        t.created_at = Utc::now();
        t.updated_at = t.created_at;
        self.email_triggers.write().insert(t.id, t.clone());
        Ok(t)
    }

    async fn update(&self, mut t: EmailTrigger) -> StoreResult<EmailTrigger> {
        let mut map = self.email_triggers.write();
        let existing = map.get(&t.id).ok_or(StoreError::NotFound)?;
        t.created_at = existing.created_at;
        t.msg_count = existing.msg_count;
        t.updated_at = Utc::now();
        map.insert(t.id, t.clone());
        Ok(t)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.email_triggers
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<EmailTrigger> {
        self.email_triggers
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<EmailTrigger>> {
        let mut list: Vec<_> = self.email_triggers.read().values().cloned().collect();
        list.sort_by_key(|t| t.id);
        Ok(list)
    }

    async fn list_enabled(&self) -> StoreResult<Vec<EmailTrigger>> {
        let mut list: Vec<_> = self
            .email_triggers
            .read()
            .values()
            .filter(|t| t.enabled)
            .cloned()
            .collect();
        list.sort_by_key(|t| t.id);
        Ok(list)
    }

    async fn increment_msg_count(&self, id: i64) -> StoreResult<()> {
        let mut map = self.email_triggers.write();
        let t = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        t.msg_count += 1;
        Ok(())
    }

    async fn update_last_poll(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut map = self.email_triggers.write();
        let t = map.get_mut(&id).ok_or(StoreError::NotFound)?;
        t.last_poll_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl HttpTriggerStore for MemoryStore {
    async fn create(&self, mut t: HttpTrigger) -> StoreResult<HttpTrigger> {
        t.id = self.alloc_id();
        t.created_at = Utc::now();
        t.updated_at = t.created_at;
        self.http_triggers.write().insert(t.id, t.clone());
        Ok(t)
    }

    async fn update(&self, mut t: HttpTrigger) -> StoreResult<HttpTrigger> {
        let mut map = self.http_triggers.write();
        let existing = map.get(&t.id).ok_or(StoreError::NotFound)?;
        t.created_at = existing.created_at;
        t.updated_at = Utc::now();
        map.insert(t.id, t.clone());
        Ok(t)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.http_triggers
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<HttpTrigger> {
        self.http_triggers
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<HttpTrigger>> {
        let mut list: Vec<_> = self.http_triggers.read().values().cloned().collect();
        list.sort_by_key(|t| t.id);
        Ok(list)
    }

    async fn find_by_path_and_method(&self, path: &str, method: &str) -> StoreResult<HttpTrigger> {
        self.http_triggers
            .read()
            .values()
            .find(|t| t.enabled && t.path == path && t.method.eq_ignore_ascii_case(method))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Definition;

    fn workflow(name: &str) -> Workflow {
        Workflow {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            definition: Definition::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_workflow_crud() {
        let store = MemoryStore::new();
        let wf = WorkflowStore::create(&store, workflow("a")).await.unwrap();
        assert!(wf.id > 0);

        let mut updated = wf.clone();
        updated.name = "b".to_string();
        let updated = WorkflowStore::update(&store, updated).await.unwrap();
        assert_eq!(updated.name, "b");
        assert_eq!(updated.created_at, wf.created_at);

        WorkflowStore::delete(&store, wf.id).await.unwrap();
        assert!(matches!(
            WorkflowStore::get_by_id(&store, wf.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_execution_lifecycle_and_logs() {
        let store = MemoryStore::new();
        let exec = ExecutionStore::create(&store, 7).await.unwrap();
        assert_eq!(exec.status, "running");

        ExecutionStore::finish(&store, exec.id, "completed", "").await.unwrap();
        let exec = ExecutionStore::get_by_id(&store, exec.id).await.unwrap();
        assert_eq!(exec.status, "completed");
        assert!(exec.finished_at.is_some());

        for node_id in ["n1", "n2"] {
            ExecutionLogStore::append(
                &store,
                ExecutionLog {
                    id: 0,
                    execution_id: exec.id,
                    node_id: node_id.to_string(),
                    node_type: "log".to_string(),
                    status: "success".to_string(),
                    input: "{}".to_string(),
                    output: "{}".to_string(),
                    error: String::new(),
                    executed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }
        let logs = ExecutionLogStore::list_by_execution(&store, exec.id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].node_id, "n1");

        let stats = ExecutionStore::global_stats(&store).await.unwrap();
        assert_eq!(stats.total_count, 1);
    }

    #[tokio::test]
    async fn test_config_store_upsert_preserves_created_at() {
        let store = MemoryStore::new();
        let first = ConfigStore::set(&store, "token", "abc", "").await.unwrap();
        let second = ConfigStore::set(&store, "token", "def", "api token").await.unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(ConfigStore::get(&store, "token").await.unwrap().as_deref(), Some("def"));
        assert_eq!(ConfigStore::get(&store, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_http_trigger_lookup_ignores_disabled() {
        let store = MemoryStore::new();
        let t = HttpTriggerStore::create(
            &store,
            HttpTrigger {
                id: 0,
                workflow_id: 1,
                path: "hook".to_string(),
                method: "POST".to_string(),
                enabled: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        assert!(HttpTriggerStore::find_by_path_and_method(&store, "hook", "POST").await.is_err());

        let mut enabled = t.clone();
        enabled.enabled = true;
        HttpTriggerStore::update(&store, enabled).await.unwrap();
        let found = HttpTriggerStore::find_by_path_and_method(&store, "hook", "post").await.unwrap();
        assert_eq!(found.id, t.id);
    }
}
