//! Supervisor behavior against the in-memory store: cron firing under
//! virtual time, idempotent registration, and operational-error isolation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use weir::engine::Engine;
use weir::model::{RedisSubscription, Workflow};
use weir::nodes::registry::create_default_registry;
use weir::store::{
    CronScheduleStore, ExecutionStore, NodeConfigStore, RedisSubscriptionStore, Stores,
    WorkflowStore,
};
use weir::triggers::redis_subscriber::RedisSubscriber;
use weir::triggers::scheduler::CronScheduler;

fn engine() -> (Engine, Stores) {
    let stores = Stores::in_memory();
    let registry = Arc::new(create_default_registry());
    (Engine::new(stores.clone(), registry), stores)
}

async fn linear_workflow(stores: &Stores) -> Workflow {
    stores
        .workflows
        .create(Workflow {
            id: 0,
            name: "scheduled".to_string(),
            description: String::new(),
            definition: serde_json::from_value(json!({
                "nodes": [
                    {"id": "s", "type": "start", "label": "Start"},
                    {"id": "e", "type": "end", "label": "End"}
                ],
                "edges": [{"id": "e1", "source": "s", "target": "e"}]
            }))
            .unwrap(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cron_schedule_fires_and_updates_run_times() {
    let (engine, stores) = engine();
    let wf = linear_workflow(&stores).await;

    let schedule = stores
        .cron_schedules
        .create(serde_json::from_value(json!({
            "workflowId": wf.id,
            "expression": "* * * * *",
            "timezone": "UTC",
            "enabled": true
        })).unwrap())
        .await
        .unwrap();

    let scheduler = CronScheduler::new(engine);
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.active_jobs(), 1);

    // Virtual time auto-advances through the sleep to the next minute
    // boundary; wait until the firing shows up.
    let mut fired = false;
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if !stores.executions.list_by_workflow(wf.id).await.unwrap().is_empty() {
            fired = true;
            break;
        }
    }
    scheduler.stop().await;
    assert!(fired, "schedule never fired under virtual time");

    let executions = stores.executions.list_by_workflow(wf.id).await.unwrap();
    assert_eq!(executions.last().unwrap().status, "completed");

    let reloaded = stores.cron_schedules.get_by_id(schedule.id).await.unwrap();
    assert!(reloaded.last_run_at.is_some());
    let next = reloaded.next_run_at.expect("nextRunAt set");
    assert!(next > reloaded.last_run_at.unwrap());
}

#[tokio::test]
async fn scheduler_reload_rebuilds_the_enabled_set() {
    let (engine, stores) = engine();
    let wf = linear_workflow(&stores).await;

    for (expr, enabled) in [("@daily", true), ("@hourly", false), ("*/10 * * * *", true)] {
        stores
            .cron_schedules
            .create(serde_json::from_value(json!({
                "workflowId": wf.id,
                "expression": expr,
                "enabled": enabled
            })).unwrap())
            .await
            .unwrap();
    }

    let scheduler = CronScheduler::new(engine);
    scheduler.start().await.unwrap();
    assert_eq!(scheduler.active_jobs(), 2);

    scheduler.reload().await.unwrap();
    assert_eq!(scheduler.active_jobs(), 2);
    scheduler.stop().await;
}

#[tokio::test]
async fn subscription_with_missing_config_fails_without_killing_the_supervisor() {
    let (engine, stores) = engine();
    let wf = linear_workflow(&stores).await;

    let sub: RedisSubscription = serde_json::from_value(json!({
        "id": 0,
        "workflowId": wf.id,
        "configId": 9999,
        "channel": "events/*",
        "isPattern": true,
        "enabled": true
    }))
    .unwrap();
    let sub = stores.redis_subscriptions.create(sub).await.unwrap();

    let subscriber = RedisSubscriber::new(engine);
    assert!(subscriber.add_subscription(&sub).await.is_err());
    assert_eq!(subscriber.active_subscriptions(), 0);

    // start() logs the failure and keeps going.
    subscriber.start().await.unwrap();
    assert_eq!(subscriber.active_subscriptions(), 0);
    subscriber.stop().await;
}

#[tokio::test]
async fn subscription_rejects_non_redis_config() {
    let (engine, stores) = engine();
    let wf = linear_workflow(&stores).await;
    let cfg = stores
        .node_configs
        .create(serde_json::from_value(json!({
            "id": 0, "name": "mail", "type": "email", "config": {}
        })).unwrap())
        .await
        .unwrap();

    let sub = stores
        .redis_subscriptions
        .create(serde_json::from_value(json!({
            "id": 0,
            "workflowId": wf.id,
            "configId": cfg.id,
            "channel": "events",
            "isPattern": false,
            "enabled": true
        })).unwrap())
        .await
        .unwrap();

    let subscriber = RedisSubscriber::new(engine);
    let err = subscriber.add_subscription(&sub).await.unwrap_err();
    assert!(err.contains("not redis type"));
}
