//! End-to-end engine scenarios: full traversals against the in-memory
//! store with the default node registry.

use std::sync::Arc;

use serde_json::{json, Value};

use weir::engine::{debug_channel, Engine, RunOptions};
use weir::model::{Definition, JsonMap, Workflow};
use weir::nodes::registry::create_default_registry;
use weir::store::{ConfigStore, ExecutionLogStore, ExecutionStore, Stores, WorkflowStore};

fn engine() -> (Engine, Stores) {
    let stores = Stores::in_memory();
    let registry = Arc::new(create_default_registry());
    (Engine::new(stores.clone(), registry), stores)
}

fn definition(v: Value) -> Definition {
    serde_json::from_value(v).expect("definition literal")
}

async fn saved_workflow(stores: &Stores, name: &str, def: Value) -> Workflow {
    stores
        .workflows
        .create(Workflow {
            id: 0,
            name: name.to_string(),
            description: String::new(),
            definition: definition(def),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .expect("create workflow")
}

fn obj(v: Value) -> JsonMap {
    v.as_object().cloned().unwrap()
}

#[tokio::test]
async fn linear_run_completes_with_one_log_per_node() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "linear",
        json!({
            "nodes": [
                {"id": "n1", "type": "start", "label": "Start"},
                {"id": "n2", "type": "delay", "label": "Delay", "properties": {"durationMs": 10}},
                {"id": "n3", "type": "log", "label": "Log", "properties": {"message": "hi"}},
                {"id": "n4", "type": "end", "label": "End"}
            ],
            "edges": [
                {"id": "e1", "source": "n1", "target": "n2"},
                {"id": "e2", "source": "n2", "target": "n3"},
                {"id": "e3", "source": "n3", "target": "n4"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "completed");

    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert_eq!(exec.status, "completed");
    assert!(exec.finished_at.is_some());

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    assert_eq!(logs.len(), 4);
    assert!(logs.iter().all(|l| l.status == "success"));
    // Traversal order, with non-decreasing timestamps.
    let ids: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(ids, ["n1", "n2", "n3", "n4"]);
    assert!(logs.windows(2).all(|w| w[0].executed_at <= w[1].executed_at));
}

#[tokio::test]
async fn condition_branch_follows_only_the_matching_edge() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "branch",
        json!({
            "nodes": [
                {"id": "entry", "type": "start", "label": "Start"},
                {"id": "check", "type": "condition", "label": "Check",
                 "properties": {"expression": "x > 3"}},
                {"id": "big", "type": "log", "label": "Big", "properties": {"message": "big"}},
                {"id": "small", "type": "log", "label": "Small", "properties": {"message": "small"}},
                {"id": "done", "type": "end", "label": "End"}
            ],
            "edges": [
                {"id": "e1", "source": "entry", "target": "check"},
                {"id": "e2", "source": "check", "target": "big", "sourceHandle": "true"},
                {"id": "e3", "source": "check", "target": "small", "sourceHandle": "false"},
                {"id": "e4", "source": "big", "target": "done"},
                {"id": "e5", "source": "small", "target": "done"}
            ]
        }),
    )
    .await;

    let outcome = engine
        .run_workflow_with_input(&wf, Some(obj(json!({"x": 5}))))
        .await
        .unwrap();
    assert_eq!(outcome.status, "completed");

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let visited: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(visited, ["entry", "check", "big", "done"]);

    // The end node sees the condition's result and the original input.
    let end_log = logs.last().unwrap();
    let end_input: Value = serde_json::from_str(&end_log.input).unwrap();
    assert_eq!(end_input["_branch"], json!("true"));
    assert_eq!(end_input["result"], json!(true));
    assert_eq!(end_input["x"], json!(5));
}

#[tokio::test]
async fn switch_routes_to_default_when_nothing_matches() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "switch-default",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "sw", "type": "switch", "label": "Switch",
                 "properties": {"expression": "kind", "cases": [{"label": "a", "value": "alpha"}]}},
                {"id": "fallback", "type": "log", "label": "Fallback"},
                {"id": "matched", "type": "log", "label": "Matched"}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "sw"},
                {"id": "e2", "source": "sw", "target": "matched", "sourceHandle": "a"},
                {"id": "e3", "source": "sw", "target": "fallback", "label": "default"}
            ]
        }),
    )
    .await;

    let outcome = engine
        .run_workflow_with_input(&wf, Some(obj(json!({"kind": "other"}))))
        .await
        .unwrap();
    assert_eq!(outcome.status, "completed");

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let visited: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(visited, ["s", "sw", "fallback"]);
}

#[tokio::test]
async fn function_stop_suppresses_children_without_failing() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "stop",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "f", "type": "function", "label": "Gate",
                 "properties": {"code": "var nothing = 1;"}},
                {"id": "after", "type": "log", "label": "After"}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "f"},
                {"id": "e2", "source": "f", "target": "after"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "completed");
    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let visited: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(visited, ["s", "f"]);
}

#[tokio::test]
async fn continue_node_waits_for_its_rendezvous() {
    let (engine, stores) = engine();
    // start fans out to a slow path (delay -> marker) and a continue node
    // that waits on the marker; downstream of continue must run after it.
    let wf = saved_workflow(
        &stores,
        "rendezvous",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "c", "type": "continue", "label": "Join",
                 "properties": {"after_node_id": "marker"}},
                {"id": "d", "type": "delay", "label": "Slow", "properties": {"durationMs": 5}},
                {"id": "marker", "type": "log", "label": "Marker"},
                {"id": "tail", "type": "end", "label": "Tail"}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "c"},
                {"id": "e2", "source": "s", "target": "d"},
                {"id": "e3", "source": "d", "target": "marker"},
                {"id": "e4", "source": "c", "target": "tail"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "completed", "error: {:?}", outcome.error);

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let visited: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    let pos = |id: &str| visited.iter().position(|v| *v == id).unwrap();
    assert!(pos("marker") < pos("c"), "continue ran before its rendezvous: {visited:?}");
    assert!(pos("c") < pos("tail"));
    // Visited exactly once.
    assert_eq!(visited.iter().filter(|v| **v == "c").count(), 1);
}

#[tokio::test]
async fn continue_node_waiting_on_unreachable_node_fails_the_run() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "unreachable",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "c", "type": "continue", "label": "Join",
                 "properties": {"after_node_id": "ghost"}}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "c"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "failed");
    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert!(exec.error.contains("ghost"), "error was: {}", exec.error);
}

#[tokio::test]
async fn empty_definition_fails_fast_without_an_execution_row() {
    let (engine, stores) = engine();
    let wf = saved_workflow(&stores, "empty", json!({"nodes": [], "edges": []})).await;

    assert!(engine.run_workflow(&wf).await.is_err());
    let execs = stores.executions.list_by_workflow(wf.id).await.unwrap();
    assert!(execs.is_empty());
}

#[tokio::test]
async fn missing_entry_node_fails_with_a_row_for_log_correlation() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "no-entry",
        json!({
            "nodes": [{"id": "l", "type": "log", "label": "Log"}],
            "edges": []
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "failed");
    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert_eq!(exec.status, "failed");
    assert!(exec.error.contains("no start node"));
}

#[tokio::test]
async fn unknown_node_type_fails_and_names_the_type() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "unknown-type",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "m", "type": "mystery", "label": "Mystery"}
            ],
            "edges": [{"id": "e1", "source": "s", "target": "m"}]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "failed");
    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert!(exec.error.contains("mystery"));

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    assert_eq!(logs.last().unwrap().status, "error");
}

#[tokio::test]
async fn node_failure_wraps_id_and_type_and_stops_traversal() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "failing",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "bad", "type": "condition", "label": "Bad",
                 "properties": {"expression": "zzz > 1"}},
                {"id": "after", "type": "log", "label": "After"}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "bad"},
                {"id": "e2", "source": "bad", "target": "after", "sourceHandle": "true"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "failed");

    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert!(exec.error.contains("node bad (condition) failed"), "error: {}", exec.error);

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let visited: Vec<&str> = logs.iter().map(|l| l.node_id.as_str()).collect();
    assert_eq!(visited, ["s", "bad"]);
}

#[tokio::test]
async fn config_snapshot_is_injected_into_every_node_input() {
    let (engine, stores) = engine();
    stores.config_store.set("api_token", "s3cret", "").await.unwrap();
    let wf = saved_workflow(
        &stores,
        "config",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "t", "type": "transform", "label": "T",
                 "properties": {"expression": "config.api_token"}}
            ],
            "edges": [{"id": "e1", "source": "s", "target": "t"}]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "completed");

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let out: Value = serde_json::from_str(&logs.last().unwrap().output).unwrap();
    assert_eq!(out["result"], json!("s3cret"));
}

#[tokio::test]
async fn subflow_failure_fails_the_parent_with_cross_navigation() {
    let (engine, stores) = engine();
    let child = saved_workflow(
        &stores,
        "C",
        json!({
            "nodes": [
                {"id": "cs", "type": "start", "label": "Start"},
                {"id": "boom", "type": "condition", "label": "Boom",
                 "properties": {"expression": "does_not_exist > 0"}}
            ],
            "edges": [{"id": "e1", "source": "cs", "target": "boom"}]
        }),
    )
    .await;

    let parent = saved_workflow(
        &stores,
        "P",
        json!({
            "nodes": [
                {"id": "ps", "type": "start", "label": "Start"},
                {"id": "sub", "type": "flow", "label": "Sub",
                 "properties": {"workflow_id": child.id, "pass_input": true}}
            ],
            "edges": [{"id": "e1", "source": "ps", "target": "sub"}]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&parent).await.unwrap();
    assert_eq!(outcome.status, "failed");

    let exec = stores.executions.get_by_id(outcome.execution_id).await.unwrap();
    assert!(exec.error.contains("sub-flow C failed"), "error: {}", exec.error);

    // The child got its own failed execution row, referenced from the
    // parent's step log error for cross-navigation.
    let child_execs = stores.executions.list_by_workflow(child.id).await.unwrap();
    assert_eq!(child_execs.len(), 1);
    assert_eq!(child_execs[0].status, "failed");

    let parent_logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let flow_log = parent_logs.iter().find(|l| l.node_id == "sub").unwrap();
    assert_eq!(flow_log.status, "error");
    assert!(flow_log.error.contains(&format!("execution {}", child_execs[0].id)));
}

#[tokio::test]
async fn subflow_success_reports_child_outcome() {
    let (engine, stores) = engine();
    let child = saved_workflow(
        &stores,
        "child-ok",
        json!({
            "nodes": [
                {"id": "cs", "type": "start", "label": "Start"},
                {"id": "ce", "type": "end", "label": "End"}
            ],
            "edges": [{"id": "e1", "source": "cs", "target": "ce"}]
        }),
    )
    .await;

    let parent = saved_workflow(
        &stores,
        "parent-ok",
        json!({
            "nodes": [
                {"id": "ps", "type": "start", "label": "Start"},
                {"id": "sub", "type": "flow", "label": "Sub",
                 "properties": {"workflow_id": child.id}}
            ],
            "edges": [{"id": "e1", "source": "ps", "target": "sub"}]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&parent).await.unwrap();
    assert_eq!(outcome.status, "completed");

    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    let flow_out: Value = serde_json::from_str(&logs.last().unwrap().output).unwrap();
    assert_eq!(flow_out["subflow_status"], json!("completed"));
    assert_eq!(flow_out["subflow_name"], json!("child-ok"));
    assert_eq!(flow_out["subflow_workflow_id"], json!(child.id));
}

#[tokio::test]
async fn debug_sink_receives_started_nodes_and_finished() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "debug",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "e", "type": "end", "label": "End"}
            ],
            "edges": [{"id": "e1", "source": "s", "target": "e"}]
        }),
    )
    .await;

    let (tx, mut rx) = debug_channel();
    let outcome = engine
        .run_with(
            &wf,
            RunOptions {
                debug: Some(tx),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, "completed");

    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    let kinds: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(kinds, ["started", "node", "node", "finished"]);
    assert_eq!(events[0].status, "running");
    assert_eq!(events[1].node_id, "s");
    assert_eq!(events.last().unwrap().status, "completed");
    assert!(events.iter().all(|e| e.execution_id == outcome.execution_id));
}

#[tokio::test]
async fn cyclic_definition_terminates_via_visited_set() {
    let (engine, stores) = engine();
    let wf = saved_workflow(
        &stores,
        "cycle",
        json!({
            "nodes": [
                {"id": "s", "type": "start", "label": "Start"},
                {"id": "a", "type": "log", "label": "A"},
                {"id": "b", "type": "log", "label": "B"}
            ],
            "edges": [
                {"id": "e1", "source": "s", "target": "a"},
                {"id": "e2", "source": "a", "target": "b"},
                {"id": "e3", "source": "b", "target": "a"}
            ]
        }),
    )
    .await;

    let outcome = engine.run_workflow(&wf).await.unwrap();
    assert_eq!(outcome.status, "completed");
    let logs = stores.execution_logs.list_by_execution(outcome.execution_id).await.unwrap();
    // Every node exactly once despite the a<->b cycle.
    assert_eq!(logs.len(), 3);
}
