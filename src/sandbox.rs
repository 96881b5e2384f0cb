//! Embedded JavaScript sandbox for the `function` node, built on `boa_engine`.
//!
//! Protocol: the node input is injected as the global `input`; the user
//! script communicates its result by assigning `returnValue`. A script that
//! leaves `returnValue` undefined stops the current path.
//!
//! Each evaluation gets a fresh `Context` on a blocking thread; the caller's
//! wall-clock timeout wraps the whole evaluation, and boa's runtime limits
//! bound runaway loops and recursion inside it.

use std::time::Duration;

use boa_engine::{Context, Source};
use serde_json::Value;

use crate::error::NodeError;
use crate::model::JsonMap;

const LOOP_ITERATION_LIMIT: u64 = 10_000_000;
const RECURSION_LIMIT: usize = 512;

/// Result of one script evaluation. `None` means `returnValue` was left
/// undefined.
#[derive(Debug)]
pub struct ScriptOutcome {
    pub return_value: Option<Value>,
}

/// Run `code` with `input` bound as a global, bounded by `timeout`.
pub async fn run_script(
    code: &str,
    input: &JsonMap,
    timeout: Duration,
) -> Result<ScriptOutcome, NodeError> {
    let code = code.to_string();
    let input_json = serde_json::to_string(&Value::Object(input.clone()))?;

    let eval = tokio::task::spawn_blocking(move || eval_blocking(&code, &input_json));
    match tokio::time::timeout(timeout, eval).await {
        Ok(joined) => joined.map_err(|e| NodeError::Sandbox(format!("sandbox thread: {e}")))?,
        Err(_) => Err(NodeError::Timeout),
    }
}

fn eval_blocking(code: &str, input_json: &str) -> Result<ScriptOutcome, NodeError> {
    let mut context = Context::default();
    context.runtime_limits_mut().set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    context.runtime_limits_mut().set_recursion_limit(RECURSION_LIMIT);

    // Inject the input without string-escaping pitfalls: parse it from a
    // JSON literal embedded as a JS string.
    let bootstrap = format!("var input = JSON.parse({});", js_string_literal(input_json));
    context
        .eval(Source::from_bytes(&bootstrap))
        .map_err(|e| NodeError::Sandbox(format!("failed to inject input: {e}")))?;

    context
        .eval(Source::from_bytes(code))
        .map_err(|e| NodeError::Sandbox(e.to_string()))?;

    let has_return = context
        .eval(Source::from_bytes("typeof returnValue !== 'undefined'"))
        .map_err(|e| NodeError::Sandbox(format!("failed to inspect returnValue: {e}")))?;
    if !has_return.as_boolean().unwrap_or(false) {
        return Ok(ScriptOutcome { return_value: None });
    }

    let serialized = context
        .eval(Source::from_bytes("JSON.stringify(returnValue)"))
        .map_err(|e| NodeError::Sandbox(format!("failed to serialize returnValue: {e}")))?;
    let Some(text) = serialized.as_string().map(|s| s.to_std_string_escaped()) else {
        // JSON.stringify yields undefined for functions and symbols.
        return Ok(ScriptOutcome { return_value: None });
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| NodeError::Sandbox(format!("returnValue is not valid JSON: {e}")))?;
    Ok(ScriptOutcome {
        return_value: Some(value),
    })
}

/// Encode arbitrary text as a double-quoted JS string literal.
fn js_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
