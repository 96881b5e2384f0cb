//! Expression language for the condition / switch / transform nodes.
//!
//! A small expression grammar evaluated over the raw input map (never over
//! placeholder-substituted strings — the two resolution paths are kept
//! separate on purpose):
//!
//! ```text
//! x > 3 && status == "open"
//! input.payload.user.id == 42
//! {statusCode: 201, body: input.payload}
//! amount * 1.2 + fees[0]
//! region in ["eu-west", "eu-north"]
//! ```
//!
//! Literals, dot-path identifiers, indexing, array/object literals,
//! comparison and logical operators with the cross-type coercion rules of
//! the condition evaluator (`"100" > 60` holds).

mod coerce;
mod eval;
mod parser;

pub use coerce::is_truthy;
pub use eval::evaluate_parsed;
pub use parser::{parse, Expr};

use serde_json::Value;

use crate::error::NodeError;
use crate::model::JsonMap;

/// Parse and evaluate `expression` against `env`.
pub fn evaluate(expression: &str, env: &JsonMap) -> Result<Value, NodeError> {
    let expr = parse(expression)?;
    evaluate_parsed(&expr, env)
}
