use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use super::{bad_request, internal, store_error, ApiResult, AppState};
use crate::model::RedisSubscription;
use crate::store::RedisSubscriptionStore;

#[derive(Deserialize)]
pub struct RedisSubscriptionDto {
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    #[serde(rename = "configId")]
    pub config_id: i64,
    pub channel: String,
    #[serde(rename = "isPattern", default)]
    pub is_pattern: bool,
    #[serde(default)]
    pub enabled: bool,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<RedisSubscription>>> {
    let list = state.engine.stores().redis_subscriptions.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RedisSubscription>> {
    let s = state.engine.stores().redis_subscriptions.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(s))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<RedisSubscriptionDto>,
) -> ApiResult<(StatusCode, Json<RedisSubscription>)> {
    if dto.channel.is_empty() {
        return Err(bad_request("channel is required"));
    }

    let sub = state
        .engine
        .stores()
        .redis_subscriptions
        .create(RedisSubscription {
            id: 0,
            workflow_id: dto.workflow_id,
            config_id: dto.config_id,
            channel: dto.channel,
            is_pattern: dto.is_pattern,
            enabled: dto.enabled,
            last_msg_at: None,
            msg_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    if sub.enabled {
        state
            .subscriber
            .add_subscription(&sub)
            .await
            .map_err(|e| internal(format!("subscription created but failed to activate: {e}")))?;
    }

    Ok((StatusCode::CREATED, Json(sub)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<RedisSubscriptionDto>,
) -> ApiResult<Json<RedisSubscription>> {
    if dto.channel.is_empty() {
        return Err(bad_request("channel is required"));
    }

    let existing = state
        .engine
        .stores()
        .redis_subscriptions
        .get_by_id(id)
        .await
        .map_err(store_error)?;
    let sub = state
        .engine
        .stores()
        .redis_subscriptions
        .update(RedisSubscription {
            id,
            workflow_id: dto.workflow_id,
            config_id: dto.config_id,
            channel: dto.channel,
            is_pattern: dto.is_pattern,
            enabled: dto.enabled,
            last_msg_at: existing.last_msg_at,
            msg_count: existing.msg_count,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    if sub.enabled {
        if let Err(e) = state.subscriber.add_subscription(&sub).await {
            warn!(subscription_id = sub.id, error = %e, "failed to reactivate subscription");
        }
    } else {
        state.subscriber.remove_subscription(sub.id).await;
    }

    Ok(Json(sub))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.subscriber.remove_subscription(id).await;
    state.engine.stores().redis_subscriptions.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
