use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use super::{bad_request, internal, store_error, ApiResult, AppState};
use crate::model::CronSchedule;
use crate::store::CronScheduleStore;
use crate::triggers::scheduler::{next_occurrence, parse_expression};

#[derive(Deserialize)]
pub struct CronScheduleDto {
    #[serde(rename = "workflowId")]
    pub workflow_id: i64,
    pub expression: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub enabled: bool,
}

impl CronScheduleDto {
    fn validate(&self) -> Result<croner::Cron, super::ApiError> {
        if self.expression.is_empty() {
            return Err(bad_request("expression is required"));
        }
        parse_expression(&self.expression)
            .map_err(|e| bad_request(format!("invalid cron expression: {e}")))
    }
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<CronSchedule>>> {
    let list = state.engine.stores().cron_schedules.list().await.map_err(store_error)?;
    Ok(Json(list))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CronSchedule>> {
    let s = state.engine.stores().cron_schedules.get_by_id(id).await.map_err(store_error)?;
    Ok(Json(s))
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<CronScheduleDto>,
) -> ApiResult<(StatusCode, Json<CronSchedule>)> {
    let cron = dto.validate()?;
    let timezone = if dto.timezone.is_empty() { "UTC".to_string() } else { dto.timezone };

    let schedule = state
        .engine
        .stores()
        .cron_schedules
        .create(CronSchedule {
            id: 0,
            workflow_id: dto.workflow_id,
            expression: dto.expression,
            timezone,
            enabled: dto.enabled,
            last_run_at: None,
            next_run_at: next_occurrence(&cron, Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    // Activate on the live scheduler.
    if schedule.enabled {
        state
            .scheduler
            .add_job(schedule.id, schedule.workflow_id, &schedule.expression)
            .await
            .map_err(|e| internal(format!("schedule created but failed to activate: {e}")))?;
    }

    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(dto): Json<CronScheduleDto>,
) -> ApiResult<Json<CronSchedule>> {
    let cron = dto.validate()?;
    let timezone = if dto.timezone.is_empty() { "UTC".to_string() } else { dto.timezone };

    let existing = state.engine.stores().cron_schedules.get_by_id(id).await.map_err(store_error)?;
    let schedule = state
        .engine
        .stores()
        .cron_schedules
        .update(CronSchedule {
            id,
            workflow_id: dto.workflow_id,
            expression: dto.expression,
            timezone,
            enabled: dto.enabled,
            last_run_at: existing.last_run_at,
            next_run_at: next_occurrence(&cron, Utc::now()),
            created_at: existing.created_at,
            updated_at: Utc::now(),
        })
        .await
        .map_err(store_error)?;

    if schedule.enabled {
        if let Err(e) = state
            .scheduler
            .add_job(schedule.id, schedule.workflow_id, &schedule.expression)
            .await
        {
            warn!(schedule_id = schedule.id, error = %e, "failed to reactivate schedule");
        }
    } else {
        state.scheduler.remove_job(schedule.id);
    }

    Ok(Json(schedule))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    // Remove from the live scheduler first.
    state.scheduler.remove_job(id);
    state.engine.stores().cron_schedules.delete(id).await.map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}
