//! Thin Front-End (§4.E)
//!
//! Axum handlers wrapping the scheduler. Each endpoint does the minimum
//! translation between HTTP and the scheduler's API; none of them hold
//! business logic of their own.

use std::sync::{Arc, OnceLock};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SubmitError;
use crate::route::parse_display_date;
use crate::scheduler::Scheduler;
use crate::types::{ApiResponse, AuthCredentials, FormValues, MatrixParams};

fn train_model_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d+)\)\s*$").expect("valid regex"))
}

/// Extract the numeric model code trailing a train label, e.g.
/// `"Sundarban Express (726)"` -> `"726"`.
fn extract_train_model(raw: &str) -> Result<String, SubmitError> {
    train_model_regex()
        .captures(raw.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(SubmitError::MissingTrainModel)
}

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitForm {
    pub train: String,
    pub date: String,
    pub auth_token: Option<String>,
    pub device_key: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(form): Json<SubmitForm>,
) -> Result<Json<ApiResponse<Value>>, (StatusCode, Json<ApiResponse<Value>>)> {
    let bad_request = |err: SubmitError| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(err.to_string())),
        )
    };

    if form.train.trim().is_empty() {
        return Err(bad_request(SubmitError::MissingField("train")));
    }
    if form.date.trim().is_empty() {
        return Err(bad_request(SubmitError::MissingField("date")));
    }

    let model = extract_train_model(&form.train).map_err(bad_request)?;
    let journey_date = parse_display_date(&form.date).ok_or(SubmitError::InvalidDate);
    let journey_date = journey_date.map_err(bad_request)?;

    let auth = match (form.auth_token, form.device_key) {
        (Some(token), Some(device_key)) if !token.is_empty() && !device_key.is_empty() => {
            Some(AuthCredentials { token, device_key })
        }
        _ => None,
    };

    let params = MatrixParams {
        train_model: model,
        train_form_value: form.train.clone(),
        journey_date_display: form.date.clone(),
        journey_date_api: journey_date.format("%Y-%m-%d").to_string(),
        auth,
    };
    let form_values = FormValues {
        train: form.train,
        date: form.date,
    };

    let id = state
        .scheduler
        .submit(params, form_values)
        .map_err(bad_request)?;

    Ok(Json(ApiResponse::success(json!({ "request_id": id }))))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, StatusCode> {
    let mut status = state.scheduler.get_status(&id).ok_or(StatusCode::NOT_FOUND)?;

    // Completed results carry their payload via /result, not /status; the
    // peek here is only so a failed request's message survives a status
    // poll without being consumed.
    if status.error_message.is_none() {
        if let Some(crate::types::MatrixOutcome::Failure { error }) =
            state.scheduler.peek_result(&id)
        {
            status.error_message = Some(error);
        }
    }

    Ok(Json(ApiResponse::success(serde_json::to_value(status).unwrap())))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Value>> {
    let cancelled = state.scheduler.cancel(&id);
    Json(ApiResponse::success(json!({ "cancelled": cancelled })))
}

/// Always answers 204, per spec: this is the `navigator.sendBeacon`
/// fire-and-forget endpoint, there's no client left to read a body.
pub async fn cancel_beacon(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.scheduler.cancel(&id);
    StatusCode::NO_CONTENT
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ApiResponse<Value>> {
    let active = state.scheduler.heartbeat(&id);
    Json(ApiResponse::success(json!({ "active": active })))
}

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Value>>, StatusCode> {
    let outcome = state.scheduler.get_result(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ApiResponse::success(serde_json::to_value(outcome).unwrap())))
}

pub async fn stats(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(
        serde_json::to_value(state.scheduler.stats()).unwrap(),
    ))
}

pub async fn cleanup(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let removed = state.scheduler.force_cleanup();
    Json(ApiResponse::success(json!({ "removed": removed })))
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
}

pub async fn health() -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
