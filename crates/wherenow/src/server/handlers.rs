//! Request handlers for the single `/` endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::{Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH, USER_AGENT},
        HeaderMap,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use super::{error::ApiError, AppState};
use crate::error::Error;
use crate::record::{now_iso8601, NewLocation, RecordPatch, ValidationError};
use crate::storage::clamp_limit;

/// Largest accepted request body, in bytes.
pub const MAX_BODY_BYTES: usize = 65_536;

type Params = Option<Query<HashMap<String, String>>>;

fn ok() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// `GET /`: liveness probes and the recent-locations list.
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
    params: Params,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = params.map(|Query(params)| params).unwrap_or_default();

    match params.get("ping").map(String::as_str) {
        Some("1") => return Ok(ok()),
        Some("auth") => {
            state.authorize(&headers)?;
            return Ok(ok());
        }
        _ => {}
    }

    state.authorize(&headers)?;
    let limit = clamp_limit(params.get("limit").map(|raw| parse_int_prefix(raw.as_str())));

    let log = state.log.clone();
    let entries = blocking(move || log.list_recent(limit)).await?;

    if entries.is_empty() {
        return Ok(Json(json!({ "error": "no_location_found" })).into_response());
    }
    Ok(Json(entries).into_response())
}

/// `POST /`: validate and append one location.
pub async fn create_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    state.authorize(&headers)?;
    let body = read_json(&headers, body).await?;
    let location = NewLocation::from_json(&body)?;

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let record = location.into_record(user_agent, &now_iso8601());
    let echo = json!({
        "ok": true,
        "id": record.id,
        "timestamp": record.timestamp,
        "label": record.label,
        "note": record.note,
        "category": record.category,
    });

    let log = state.log.clone();
    blocking(move || log.append(&record)).await?;
    Ok(Json(echo).into_response())
}

/// `PATCH /`: update label, note and category of a stored location.
pub async fn patch_location(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    state.authorize(&headers)?;
    let body = read_json(&headers, body).await?;
    let patch = RecordPatch::from_json(&body)?;

    if patch.is_noop() {
        return Ok(Json(json!({ "ok": true, "id": patch.id, "noop": true })).into_response());
    }

    let id = patch.id.clone();
    let log = state.log.clone();
    let entry = blocking(move || log.patch(&patch)).await?;

    let field = |key: &str| entry.get(key).cloned().unwrap_or(Value::Null);
    Ok(Json(json!({
        "ok": true,
        "id": id,
        "label": field("label"),
        "note": field("note"),
        "category": field("category"),
        "updatedAt": field("updatedAt"),
    }))
    .into_response())
}

/// Any method other than GET, POST and PATCH.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

/// Any path other than `/`.
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

impl AppState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if self.auth.verify(headers.get(AUTHORIZATION)) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}

/// Enforce the size limit, then parse the body as JSON.
///
/// A declared `Content-Length` over the limit is rejected before anything is
/// read; bodies without one are cut off at the limit.
async fn read_json(headers: &HeaderMap, body: Body) -> Result<Value, ApiError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_BYTES as u64) {
        return Err(ApiError::PayloadTooLarge);
    }

    let bytes = body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::PayloadTooLarge)?;
    serde_json::from_slice(&bytes).map_err(|_| ValidationError::InvalidJson.into())
}

/// Run blocking log I/O off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| Error::internal(format!("log task failed: {err}")))?
        .map_err(ApiError::from)
}

/// Integer value of a query parameter, read like a lenient integer cast:
/// optional leading whitespace and sign, then as many digits as there are.
/// Anything else reads as 0; overflow saturates.
fn parse_int_prefix(raw: &str) -> i64 {
    let s = raw.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    for digit in digits.bytes().take_while(u8::is_ascii_digit) {
        let d = i64::from(digit - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(d)
        } else {
            value.saturating_mul(10).saturating_add(d)
        };
    }
    value
}
