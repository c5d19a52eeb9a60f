//! Response envelopes and error translation.
//!
//! Success: `{success: true, message?, data}`. Error: `{success: false,
//! message, data: null, statusCode, timestamp}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;

pub fn success<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}

pub fn success_message<T: Serialize>(message: &str, data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": message,
        "data": data,
    }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::CREATED, success(data))
}

pub fn error_body(status: StatusCode, message: &str) -> Json<serde_json::Value> {
    Json(json!({
        "success": false,
        "message": message,
        "data": null,
        "statusCode": status.as_u16(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, error_body(status, &self.to_string())).into_response()
    }
}
