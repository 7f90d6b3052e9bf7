//! Wire response bodies.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{Map, Value};

/// Envelope for read-many: `{"objects": [...]}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Objects {
    pub objects: Vec<Map<String, Value>>,
}

/// 201 with the bare generated identity as body.
pub fn created(id: i64) -> (StatusCode, Json<i64>) {
    (StatusCode::CREATED, Json(id))
}

