//! REST handlers: one per resource operation. The resource comes from router state.

use crate::error::AppError;
use crate::extractors::Principal;
use crate::resource::Upserted;
use crate::response::{created, Objects};
use crate::state::ResourceState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};

/// Path ids are digits only; anything else does not address an instance.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::NotFound(format!("no route for id {}", raw)));
    }
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("no route for id {}", raw)))
}

pub async fn read_many(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
) -> Result<Json<Objects>, AppError> {
    Ok(Json(state.resource.read_many(&ctx).await?))
}

pub async fn count(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
) -> Result<Json<u64>, AppError> {
    Ok(Json(state.resource.count(&ctx).await?))
}

pub async fn read_one(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.resource.read_one(&ctx, id).await?))
}

pub async fn create(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
    body: Bytes,
) -> Result<(StatusCode, Json<i64>), AppError> {
    let id = state.resource.create(&ctx, &body).await?;
    Ok(created(id))
}

pub async fn auto(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    Ok(match state.resource.upsert(&ctx, &body).await? {
        Upserted::Created(_) => StatusCode::CREATED,
        Upserted::Updated(_) => StatusCode::ACCEPTED,
    })
}

pub async fn update(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.resource.update(&ctx, id, &body).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete(
    State(state): State<ResourceState>,
    Principal(ctx): Principal,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.resource.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
