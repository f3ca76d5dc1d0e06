use super::{ApiJson, ApiPath, ApiQuery, AppState};
use crate::{
    model::{NewStatusUpdate, StatusUpdate, StatusUpdateCorrection},
    pagination::{Page, PageRequest},
    Caller, ContractId, Result, StatusUpdateId,
};
use axum::{extract::State, http::StatusCode, response::Json};

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewStatusUpdate>,
) -> Result<(StatusCode, Json<StatusUpdate>)> {
    let update = state.tracker.record(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(update)))
}

pub async fn get(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<StatusUpdateId>,
) -> Result<Json<StatusUpdate>> {
    Ok(Json(state.tracker.get(id).await?))
}

pub async fn timeline(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(contract_id): ApiPath<ContractId>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<StatusUpdate>>> {
    Ok(Json(state.tracker.timeline(contract_id, page).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<StatusUpdateId>,
    ApiJson(correction): ApiJson<StatusUpdateCorrection>,
) -> Result<Json<StatusUpdate>> {
    Ok(Json(state.tracker.correct(&caller, id, correction).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<StatusUpdateId>,
) -> Result<StatusCode> {
    state.tracker.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
