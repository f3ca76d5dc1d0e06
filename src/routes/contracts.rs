use super::{ApiJson, ApiPath, ApiQuery, AppState};
use crate::{
    contracts::ContractFilter,
    model::{Contract, ContractUpdate, NewContract},
    pagination::{Page, PageRequest},
    Caller, ContractId, Result, ShipmentId,
};
use axum::{extract::State, http::StatusCode, response::Json};

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewContract>,
) -> Result<(StatusCode, Json<Contract>)> {
    let contract = state.contracts.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn list(
    State(state): State<AppState>,
    _caller: Caller,
    ApiQuery(filter): ApiQuery<ContractFilter>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Contract>>> {
    Ok(Json(state.contracts.list(&filter, page).await?))
}

pub async fn get(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<ContractId>,
) -> Result<Json<Contract>> {
    Ok(Json(state.contracts.get(id).await?))
}

pub async fn get_by_shipment(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(shipment_id): ApiPath<ShipmentId>,
) -> Result<Json<Contract>> {
    Ok(Json(state.contracts.get_by_shipment(shipment_id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ContractId>,
    ApiJson(update): ApiJson<ContractUpdate>,
) -> Result<Json<Contract>> {
    Ok(Json(state.contracts.update(&caller, id, update).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ContractId>,
) -> Result<StatusCode> {
    state.contracts.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
