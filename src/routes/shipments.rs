use super::{ApiJson, ApiPath, ApiQuery, AppState};
use crate::{
    model::{NewShipment, Shipment, ShipmentDetails, ShipmentListing, ShipmentUpdate},
    pagination::{Page, PageRequest},
    shipments::{ShipmentFilter, ShipmentSearch},
    Caller, Result, ShipmentId,
};
use axum::{extract::State, http::StatusCode, response::Json};

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewShipment>,
) -> Result<(StatusCode, Json<Shipment>)> {
    let shipment = state.shipments.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

pub async fn list(
    State(state): State<AppState>,
    _caller: Caller,
    ApiQuery(filter): ApiQuery<ShipmentFilter>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Shipment>>> {
    Ok(Json(state.shipments.list(&filter, page).await?))
}

/// Public discovery; no bearer token required.
pub async fn search(
    State(state): State<AppState>,
    ApiQuery(search): ApiQuery<ShipmentSearch>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<ShipmentListing>>> {
    Ok(Json(state.shipments.search(&search, page).await?))
}

pub async fn get(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<ShipmentId>,
) -> Result<Json<Shipment>> {
    Ok(Json(state.shipments.get(id).await?))
}

pub async fn details(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<ShipmentId>,
) -> Result<Json<ShipmentDetails>> {
    Ok(Json(state.shipments.details(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ShipmentId>,
    ApiJson(update): ApiJson<ShipmentUpdate>,
) -> Result<Json<Shipment>> {
    Ok(Json(state.shipments.update(&caller, id, update).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ShipmentId>,
) -> Result<StatusCode> {
    state.shipments.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
