use super::{ApiJson, ApiPath, ApiQuery, AppState};
use crate::{
    model::{NewOffer, Offer, OfferStatusChange, OfferUpdate},
    offers::{OfferFilter, OfferResolution},
    pagination::{Page, PageRequest},
    Caller, OfferId, Result,
};
use axum::{extract::State, http::StatusCode, response::Json};

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewOffer>,
) -> Result<(StatusCode, Json<Offer>)> {
    let offer = state.offers.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(offer)))
}

pub async fn list(
    State(state): State<AppState>,
    _caller: Caller,
    ApiQuery(filter): ApiQuery<OfferFilter>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Offer>>> {
    Ok(Json(state.offers.list(&filter, page).await?))
}

pub async fn get(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<OfferId>,
) -> Result<Json<Offer>> {
    Ok(Json(state.offers.get(id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<OfferId>,
    ApiJson(update): ApiJson<OfferUpdate>,
) -> Result<Json<OfferResolution>> {
    Ok(Json(state.offers.update(&caller, id, update).await?))
}

/// Accept, reject, counter, withdraw or reopen. Acceptance forms the contract.
pub async fn update_status(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<OfferId>,
    ApiJson(change): ApiJson<OfferStatusChange>,
) -> Result<Json<OfferResolution>> {
    Ok(Json(state.offers.update_status(&caller, id, change.status).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<OfferId>,
) -> Result<StatusCode> {
    state.offers.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
