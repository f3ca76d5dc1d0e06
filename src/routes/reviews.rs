use super::{ApiJson, ApiPath, ApiQuery, AppState};
use crate::{
    model::{NewReview, Review, ReviewUpdate},
    pagination::{Page, PageRequest},
    reviews::ReviewFilter,
    Caller, ContractId, Result, ReviewId, UserId,
};
use axum::{extract::State, http::StatusCode, response::Json};

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    ApiJson(request): ApiJson<NewReview>,
) -> Result<(StatusCode, Json<Review>)> {
    let review = state.reviews.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn list(
    State(state): State<AppState>,
    _caller: Caller,
    ApiQuery(filter): ApiQuery<ReviewFilter>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Review>>> {
    Ok(Json(state.reviews.list(&filter, page).await?))
}

pub async fn get(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(id): ApiPath<ReviewId>,
) -> Result<Json<Review>> {
    Ok(Json(state.reviews.get(id).await?))
}

pub async fn for_user(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(user_id): ApiPath<UserId>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Review>>> {
    Ok(Json(state.reviews.for_user(user_id, page).await?))
}

pub async fn for_contract(
    State(state): State<AppState>,
    _caller: Caller,
    ApiPath(contract_id): ApiPath<ContractId>,
    ApiQuery(page): ApiQuery<PageRequest>,
) -> Result<Json<Page<Review>>> {
    Ok(Json(state.reviews.for_contract(contract_id, page).await?))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ReviewId>,
    ApiJson(update): ApiJson<ReviewUpdate>,
) -> Result<Json<Review>> {
    Ok(Json(state.reviews.update(&caller, id, update).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    ApiPath(id): ApiPath<ReviewId>,
) -> Result<StatusCode> {
    state.reviews.delete(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
