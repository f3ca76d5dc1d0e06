//! HTTP surface.
//!
//! Handlers are thin: they extract the caller, path, query and body, call one
//! service operation and serialize the result. Every failure, including
//! extractor rejections, renders through [`MarketError`].

mod contracts;
mod offers;
mod reviews;
mod shipments;
mod status_updates;

use crate::{
    auth::TokenService, ContractService, Database, MarketError, OfferService, ReviewService,
    ShipmentService, StatusTracker,
};
use axum::{
    extract::{FromRef, FromRequest, FromRequestParts},
    response::Json,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// JSON body whose rejection is a 400 in the common error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(MarketError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(MarketError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(MarketError))]
pub struct ApiQuery<T>(pub T);

#[derive(Clone)]
pub struct AppState {
    pub shipments: ShipmentService,
    pub offers: OfferService,
    pub contracts: ContractService,
    pub tracker: StatusTracker,
    pub reviews: ReviewService,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(db: &Database, tokens: TokenService) -> Self {
        Self {
            shipments: ShipmentService::new(db),
            offers: OfferService::new(db),
            contracts: ContractService::new(db),
            tracker: StatusTracker::new(db),
            reviews: ReviewService::new(db),
            tokens: Arc::new(tokens),
        }
    }
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/shipments",
            post(shipments::create).get(shipments::list),
        )
        .route("/shipments/search", get(shipments::search))
        .route(
            "/shipments/:id",
            get(shipments::get)
                .put(shipments::update)
                .delete(shipments::delete),
        )
        .route("/shipments/:id/details", get(shipments::details))
        .route("/shipment_offers", post(offers::create).get(offers::list))
        .route(
            "/shipment_offers/:id",
            get(offers::get).put(offers::update).delete(offers::delete),
        )
        .route("/shipment_offers/status/:id", put(offers::update_status))
        .route(
            "/shipment_contracts",
            post(contracts::create).get(contracts::list),
        )
        .route(
            "/shipment_contracts/:id",
            get(contracts::get)
                .put(contracts::update)
                .delete(contracts::delete),
        )
        .route(
            "/shipment_contracts/shipment/:shipment_id",
            get(contracts::get_by_shipment),
        )
        .route("/shipment-status-updates", post(status_updates::create))
        .route(
            "/shipment-status-updates/:id",
            get(status_updates::get)
                .put(status_updates::update)
                .delete(status_updates::delete),
        )
        .route(
            "/shipment-status-updates/contract/:contract_id",
            get(status_updates::timeline),
        )
        .route("/user-reviews", post(reviews::create).get(reviews::list))
        .route(
            "/user-reviews/:id",
            get(reviews::get).put(reviews::update).delete(reviews::delete),
        )
        .route("/user-reviews/user/:reviewed_user_id", get(reviews::for_user))
        .route("/user-reviews/contract/:contract_id", get(reviews::for_contract))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
