mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{Market, TEST_SECRET};
use haulage::{app, model::User, AppState, TokenService};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

struct Api {
    market: Market,
    state: AppState,
    tokens: TokenService,
}

impl Api {
    async fn new() -> Api {
        let market = Market::new().await;
        let state = AppState::new(&market.db, TokenService::new(TEST_SECRET, 1));
        Api {
            market,
            state,
            tokens: TokenService::new(TEST_SECRET, 1),
        }
    }

    fn token(&self, user: &User) -> String {
        self.tokens.issue(user.id, user.role).unwrap()
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Body>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body)
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn send_json(&self, method: Method, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(method, uri, Some(token), Some(Body::from(body.to_string())))
            .await
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let api = Api::new().await;
    let (status, body) = api.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_or_forged_token_is_unauthorized() {
    let api = Api::new().await;

    let (status, body) = api.send(Method::GET, "/shipments", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let forged = TokenService::new("a-completely-different-secret", 1)
        .issue(api.market.shipper.id, api.market.shipper.role)
        .unwrap();
    let (status, _) = api.send(Method::GET, "/shipments", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_and_fetch_shipment() {
    let api = Api::new().await;
    let token = api.token(&api.market.shipper);

    let payload = serde_json::to_value(api.market.new_shipment()).unwrap();
    let (status, created) = api.send_json(Method::POST, "/shipments", &token, payload).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["owner_id"], json!(api.market.shipper.id));

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = api
        .send(Method::GET, &format!("/shipments/{}", id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["pickup_location"], "Rotterdam, NL");

    let (status, page) = api
        .send(Method::GET, "/shipments?status=pending&limit=5", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 5);
    assert_eq!(page["page"], 1);
}

#[tokio::test]
async fn test_malformed_requests_are_validation_errors() {
    let api = Api::new().await;
    let token = api.token(&api.market.shipper);

    let (status, body) = api
        .send(
            Method::POST,
            "/shipments",
            Some(&token),
            Some(Body::from("{\"weight_kg\": ")),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = api
        .send(Method::GET, "/shipments/not-a-uuid", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let mut payload = serde_json::to_value(api.market.new_shipment()).unwrap();
    payload["status"] = json!("lost");
    let (status, _) = api.send_json(Method::POST, "/shipments", &token, payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, body) = api
        .send(Method::GET, &format!("/shipments/{}", missing), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_search_is_public() {
    let api = Api::new().await;
    api.market.post_shipment().await;

    let (status, page) = api
        .send(Method::GET, "/shipments/search?destination=munich&page=1", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["data"][0]["owner_name"], "Acme Exports");
    assert!(page["data"][0]["owner_rating"].is_null());
    assert_eq!(page["data"][0]["owner_trips_completed"], 0);
}

#[tokio::test]
async fn test_offer_acceptance_over_http() {
    let api = Api::new().await;
    let shipper = api.token(&api.market.shipper);
    let carrier_a = api.token(&api.market.carrier_a);
    let carrier_b = api.token(&api.market.carrier_b);

    let shipment = api.market.post_shipment().await;

    let (status, offer_a) = api
        .send_json(
            Method::POST,
            "/shipment_offers",
            &carrier_a,
            json!({
                "shipment_id": shipment.id,
                "vehicle_id": api.market.truck_a.id,
                "proposed_price": 500.0,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, offer_b) = api
        .send_json(
            Method::POST,
            "/shipment_offers",
            &carrier_b,
            json!({
                "shipment_id": shipment.id,
                "vehicle_id": api.market.truck_b.id,
                "proposed_price": 450.0,
                "message": "Can load same day",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let offer_b_uri = format!("/shipment_offers/status/{}", offer_b["id"].as_str().unwrap());
    let (status, _) = api
        .send_json(Method::PUT, &offer_b_uri, &carrier_b, json!({"status": "accepted"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, accepted) = api
        .send_json(Method::PUT, &offer_b_uri, &shipper, json!({"status": "accepted"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");
    assert_eq!(accepted["contract"]["final_price"], 450.0);

    let offer_a_uri = format!("/shipment_offers/status/{}", offer_a["id"].as_str().unwrap());
    let (status, body) = api
        .send_json(Method::PUT, &offer_a_uri, &shipper, json!({"status": "accepted"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, contract) = api
        .send(
            Method::GET,
            &format!("/shipment_contracts/shipment/{}", shipment.id),
            Some(&shipper),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(contract["carrier_id"], json!(api.market.carrier_b.id));

    let (status, offers) = api
        .send(
            Method::GET,
            &format!("/shipment_offers?shipment_id={}&status=rejected", shipment.id),
            Some(&shipper),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offers["total"], 1);
    assert_eq!(offers["data"][0]["id"], offer_a["id"]);
}

#[tokio::test]
async fn test_tracking_and_reviews_over_http() {
    let api = Api::new().await;
    let shipper = api.token(&api.market.shipper);
    let carrier = api.token(&api.market.carrier_a);

    let shipment = api.market.post_shipment().await;
    let offer = api
        .market
        .offer(&shipment, &api.market.carrier_a, &api.market.truck_a, 480.0)
        .await;
    let contract = api
        .market
        .offers
        .update_status(
            &api.market.as_user(&api.market.shipper),
            offer.id,
            haulage::OfferStatus::Accepted,
        )
        .await
        .unwrap()
        .contract
        .unwrap();

    let (status, recorded) = api
        .send_json(
            Method::POST,
            "/shipment-status-updates",
            &carrier,
            json!({
                "contract_id": contract.id,
                "status": "in_transit",
                "latitude": 50.11,
                "longitude": 8.68,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(recorded["status"], "in_transit");

    let (status, timeline) = api
        .send(
            Method::GET,
            &format!("/shipment-status-updates/contract/{}", contract.id),
            Some(&shipper),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(timeline["total"], 1);

    let (status, completed) = api
        .send_json(
            Method::PUT,
            &format!("/shipment_contracts/{}", contract.id),
            &shipper,
            json!({"status": "completed"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");

    let (status, review) = api
        .send_json(
            Method::POST,
            "/user-reviews",
            &shipper,
            json!({
                "reviewed_user_id": api.market.carrier_a.id,
                "contract_id": contract.id,
                "rating": 7,
                "comment": "Arrived early",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(review["rating"], 7);

    let (status, received) = api
        .send(
            Method::GET,
            &format!("/user-reviews/user/{}", api.market.carrier_a.id),
            Some(&carrier),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(received["total"], 1);

    let (status, _) = api
        .send(
            Method::DELETE,
            &format!("/shipment_contracts/{}", contract.id),
            Some(&shipper),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = api
        .send(
            Method::DELETE,
            &format!("/user-reviews/{}", review["id"].as_str().unwrap()),
            Some(&shipper),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
}
