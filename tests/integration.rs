use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use delivery_coordinator::api::rest::router;
use delivery_coordinator::config::Config;
use delivery_coordinator::otp::code::CodeGenerator;
use delivery_coordinator::state::{AppState, Collaborators};
use serde_json::{json, Value};
use tower::ServiceExt;

struct FixedCode;

impl CodeGenerator for FixedCode {
    fn generate(&self) -> String {
        "482913".to_string()
    }
}

fn setup() -> axum::Router {
    let state = AppState::with_collaborators(
        &Config::default(),
        Collaborators {
            code_generator: Arc::new(FixedCode),
            ..Collaborators::default()
        },
    );
    router(Arc::new(state))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn order_payload(approval: Option<&str>) -> Value {
    json!({
        "order_number": "ORD1001",
        "seller_id": "seller-1",
        "buyer": { "user_id": "buyer-1", "phone": "+919800000001", "language": "en" },
        "payment_method": "Prepaid",
        "total_price": 1299.0,
        "delivery_fee": 40.0,
        "requires_delivery_otp": true,
        "admin_approval": approval,
    })
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request("POST", uri, body))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn create_agent(app: &axum::Router, id: &str) {
    let (status, _) = post(
        app,
        "/agents",
        json!({ "id": id, "name": "Ravi", "phone": "+919800000099" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

async fn create_order(app: &axum::Router) -> String {
    let (status, body) = post(app, "/orders", order_payload(Some("Approved"))).await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["orders"], 0);
    assert_eq!(body["agents"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = body_string(response).await;
    assert!(body.contains("transitions_total"));
    assert!(body.contains("otp_challenges_expired_total"));
}

#[tokio::test]
async fn create_order_returns_unassigned_order() {
    let app = setup();
    let (status, body) = post(&app, "/orders", order_payload(Some("Approved"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_number"], "ORD1001");
    assert_eq!(body["status"], "Processing");
    assert_eq!(body["assignment"]["status"], "Unassigned");
    assert_eq!(body["version"], 0);
}

#[tokio::test]
async fn create_order_without_number_returns_400() {
    let app = setup();
    let mut payload = order_payload(None);
    payload["order_number"] = json!("   ");

    let (status, body) = post(&app, "/orders", payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
}

#[tokio::test]
async fn get_unknown_order_returns_404() {
    let app = setup();
    let response = app
        .oneshot(get_request(
            "/orders/00000000-0000-0000-0000-000000000000",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn full_delivery_over_http() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;

    let (status, body) = post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["assignment"]["status"], "Assigned");

    let (status, body) = post(&app, &format!("/orders/{order_id}/accept"), json!({ "agent_id": "A7" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["order"]["status"], "PickupReady");

    let (status, body) = post(
        &app,
        &format!("/orders/{order_id}/pickup"),
        json!({ "agent_id": "A7", "order_number_verification": "ORD1001" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "OutForDelivery");

    let (status, body) = post(&app, &format!("/orders/{order_id}/otp"), json!({ "agent_id": "A7" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Pending");
    assert!(body.get("code").is_none());

    let (status, body) = post(
        &app,
        &format!("/orders/{order_id}/deliver"),
        json!({ "agent_id": "A7", "otp_code": "482913", "recipient_name": "Priya" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["status"], "Delivered");
    assert_eq!(body["order"]["delivery"]["is_completed"], true);

    let response = app
        .clone()
        .oneshot(get_request("/agents/A7/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats = body_json(response).await;
    assert_eq!(stats["completed_deliveries"], 1);
    assert_eq!(stats["total_earnings"], 40.0);
}

#[tokio::test]
async fn pickup_with_wrong_number_returns_422_without_leaking() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;
    post(&app, &format!("/orders/{order_id}/accept"), json!({ "agent_id": "A7" })).await;

    let (status, body) = post(
        &app,
        &format!("/orders/{order_id}/pickup"),
        json!({ "agent_id": "A7", "order_number_verification": "WRONG999" }),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "verification_mismatch");
    assert!(!body["error"].as_str().unwrap().contains("ORD1001"));
}

#[tokio::test]
async fn accept_by_other_agent_returns_403() {
    let app = setup();
    create_agent(&app, "A7").await;
    create_agent(&app, "A9").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;

    let (status, body) = post(&app, &format!("/orders/{order_id}/accept"), json!({ "agent_id": "A9" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "not_assigned");
}

#[tokio::test]
async fn reject_without_reason_returns_400() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;

    let (status, _) = post(
        &app,
        &format!("/orders/{order_id}/reject"),
        json!({ "agent_id": "A7", "reason": " " }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exhausted_otp_returns_410() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;
    post(&app, &format!("/orders/{order_id}/accept"), json!({ "agent_id": "A7" })).await;
    post(
        &app,
        &format!("/orders/{order_id}/pickup"),
        json!({ "agent_id": "A7", "order_number_verification": "ORD1001" }),
    )
    .await;
    let (_, challenge) = post(&app, &format!("/orders/{order_id}/otp"), json!({ "agent_id": "A7" })).await;
    let challenge_id = challenge["id"].as_str().unwrap().to_string();

    let (status, _) = post(&app, &format!("/otp/{challenge_id}/verify"), json!({ "code": "000000" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    post(&app, &format!("/otp/{challenge_id}/verify"), json!({ "code": "000000" })).await;
    post(&app, &format!("/otp/{challenge_id}/verify"), json!({ "code": "000000" })).await;

    let (status, body) = post(&app, &format!("/otp/{challenge_id}/verify"), json!({ "code": "482913" })).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["kind"], "attempts_exhausted");
}

#[tokio::test]
async fn availability_patch_rejects_lifecycle_states() {
    let app = setup();
    create_agent(&app, "A7").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            "/agents/A7/availability",
            json!({ "availability": "Delivering" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "PATCH",
            "/agents/A7/availability",
            json!({ "availability": "Offline" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["availability"], "Offline");
}

#[tokio::test]
async fn agent_order_view_hides_number_before_accept() {
    let app = setup();
    create_agent(&app, "A7").await;
    let order_id = create_order(&app).await;
    post(&app, &format!("/orders/{order_id}/assign"), json!({ "agent_id": "A7" })).await;

    let response = app
        .clone()
        .oneshot(get_request(&format!("/agents/A7/orders/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["order_number"].is_null());
    assert_eq!(body["assignment_status"], "Assigned");
}
