mod common;

use common::{parse_confirmation_link, TestApp};
use serde_json::json;

async fn place_and_confirm(app: &mut TestApp) -> i64 {
    let product_id = app.seed_product("Mug", 1650, None, true).await;
    let (status, body) = app
        .post_json(
            "/api/v1/orders",
            json!({
                "items": [{ "product_id": product_id, "quantity": 1 }],
                "shipping_address": "42 Elm Street",
                "email": "jo@example.test",
                "shipping": 0
            }),
        )
        .await;
    assert_eq!(status, 201, "body: {body}");
    let order_id = body["id"].as_i64().unwrap();

    let link = app.confirmation_link();
    let (token, order_number) = parse_confirmation_link(&link);
    let (status, location) = app
        .get_raw(&format!(
            "/api/v1/orders/confirm?token={token}&order={order_number}"
        ))
        .await;
    assert_eq!(status, 303);
    assert!(location.unwrap().ends_with("status=confirmed"));

    order_id
}

#[tokio::test]
async fn full_fulfilment_chain() {
    let mut app = TestApp::spawn().await;
    let order_id = place_and_confirm(&mut app).await;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/orders/{order_id}/verify"),
            json!({ "approve": true }),
        )
        .await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["status"], "VERIFIED");
    assert!(!body["verified_at"].is_null());

    for next in ["PROCESSING", "SHIPPED", "DELIVERED"] {
        let (status, body) = app
            .put_json(
                &format!("/api/v1/orders/{order_id}/status"),
                json!({ "status": next }),
            )
            .await;
        assert_eq!(status, 200, "body: {body}");
        assert_eq!(body["status"], next);
    }

    // Delivered is terminal.
    let (status, body) = app
        .post_json(&format!("/api/v1/orders/{order_id}/cancel"), json!({}))
        .await;
    assert_eq!(status, 409, "body: {body}");
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn rejection_during_verification() {
    let mut app = TestApp::spawn().await;
    let order_id = place_and_confirm(&mut app).await;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/orders/{order_id}/verify"),
            json!({ "approve": false }),
        )
        .await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["status"], "REJECTED");
    assert!(body["verified_at"].is_null());

    // Terminal; no resurrection.
    let (status, _) = app
        .put_json(
            &format!("/api/v1/orders/{order_id}/status"),
            json!({ "status": "PROCESSING" }),
        )
        .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn skipping_states_is_rejected() {
    let mut app = TestApp::spawn().await;
    let order_id = place_and_confirm(&mut app).await;

    // PENDING_VERIFICATION straight to SHIPPED.
    let (status, body) = app
        .put_json(
            &format!("/api/v1/orders/{order_id}/status"),
            json!({ "status": "SHIPPED" }),
        )
        .await;
    assert_eq!(status, 409, "body: {body}");
    assert_eq!(body["code"], "invalid_transition");

    let (status, body) = app
        .put_json(
            &format!("/api/v1/orders/{order_id}/status"),
            json!({ "status": "NOT_A_STATUS" }),
        )
        .await;
    assert_eq!(status, 400, "body: {body}");
    assert_eq!(body["code"], "invalid_status");
}

#[tokio::test]
async fn cancellation_with_reason_from_mid_flight() {
    let mut app = TestApp::spawn().await;
    let order_id = place_and_confirm(&mut app).await;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/orders/{order_id}/verify"),
            json!({ "approve": true }),
        )
        .await;
    assert_eq!(status, 200, "body: {body}");

    let (status, body) = app
        .post_json(
            &format!("/api/v1/orders/{order_id}/cancel"),
            json!({ "reason": "customer changed their mind" }),
        )
        .await;
    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["status"], "CANCELLED");
}

#[tokio::test]
async fn deleting_an_order_removes_it_and_its_items() {
    let mut app = TestApp::spawn().await;
    let order_id = place_and_confirm(&mut app).await;

    let (status, _) = app
        .request("DELETE", &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, 204);

    let (status, _) = app.get(&format!("/api/v1/orders/{order_id}")).await;
    assert_eq!(status, 404);

    let (status, _) = app
        .request("DELETE", &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, 404);
}
