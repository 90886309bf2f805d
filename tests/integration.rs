use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use drone_dispatch::api::rest::router;
use drone_dispatch::config::Config;
use drone_dispatch::engine::simulator::SimTiming;
use drone_dispatch::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        http_port: 0,
        log_level: "info".to_string(),
        event_buffer_size: 64,
        timing: SimTiming {
            tick_secs: 10,
            leg_to_store_secs: 90,
            leg_to_customer_secs: 240,
            dwell_ticks: 1,
        },
    }
}

fn setup() -> axum::Router {
    router(Arc::new(AppState::new(&test_config())))
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

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn patch_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
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

async fn register_drone(app: &axum::Router, serial: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({
                "serial": serial,
                "model": "QX-2",
                "home": { "lat": 52.52, "lng": 13.405 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn create_order(app: &axum::Router) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({
                "pickup": { "lat": 52.51, "lng": 13.39 },
                "dropoff": { "lat": 52.54, "lng": 13.42 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn auto_assign(app: &axum::Router, order_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/assignments/auto",
            json!({ "order_id": order_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["drones"], 0);
    assert_eq!(body["orders"], 0);
    assert_eq!(body["deliveries"], 0);
    assert_eq!(body["assignments"], 0);
    assert_eq!(body["active_simulations"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let app = setup();
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
    assert!(body.contains("active_simulations"));
}

#[tokio::test]
async fn register_drone_returns_idle_drone() {
    let app = setup();
    let drone = register_drone(&app, "DR-100").await;

    assert_eq!(drone["serial"], "DR-100");
    assert_eq!(drone["model"], "QX-2");
    assert_eq!(drone["status"], "Idle");
    assert_eq!(drone["battery_pct"], 100.0);
    assert_eq!(drone["current_position"]["lat"], 52.52);
    assert!(drone["last_assigned_at"].is_null());
    assert!(!drone["id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn register_drone_empty_serial_returns_400() {
    let app = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({
                "serial": "   ",
                "home": { "lat": 52.52, "lng": 13.405 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_duplicate_serial_returns_409() {
    let app = setup();
    register_drone(&app, "DR-DUP").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/drones",
            json!({
                "serial": "DR-DUP",
                "home": { "lat": 52.52, "lng": 13.405 }
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn list_drones_filters_by_status() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let parked = register_drone(&app, "DR-2").await;
    let parked_id = parked["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(patch_request(
            &format!("/drones/{parked_id}/status"),
            json!({ "status": "Offline" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request("/drones?status=Idle"))
        .await
        .unwrap();
    let idle = body_json(response).await;
    assert_eq!(idle.as_array().unwrap().len(), 1);
    assert_eq!(idle[0]["serial"], "DR-1");

    let response = app
        .oneshot(get_request("/drones/available"))
        .await
        .unwrap();
    let available = body_json(response).await;
    assert_eq!(available.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_order_is_ready_for_delivery() {
    let app = setup();
    let order = create_order(&app).await;

    assert_eq!(order["status"], "ReadyForDelivery");
    assert!(order["delivery_id"].is_null());
}

#[tokio::test]
async fn get_nonexistent_order_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/orders/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auto_assign_without_drones_returns_503() {
    let app = setup();
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/assignments/auto",
            json!({ "order_id": order_id }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["error"], "no idle drones available");
}

#[tokio::test]
async fn auto_assign_order_without_dropoff_returns_400() {
    let app = setup();
    register_drone(&app, "DR-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/orders",
            json!({ "pickup": { "lat": 52.51, "lng": 13.39 } }),
        ))
        .await
        .unwrap();
    let order = body_json(response).await;
    let order_id = order["id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/assignments/auto",
            json!({ "order_id": order_id }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_auto_assignment_flow() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap().to_string();
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let assignment = auto_assign(&app, &order_id).await;
    assert_eq!(assignment["order_id"], order_id);
    assert_eq!(assignment["drone_id"], drone_id);
    assert_eq!(assignment["mode"], "Auto");
    assert_eq!(assignment["assigned_by"], "system");
    assert!(assignment["completed_at"].is_null());

    let delivery_id = assignment["delivery_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let updated_order = body_json(response).await;
    assert_eq!(updated_order["status"], "Assigned");
    assert_eq!(updated_order["delivery_id"], delivery_id);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}")))
        .await
        .unwrap();
    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "Assigned");
    assert_eq!(delivery["current_segment"], "W0_W1");
    assert_eq!(delivery["eta_seconds"], 340);
    assert_eq!(delivery["w0"]["lat"], 52.52);
    assert_eq!(delivery["w1"]["lat"], 52.51);
    assert_eq!(delivery["w2"]["lat"], 52.54);
    assert_eq!(delivery["w3"]["lat"], 52.52);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/drones/{drone_id}")))
        .await
        .unwrap();
    let detail = body_json(response).await;
    assert_eq!(detail["status"], "Assigned");
    assert_eq!(detail["current_assignment"]["order_id"], order_id);

    let response = app
        .oneshot(get_request("/assignments/active"))
        .await
        .unwrap();
    let active = body_json(response).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn round_robin_prefers_the_drone_idle_longest() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    register_drone(&app, "DR-2").await;

    let first_order = create_order(&app).await;
    let first = auto_assign(&app, first_order["id"].as_str().unwrap()).await;
    let first_drone = first["drone_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/assignments/{}/complete",
            first["id"].as_str().unwrap()
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The second order goes to the never-assigned drone, not the one
    // that just came back.
    let second_order = create_order(&app).await;
    let second = auto_assign(&app, second_order["id"].as_str().unwrap()).await;
    assert_ne!(second["drone_id"].as_str().unwrap(), first_drone);
}

#[tokio::test]
async fn manual_assignment_targets_requested_drone() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let target = register_drone(&app, "DR-2").await;
    let target_id = target["id"].as_str().unwrap();
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/assignments/manual",
            json!({
                "order_id": order_id,
                "drone_id": target_id,
                "assigned_by": "operator-7"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let assignment = body_json(response).await;
    assert_eq!(assignment["drone_id"], *target_id);
    assert_eq!(assignment["mode"], "Manual");
    assert_eq!(assignment["assigned_by"], "operator-7");
}

#[tokio::test]
async fn manual_assign_busy_drone_returns_409() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap().to_string();

    let first_order = create_order(&app).await;
    auto_assign(&app, first_order["id"].as_str().unwrap()).await;

    let second_order = create_order(&app).await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/assignments/manual",
            json!({
                "order_id": second_order["id"].as_str().unwrap(),
                "drone_id": drone_id,
                "assigned_by": "operator-7"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn completing_an_assignment_twice_returns_409() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap().to_string();
    let order = create_order(&app).await;
    let assignment = auto_assign(&app, order["id"].as_str().unwrap()).await;
    let assignment_id = assignment["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/assignments/{assignment_id}/complete"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let completed = body_json(response).await;
    assert!(!completed["completed_at"].is_null());

    let response = app
        .clone()
        .oneshot(get_request(&format!("/drones/{drone_id}")))
        .await
        .unwrap();
    let drone = body_json(response).await;
    assert_eq!(drone["status"], "Idle");

    let response = app
        .oneshot(post_request(&format!(
            "/assignments/{assignment_id}/complete"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn drone_without_assignment_returns_404() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(get_request(&format!("/assignments/drone/{drone_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn maintenance_is_refused_while_assigned() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap().to_string();
    let order = create_order(&app).await;
    auto_assign(&app, order["id"].as_str().unwrap()).await;

    let response = app
        .clone()
        .oneshot(patch_request(
            &format!("/drones/{drone_id}/status"),
            json!({ "status": "Maintenance" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn simulation_lifecycle() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let order = create_order(&app).await;
    let assignment = auto_assign(&app, order["id"].as_str().unwrap()).await;
    let delivery_id = assignment["delivery_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/start"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["running"], true);
    assert_eq!(status["delivery_status"], "InProgress");
    assert_eq!(status["current_segment"], "W0_W1");
    assert_eq!(status["drone_status"], "EnRouteToStore");

    // Starting again replaces the timer instead of stacking a second one.
    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/start"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request("/simulation/active"))
        .await
        .unwrap();
    let active = body_json(response).await;
    assert_eq!(active.as_array().unwrap().len(), 1);
    assert_eq!(active[0]["delivery_id"], delivery_id);

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/stop"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(get_request(&format!(
            "/simulation/delivery/{delivery_id}/status"
        )))
        .await
        .unwrap();
    let status = body_json(response).await;
    assert_eq!(status["running"], false);
    // Stopping pauses the clock; the delivery itself stays in progress.
    assert_eq!(status["delivery_status"], "InProgress");

    let response = app
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/stop"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn start_simulation_unknown_delivery_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(post_request(&format!(
            "/simulation/delivery/{fake_id}/start"
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn operator_complete_finishes_delivery() {
    let app = setup();
    let drone = register_drone(&app, "DR-1").await;
    let drone_id = drone["id"].as_str().unwrap().to_string();
    let order = create_order(&app).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let assignment = auto_assign(&app, &order_id).await;
    let delivery_id = assignment["delivery_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/complete"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let delivery = body_json(response).await;
    assert_eq!(delivery["status"], "Completed");
    assert_eq!(delivery["current_segment"], "DONE");
    assert_eq!(delivery["eta_seconds"], 0);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/orders/{order_id}")))
        .await
        .unwrap();
    let order = body_json(response).await;
    assert_eq!(order["status"], "Delivered");

    // The drone is parked at home and free for the next order.
    let response = app
        .clone()
        .oneshot(get_request(&format!("/drones/{drone_id}")))
        .await
        .unwrap();
    let drone = body_json(response).await;
    assert_eq!(drone["status"], "Idle");
    assert_eq!(drone["current_position"]["lat"], 52.52);
    assert!(drone["current_assignment"].is_null());

    let response = app
        .clone()
        .oneshot(get_request("/assignments/active"))
        .await
        .unwrap();
    let active = body_json(response).await;
    assert_eq!(active.as_array().unwrap().len(), 0);

    let response = app
        .clone()
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/events")))
        .await
        .unwrap();
    let events = body_json(response).await;
    let last = events.as_array().unwrap().last().unwrap().clone();
    assert_eq!(last["event_type"], "DELIVERY_COMPLETE");

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/complete"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/start"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn simulation_start_records_delivery_start_event() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let order = create_order(&app).await;
    let assignment = auto_assign(&app, order["id"].as_str().unwrap()).await;
    let delivery_id = assignment["delivery_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_request(&format!(
            "/simulation/delivery/{delivery_id}/start"
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get_request(&format!("/deliveries/{delivery_id}/events")))
        .await
        .unwrap();
    let events = body_json(response).await;
    let list = events.as_array().unwrap();
    assert!(!list.is_empty());
    assert_eq!(list[0]["event_type"], "DELIVERY_START");
}

#[tokio::test]
async fn tracking_positions_cover_the_in_service_fleet() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let parked = register_drone(&app, "DR-2").await;
    let parked_id = parked["id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(patch_request(
            &format!("/drones/{parked_id}/status"),
            json!({ "status": "Offline" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request("/tracking/positions"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let positions = body_json(response).await;
    let list = positions.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["serial"], "DR-1");
    assert_eq!(list[0]["status"], "Idle");
}

#[tokio::test]
async fn tracking_snapshot_includes_route_and_eta() {
    let app = setup();
    register_drone(&app, "DR-1").await;
    let order = create_order(&app).await;
    let assignment = auto_assign(&app, order["id"].as_str().unwrap()).await;
    let delivery_id = assignment["delivery_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get_request(&format!("/tracking/delivery/{delivery_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = body_json(response).await;
    assert_eq!(snapshot["delivery_id"], delivery_id);
    assert_eq!(snapshot["status"], "Assigned");
    assert_eq!(snapshot["segment"], "W0_W1");
    assert_eq!(snapshot["eta_seconds"], 340);
    assert_eq!(snapshot["eta_minutes"], 6.0);
    assert_eq!(snapshot["waypoints"].as_array().unwrap().len(), 4);
    assert_eq!(snapshot["drone_serial"], "DR-1");
}

#[tokio::test]
async fn broadcast_fleet_returns_published_snapshot() {
    let app = setup();
    register_drone(&app, "DR-1").await;

    let response = app
        .oneshot(post_request("/tracking/broadcast-fleet"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let positions = body_json(response).await;
    assert_eq!(positions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn delivery_events_unknown_delivery_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/deliveries/{fake_id}/events")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
