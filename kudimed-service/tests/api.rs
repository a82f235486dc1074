use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use kudimed_service::{
    AppState, ServiceConfig, build_router,
    triage::TriageProvider,
};
use serde_json::{Value, json};
use tower::ServiceExt;

struct CannedTriage;

#[async_trait]
impl TriageProvider for CannedTriage {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(r##"```json
{"specialty": "Cardiologia", "urgency": "Laranja", "color": "#FFA500", "explanation": "Dor torácica"}
```"##
            .to_string())
    }
}

async fn test_app() -> Router {
    test_app_with(&[]).await
}

async fn test_app_with(overrides: &[(&'static str, &'static str)]) -> Router {
    let mut vars = HashMap::from([
        ("DATABASE_URL", "sqlite::memory:"),
        ("PAYMENT_DELAY_MS", "0"),
    ]);
    vars.extend(overrides.iter().copied());
    let config = ServiceConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
    let state = AppState::from_config_with_provider(&config, Arc::new(CannedTriage))
        .await
        .unwrap();
    build_router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn action(app: &Router, session_id: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        &format!("/api/bookings/{session_id}/actions"),
        Some(body),
    )
    .await
}

async fn booking_ready_to_pay(app: &Router) -> String {
    let (status, session) = send(app, Method::POST, "/api/bookings", None).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = session["session_id"].as_str().unwrap().to_string();

    for body in [
        json!({"action": "selectSpecialty", "specialty": "Pediatria"}),
        json!({"action": "selectPractitioner", "practitionerId": "d2"}),
        json!({"action": "setDate", "date": "2025-05-01"}),
        json!({"action": "setTime", "time": "09:00"}),
        json!({"action": "advance"}),
    ] {
        let (status, _) = action(app, &session_id, body).await;
        assert_eq!(status, StatusCode::OK);
    }
    session_id
}

#[tokio::test]
async fn health_and_index() {
    let app = test_app().await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "KudiMed");
}

#[tokio::test]
async fn current_user_is_the_seeded_patient() {
    let app = test_app().await;

    let (status, me) = send(&app, Method::GET, "/api/me", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], "p1");
    assert_eq!(me["name"], "João Silva");
    assert_eq!(me["role"], "patient");
    assert_eq!(me["wallet_balance"], 25000.0);
}

#[tokio::test]
async fn booking_end_to_end() {
    let app = test_app().await;
    let session_id = booking_ready_to_pay(&app).await;

    let (status, view) = send(
        &app,
        Method::GET,
        &format!("/api/bookings/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "confirm_and_pay");
    assert_eq!(view["summary"]["amount"], 18000);
    assert_eq!(view["summary"]["practitioner_name"], "Dr. Manuel Bento");

    let (status, done) = send(
        &app,
        Method::POST,
        &format!("/api/bookings/{session_id}/payment"),
        Some(json!({"phone": "923 456 789"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["step"], "done");
    assert!(done["appointment_id"].is_i64());

    let (status, rows) = send(&app, Method::GET, "/api/appointments?userId=p1", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["doctor_id"], "d2");
    assert_eq!(rows[0]["specialty"], "Pediatria");
    assert_eq!(rows[0]["date"], "2025-05-01 09:00");
    assert_eq!(rows[0]["status"], "scheduled");
    assert_eq!(rows[0]["doctor_name"], "Dr. Manuel Bento");

    let (_, doctor_rows) = send(
        &app,
        Method::GET,
        "/api/appointments?userId=d2&role=doctor",
        None,
    )
    .await;
    assert_eq!(doctor_rows[0]["patient_name"], "João Silva");
}

#[tokio::test]
async fn advancing_without_a_selection_is_refused() {
    let app = test_app().await;
    let (_, session) = send(&app, Method::POST, "/api/bookings", None).await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, body) = action(&app, session_id, json!({"action": "advance"})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("missing"));

    let (_, view) = send(&app, Method::GET, &format!("/api/bookings/{session_id}"), None).await;
    assert_eq!(view["step"], "choose_specialty");
    assert_eq!(view["can_advance"], false);
}

#[tokio::test]
async fn unknown_booking_is_not_found() {
    let app = test_app().await;

    let (status, _) = send(&app, Method::GET, "/api/bookings/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, "/api/bookings/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_booking_of_the_same_slot_conflicts() {
    let app = test_app().await;
    let first = booking_ready_to_pay(&app).await;
    let second = booking_ready_to_pay(&app).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/bookings/{first}/payment"),
        Some(json!({"phone": "923456789"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/bookings/{second}/payment"),
        Some(json!({"phone": "923456789"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, view) = send(&app, Method::GET, &format!("/api/bookings/{second}"), None).await;
    assert_eq!(view["step"], "confirm_and_pay");
    assert!(view["last_error"].is_string());
}

#[tokio::test]
async fn direct_appointment_create() {
    let app = test_app().await;
    let body = json!({
        "patientId": "p1",
        "doctorId": "d1",
        "specialty": "Clínica Geral",
        "date": "2025-06-10 14:30"
    });

    let (status, created) = send(&app, Method::POST, "/api/appointments", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(created["id"].is_i64());

    let (status, _) = send(&app, Method::POST, "/api/appointments", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/appointments",
        Some(json!({
            "patientId": "p1",
            "doctorId": "d1",
            "specialty": "Clínica Geral",
            "date": "amanhã"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn catalog_queries() {
    let app = test_app().await;

    let (status, all) = send(&app, Method::GET, "/api/medications", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, found) = send(&app, Method::GET, "/api/medications?search=amoxi", None).await;
    assert_eq!(found[0]["name"], "Amoxicilina 1g");

    let (status, none) = send(&app, Method::GET, "/api/medications?search=xyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(none, json!([]));

    let (_, specialties) = send(&app, Method::GET, "/api/specialties", None).await;
    assert_eq!(specialties.as_array().unwrap().len(), 5);
    assert_eq!(specialties[0], "Clínica Geral");

    let (_, practitioners) =
        send(&app, Method::GET, "/api/practitioners?specialty=Pediatria", None).await;
    assert_eq!(practitioners.as_array().unwrap().len(), 1);
    assert_eq!(practitioners[0]["id"], "d2");

    let (status, _) = send(&app, Method::GET, "/api/practitioners?specialty=Ortopedia", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, prescriptions) = send(&app, Method::GET, "/api/prescriptions?userId=p1", None).await;
    assert_eq!(prescriptions[0]["doctor_name"], "Dra. Ana Paula");
}

#[tokio::test]
async fn triage_returns_tagged_outcome() {
    let app = test_app().await;

    let (status, outcome) = send(
        &app,
        Method::POST,
        "/api/triage",
        Some(json!({"symptoms": "dor no peito e falta de ar"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["suggestion"]["urgency"], "Laranja");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/triage",
        Some(json!({"symptoms": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_payment_can_be_retried_after_retreat() {
    let app = test_app().await;
    let first = booking_ready_to_pay(&app).await;
    let second = booking_ready_to_pay(&app).await;
    let pay = json!({"phone": "923456789"});

    let (status, _) = send(&app, Method::POST, &format!("/api/bookings/{first}/payment"), Some(pay.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::POST, &format!("/api/bookings/{second}/payment"), Some(pay.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, view) = action(&app, &second, json!({"action": "retreat"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "choose_practitioner_and_time");
    assert_eq!(view["payment_pending"], false);

    for body in [
        json!({"action": "setTime", "time": "10:30"}),
        json!({"action": "advance"}),
    ] {
        let (status, _) = action(&app, &second, body).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, done) = send(&app, Method::POST, &format!("/api/bookings/{second}/payment"), Some(pay)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["step"], "done");
    assert!(done["last_error"].is_null());

    let (_, rows) = send(&app, Method::GET, "/api/appointments?userId=p1", None).await;
    let dates: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["date"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2025-05-01 09:00", "2025-05-01 10:30"]);
}

#[tokio::test]
async fn timed_out_payment_leaves_booking_retryable() {
    let app = test_app_with(&[("PAYMENT_DELAY_MS", "1500"), ("PAYMENT_TIMEOUT_SECS", "1")]).await;
    let session_id = booking_ready_to_pay(&app).await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/bookings/{session_id}/payment"),
        Some(json!({"phone": "923456789"})),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

    let (_, view) = send(&app, Method::GET, &format!("/api/bookings/{session_id}"), None).await;
    assert_eq!(view["step"], "confirm_and_pay");
    assert_eq!(view["payment_pending"], false);
    assert!(view["last_error"].is_string());

    let (status, view) = action(&app, &session_id, json!({"action": "retreat"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "choose_practitioner_and_time");

    let (_, rows) = send(&app, Method::GET, "/api/appointments?userId=p1", None).await;
    assert_eq!(rows, json!([]));
}

#[tokio::test]
async fn claimed_role_does_not_override_stored_role() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/appointments",
        Some(json!({
            "patientId": "p1",
            "doctorId": "d2",
            "specialty": "pediatria",
            "date": "2025-05-02 11:00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, rows) = send(&app, Method::GET, "/api/appointments?userId=p1&role=doctor", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["doctor_name"], "Dr. Manuel Bento");
    assert!(rows[0].get("patient_name").is_none());
}

#[tokio::test]
async fn direct_create_stores_canonical_specialty_label() {
    let app = test_app().await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/appointments",
        Some(json!({
            "patientId": "p1",
            "doctorId": "d2",
            "specialty": "  PEDIATRIA ",
            "date": "2025-05-03 08:00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, rows) = send(&app, Method::GET, "/api/appointments?userId=p1", None).await;
    assert_eq!(rows[0]["specialty"], "Pediatria");
}
