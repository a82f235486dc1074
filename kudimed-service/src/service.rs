use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
};
use booking_flow::{
    BookingAction, FlowError, FlowRunner, NewAppointment, Practitioner, Specialty,
    SqliteSessionStorage,
};
use chrono::NaiveDateTime;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    config::ServiceConfig,
    db::{Database, StoreError},
    models::{
        AppointmentRow, AppointmentsQuery, CreatedResponse, Medication, MedicationsQuery,
        PaymentConfirmationRequest, Prescription, PractitionersQuery, PrescriptionsQuery,
        SessionResponse, TriageRequest, User, UserRole,
    },
    telemetry::correlation_id_middleware,
    triage::{RigTriageProvider, TriageOutcome, TriageProvider, TriageService},
    workflow::create_flow_runner,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn flow_error(err: FlowError) -> ApiError {
    let status = match &err {
        FlowError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::UnknownSpecialty(_)
        | FlowError::InvalidDate(_)
        | FlowError::InvalidTime(_)
        | FlowError::InvalidPhone(_) => StatusCode::BAD_REQUEST,
        FlowError::PractitionerNotFound(_)
        | FlowError::SpecialtyMismatch { .. }
        | FlowError::InvalidTransition { .. }
        | FlowError::GuardNotSatisfied { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::PaymentInProgress | FlowError::SlotTaken { .. } => StatusCode::CONFLICT,
        FlowError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
        FlowError::PaymentTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        FlowError::StorageError(_)
        | FlowError::Serialization(_)
        | FlowError::PaymentTaskFailed(_) => {
            error!(error = %err, "Booking storage failure");
            return internal_error("Booking storage failure", &err.to_string());
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::SlotTaken { .. } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": err.to_string() })),
        ),
        StoreError::UnknownReference => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": err.to_string() })),
        ),
        StoreError::Database(e) => {
            error!(error = %e, "Database query failed");
            internal_error("Database error", &e.to_string())
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub flow_runner: FlowRunner,
    pub triage: TriageService,
    /// Identity every request acts as
    pub current_user_id: String,
}

impl AppState {
    pub async fn from_config(config: &ServiceConfig) -> anyhow::Result<Self> {
        let provider = Arc::new(RigTriageProvider::new(
            config.openrouter_api_key.clone(),
            config.triage_model.clone(),
        ));
        if config.openrouter_api_key.is_none() {
            warn!("OPENROUTER_API_KEY not set, triage requests will report a provider error");
        }
        Self::from_config_with_provider(config, provider).await
    }

    pub async fn from_config_with_provider(
        config: &ServiceConfig,
        provider: Arc<dyn TriageProvider>,
    ) -> anyhow::Result<Self> {
        let db = Database::connect(&config.database_url).await?;
        db.migrate().await?;
        db.seed().await?;

        let session_storage = Arc::new(SqliteSessionStorage::from_pool(db.pool().clone()).await?);
        let flow_runner = create_flow_runner(&db, session_storage, config);

        Ok(Self {
            db,
            flow_runner,
            triage: TriageService::new(provider, config.triage_timeout),
            current_user_id: config.current_user_id.clone(),
        })
    }
}

pub async fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let app_state = AppState::from_config(config).await?;
    Ok(build_router(app_state))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/me", get(get_me))
        .route(
            "/api/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route("/api/medications", get(list_medications))
        .route("/api/prescriptions", get(list_prescriptions))
        .route("/api/specialties", get(list_specialties))
        .route("/api/practitioners", get(list_practitioners))
        .route("/api/bookings", post(start_booking))
        .route(
            "/api/bookings/{session_id}",
            get(get_booking).delete(abandon_booking),
        )
        .route("/api/bookings/{session_id}/actions", post(apply_booking_action))
        .route("/api/bookings/{session_id}/payment", post(confirm_payment))
        .route("/api/triage", post(run_triage))
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "KudiMed",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Appointment booking, pharmacy catalog and symptom triage",
        "endpoints": {
            "GET /api/me": "Current user",
            "GET /api/appointments?userId=": "Appointments for a patient or practitioner",
            "POST /api/appointments": "Record an appointment directly",
            "GET /api/medications?search=": "Pharmacy catalog",
            "GET /api/prescriptions?userId=": "Prescriptions for a patient",
            "GET /api/specialties": "Bookable specialties",
            "GET /api/practitioners?specialty=": "Practitioners and prices",
            "POST /api/bookings": "Start a booking",
            "GET /api/bookings/{session_id}": "Booking state",
            "POST /api/bookings/{session_id}/actions": "Apply a booking action",
            "POST /api/bookings/{session_id}/payment": "Confirm payment",
            "DELETE /api/bookings/{session_id}": "Abandon a booking",
            "POST /api/triage": "Symptom triage",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn load_user(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    state
        .db
        .find_user(user_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found_error("User not found", user_id))
}

async fn get_me(State(state): State<AppState>) -> ApiResult<User> {
    let user = load_user(&state, &state.current_user_id).await?;
    Ok(Json(user))
}

async fn list_appointments(
    State(state): State<AppState>,
    Query(query): Query<AppointmentsQuery>,
) -> ApiResult<Vec<AppointmentRow>> {
    let user = load_user(&state, &query.user_id).await?;

    if let Some(claimed) = query.role.as_deref() {
        if claimed != user.role.as_str() {
            warn!(
                user_id = %user.id,
                claimed_role = %claimed,
                role = %user.role,
                "Ignoring role that does not match the user record"
            );
        }
    }

    let rows = match user.role {
        UserRole::Doctor => state.db.list_for_practitioner(&user.id).await,
        _ => state.db.list_for_patient(&user.id).await,
    }
    .map_err(store_error)?;

    Ok(Json(rows))
}

async fn create_appointment(
    State(state): State<AppState>,
    Json(request): Json<NewAppointment>,
) -> ApiResult<CreatedResponse> {
    let appointment = validate_new_appointment(request)?;

    let id = state
        .db
        .create_appointment(&appointment)
        .await
        .map_err(store_error)?;

    Ok(Json(CreatedResponse { id }))
}

/// Checks the request and normalises the specialty to its canonical label.
fn validate_new_appointment(request: NewAppointment) -> Result<NewAppointment, ApiError> {
    if request.patient_id.trim().is_empty() || request.doctor_id.trim().is_empty() {
        return Err(bad_request_error("patientId and doctorId are required"));
    }
    let specialty = request
        .specialty
        .parse::<Specialty>()
        .map_err(|_| bad_request_error("Unknown specialty"))?;
    if NaiveDateTime::parse_from_str(&request.date, "%Y-%m-%d %H:%M").is_err() {
        return Err(bad_request_error("date must be formatted as YYYY-MM-DD HH:MM"));
    }
    Ok(NewAppointment {
        specialty: specialty.label().to_string(),
        ..request
    })
}

async fn list_medications(
    State(state): State<AppState>,
    Query(query): Query<MedicationsQuery>,
) -> ApiResult<Vec<Medication>> {
    let medications = state
        .db
        .list_medications(query.search.as_deref())
        .await
        .map_err(store_error)?;
    Ok(Json(medications))
}

async fn list_prescriptions(
    State(state): State<AppState>,
    Query(query): Query<PrescriptionsQuery>,
) -> ApiResult<Vec<Prescription>> {
    let prescriptions = state
        .db
        .list_prescriptions(&query.user_id)
        .await
        .map_err(store_error)?;
    Ok(Json(prescriptions))
}

async fn list_specialties() -> Json<Vec<Specialty>> {
    Json(Specialty::ALL.to_vec())
}

async fn list_practitioners(
    State(state): State<AppState>,
    Query(query): Query<PractitionersQuery>,
) -> ApiResult<Vec<Practitioner>> {
    let specialty = match query.specialty.as_deref() {
        Some(label) => Some(label.parse::<Specialty>().map_err(flow_error)?),
        None => None,
    };

    let practitioners = state
        .db
        .list_practitioners(specialty)
        .await
        .map_err(store_error)?;
    Ok(Json(practitioners))
}

async fn start_booking(State(state): State<AppState>) -> ApiResult<SessionResponse> {
    let user = load_user(&state, &state.current_user_id).await?;
    let session = state.flow_runner.start(&user.id).await.map_err(flow_error)?;
    Ok(Json(SessionResponse::from(&session)))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .flow_runner
        .session(&session_id)
        .await
        .map_err(flow_error)?;
    Ok(Json(SessionResponse::from(&session)))
}

async fn apply_booking_action(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(action): Json<BookingAction>,
) -> ApiResult<SessionResponse> {
    let session = state
        .flow_runner
        .apply(&session_id, action)
        .await
        .map_err(flow_error)?;
    Ok(Json(SessionResponse::from(&session)))
}

async fn confirm_payment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<PaymentConfirmationRequest>,
) -> ApiResult<SessionResponse> {
    info!(session_id = %session_id, "Payment confirmation requested");
    let session = state
        .flow_runner
        .confirm_payment(&session_id, &request.phone)
        .await
        .map_err(flow_error)?;
    Ok(Json(SessionResponse::from(&session)))
}

async fn abandon_booking(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .flow_runner
        .abandon(&session_id)
        .await
        .map_err(flow_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_triage(
    State(state): State<AppState>,
    Json(request): Json<TriageRequest>,
) -> ApiResult<TriageOutcome> {
    if request.symptoms.trim().is_empty() {
        return Err(bad_request_error("Symptoms cannot be empty"));
    }
    Ok(Json(state.triage.run_triage(&request.symptoms).await))
}
