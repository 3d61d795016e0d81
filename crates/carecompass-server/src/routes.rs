//! Route table and request handlers.

use crate::auth::{bearer_token, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use carecompass_api::{
    LoginRequest, LoginResponse, LogoutRequest, MeResponse, MessageResponse, NoteRequest,
    OkResponse, PingResponse, RegisterRequest, RegisterResponse, StatusResponse, SummaryQuery,
    SummaryResponse,
};
use carecompass_core::credentials::{
    hash_password, is_valid_email, normalize_email, verify_password, MIN_PASSWORD_LEN,
};
use carecompass_core::{
    now_millis, status_from_logs, weekly_summary, ClinicianNote, LogEntry, Patient, Role,
    ShareLink, User,
};
use chrono::{FixedOffset, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

type AppResult<T> = Result<T, ApiError>;

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(60 * 60));

    let api = Router::new()
        .route("/api/ping", get(ping))
        .route("/api/status", get(status))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
        .route("/api/patients", get(list_patients).post(create_patient))
        .route("/api/patients/:id", delete(delete_patient))
        .route("/api/logs/:patient_id", get(list_logs).post(create_log))
        .route("/api/notes/:patient_id", get(list_notes).post(create_note))
        .route("/api/share/:patient_id", get(get_share_link).post(create_share_link))
        .route("/api/summary/:patient_id", get(summary))
        .route("/share/:code", get(share_page));

    let api = match &state.config.public_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    };

    api.layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn track_metrics(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(req).await;
    state
        .metrics
        .record_request(response.status().as_u16(), start.elapsed());
    response
}

// ============================================================================
// Health
// ============================================================================

async fn ping() -> Json<PingResponse> {
    Json(PingResponse { ok: true })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let stats = state.store.stats();
    let collections = [
        ("doctors", stats.doctors),
        ("caregivers", stats.caregivers),
        ("patients", stats.patients),
        ("logs", stats.logs),
        ("clinicianNotes", stats.clinician_notes),
        ("shareLinks", stats.share_links),
        ("sessions", stats.sessions),
    ]
    .into_iter()
    .map(|(name, count)| (name.to_string(), count))
    .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.store.backend_name().to_string(),
        uptime_secs: state.metrics.uptime_secs(),
        requests: state.metrics.requests(),
        avg_latency_ms: state.metrics.avg_latency().as_secs_f64() * 1000.0,
        collections,
    })
}

// ============================================================================
// Accounts and sessions
// ============================================================================

/// Length is counted in UTF-16 units, the way browsers count it.
fn password_long_enough(password: &str) -> bool {
    password.encode_utf16().count() >= MIN_PASSWORD_LEN
}

async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let Json(req) = payload?;

    if [&req.name, &req.email, &req.password, &req.confirm_password, &req.role]
        .iter()
        .any(|field| field.is_empty())
    {
        return Err(ApiError::bad_request("All fields are required"));
    }
    let role: Role = req
        .role
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid role. Must be doctor or caregiver"))?;
    if !password_long_enough(&req.password) {
        return Err(ApiError::bad_request(
            "Password must be at least 6 characters",
        ));
    }
    if req.password != req.confirm_password {
        return Err(ApiError::bad_request("Passwords do not match"));
    }
    if !is_valid_email(&req.email) {
        return Err(ApiError::bad_request("Invalid email format"));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        email: normalize_email(&req.email),
        password_hash: hash_password(&req.password),
        role,
        created_at: now_millis(),
    };
    let user = state.store.create_user(user).await.map_err(|e| match e {
        carecompass_store::StoreError::DuplicateEmail(_) => ApiError::from(e),
        other => ApiError::internal("Server error during registration", other),
    })?;

    tracing::info!(user = %user.id, role = %role, "Registered account");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Account created successfully".to_string(),
            user: user.public(),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<LoginResponse>> {
    let Json(req) = payload?;

    if req.email.is_empty() || req.password.is_empty() || req.role.is_empty() {
        return Err(ApiError::bad_request(
            "Email, password, and role are required",
        ));
    }
    let role: Role = req
        .role
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid role"))?;

    let user = state
        .store
        .find_user(role, &req.email)
        .filter(|user| verify_password(&req.password, &user.password_hash))
        .ok_or(ApiError::Unauthorized("Invalid credentials"))?;

    let session = state
        .store
        .create_session(user.public(), state.config.session_ttl(), now_millis())
        .await
        .map_err(|e| ApiError::internal("Server error during login", e))?;

    tracing::info!(user = %user.id, role = %role, "Logged in");
    Ok(Json(LoginResponse {
        token: session.token,
        user: session.user,
    }))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> AppResult<Json<MessageResponse>> {
    let token =
        bearer_token(&headers).or_else(|| body.and_then(|Json(b)| b.token).filter(|t| !t.is_empty()));

    if let Some(token) = token {
        let removed = state.store.remove_session(&token).await?;
        tracing::debug!(removed, "Logout");
    }
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

async fn me(AuthUser(user): AuthUser) -> Json<MeResponse> {
    Json(MeResponse { user })
}

// ============================================================================
// Patients
// ============================================================================

async fn list_patients(_user: AuthUser, State(state): State<Arc<AppState>>) -> Json<Vec<Patient>> {
    Json(state.store.patients())
}

/// Patient ids may arrive as strings or numbers.
fn patient_id(payload: &Map<String, Value>) -> Option<String> {
    match payload.get("id")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

async fn create_patient(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Patient>)> {
    let Json(mut payload) = payload?;
    let id = patient_id(&payload).ok_or_else(|| ApiError::bad_request("id required"))?;
    payload.insert("id".to_string(), Value::String(id));

    let patient: Patient = serde_json::from_value(Value::Object(payload))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let patient = state.store.insert_patient(patient).await?;

    tracing::info!(patient = %patient.id, "Created patient");
    Ok((StatusCode::CREATED, Json(patient)))
}

async fn delete_patient(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<OkResponse>> {
    state.store.remove_patient(&id).await?;
    Ok(Json(OkResponse::OK))
}

// ============================================================================
// Logs and notes
// ============================================================================

async fn list_logs(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> Json<Vec<LogEntry>> {
    Json(state.store.logs(&patient_id))
}

async fn create_log(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> AppResult<(StatusCode, Json<LogEntry>)> {
    let Json(payload) = payload?;
    let entry = LogEntry::from_payload(&patient_id, payload, now_millis())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let entry = state.store.append_log(&patient_id, entry).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_notes(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> Json<Vec<ClinicianNote>> {
    Json(state.store.notes(&patient_id))
}

async fn create_note(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
    payload: Option<Json<NoteRequest>>,
) -> AppResult<(StatusCode, Json<ClinicianNote>)> {
    let note = payload.map(|Json(req)| req.note).unwrap_or_default();
    let note = state
        .store
        .append_note(&patient_id, note, now_millis())
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

// ============================================================================
// Share links
// ============================================================================

async fn create_share_link(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> AppResult<Json<ShareLink>> {
    let link = state
        .store
        .create_share_link(
            &patient_id,
            &state.config.share_base_url(),
            state.config.share_link_ttl(),
            now_millis(),
        )
        .await?;
    tracing::info!(patient = %patient_id, code = %link.code, "Created share link");
    Ok(Json(link))
}

async fn get_share_link(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> AppResult<Json<ShareLink>> {
    state
        .store
        .share_link(&patient_id, now_millis())
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Public landing page for a share code.
async fn share_page(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> Response {
    let shown = escape_html(&code);
    match state.store.share_link_by_code(&code, now_millis()) {
        Some(_) => Html(format!(
            "<h2>Shared CareCompass Link</h2><p>Code: {shown}</p>\
             <p>This demo link would show shared patient data.</p>"
        ))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html(format!(
                "<h2>Shared CareCompass Link</h2><p>Code: {shown}</p>\
                 <p>This link has expired or does not exist.</p>"
            )),
        )
            .into_response(),
    }
}

// ============================================================================
// Summaries
// ============================================================================

async fn summary(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> AppResult<Json<SummaryResponse>> {
    let Query(query) = query?;
    let offset_secs = query.tz_offset_minutes.unwrap_or(0).saturating_mul(60);
    let offset = FixedOffset::east_opt(offset_secs)
        .ok_or_else(|| ApiError::bad_request("Invalid tzOffsetMinutes"))?;

    let logs = state.store.logs(&patient_id);
    let now = Utc::now().with_timezone(&offset);
    let week = weekly_summary(&logs, &now);

    Ok(Json(SummaryResponse {
        patient_id,
        status: status_from_logs(&logs),
        chart: week.chart(),
        days: week.days,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patient_id_forms() {
        let obj = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(patient_id(&obj(json!({"id": " alex "}))).as_deref(), Some("alex"));
        assert_eq!(patient_id(&obj(json!({"id": 42}))).as_deref(), Some("42"));
        assert_eq!(patient_id(&obj(json!({"id": ""}))), None);
        assert_eq!(patient_id(&obj(json!({"name": "x"}))), None);
    }

    #[test]
    fn test_password_length_counts_utf16_units() {
        assert!(password_long_enough("secret"));
        assert!(!password_long_enough("short"));
        assert!(!password_long_enough("éééé"));
        // each emoji is a surrogate pair
        assert!(password_long_enough("😀😀😀"));
        assert!(!password_long_enough("😀😀"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("ABC234"), "ABC234");
    }
}
