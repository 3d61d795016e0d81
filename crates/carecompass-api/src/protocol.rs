//! Request and response bodies for the CareCompass HTTP API.
//!
//! Field names are camelCase on the wire. Request fields default to empty so
//! a missing field reaches the handler's validation instead of failing to
//! parse.

use carecompass_core::{DaySummary, PatientStatus, PublicUser, WeeklyChart};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `POST /api/register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: PublicUser,
}

/// `POST /api/login`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

/// `POST /api/logout`; the token may also come from the header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const OK: OkResponse = OkResponse { ok: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
}

/// `POST /api/notes/:patientId`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: String,
}

/// `GET /api/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub backend: String,
    pub uptime_secs: u64,
    pub requests: u64,
    pub avg_latency_ms: f64,
    /// Document count per collection
    pub collections: BTreeMap<String, usize>,
}

/// `GET /api/summary/:patientId`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub patient_id: String,
    pub status: PatientStatus,
    pub days: Vec<DaySummary>,
    pub chart: WeeklyChart,
}

/// Query string of `GET /api/summary/:patientId`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    /// Viewer's offset east of UTC in minutes; UTC when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz_offset_minutes: Option<i32>,
}

/// Body of every error response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecompass_core::Role;

    #[test]
    fn test_register_request_wire_names() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"name":"Dana","email":"d@x.io","password":"secret1","confirmPassword":"secret1","role":"caregiver"}"#,
        )
        .unwrap();
        assert_eq!(req.confirm_password, "secret1");
        assert_eq!(req.role, "caregiver");
    }

    #[test]
    fn test_missing_request_fields_are_empty() {
        let req: LoginRequest = serde_json::from_str(r#"{"email":"d@x.io"}"#).unwrap();
        assert_eq!(req.email, "d@x.io");
        assert!(req.password.is_empty());
        assert!(req.role.is_empty());

        let note: NoteRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(note.note, "");
    }

    #[test]
    fn test_login_response_shape() {
        let resp = LoginResponse {
            token: "abc".to_string(),
            user: PublicUser {
                id: "u1".to_string(),
                name: "Dana".to_string(),
                email: "d@x.io".to_string(),
                role: Role::Doctor,
            },
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["token"], "abc");
        assert_eq!(value["user"]["role"], "doctor");
        assert!(value["user"].get("password").is_none());
    }

    #[test]
    fn test_logout_request_token_optional() {
        let empty = serde_json::to_string(&LogoutRequest::default()).unwrap();
        assert_eq!(empty, "{}");
    }

    #[test]
    fn test_summary_query_name() {
        let q = SummaryQuery {
            tz_offset_minutes: Some(-300),
        };
        assert_eq!(
            serde_json::to_string(&q).unwrap(),
            r#"{"tzOffsetMinutes":-300}"#
        );
    }
}
