//! Patient-care records shared by the store, the server and the client.
//!
//! Every record serializes as camelCase JSON with millisecond timestamps.
//! Patients and logs are open documents: fields this crate does not know
//! about are kept in `extra` and written back unchanged.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Hydration value counted as a drink in weekly summaries.
pub const HYDRATION_DRANK: &str = "drank";
/// Food values counted as a meal eaten.
pub const FOOD_EATEN: [&str; 2] = ["full", "partial"];
/// Medication value counted as a dose given on time.
pub const MEDS_GIVEN: &str = "given";

/// Account role. Doctors and caregivers live in separate collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Caregiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Caregiver => "caregiver",
        }
    }

    /// Name of the collection holding users of this role.
    pub fn collection(&self) -> &'static str {
        match self {
            Role::Doctor => "doctors",
            Role::Caregiver => "caregivers",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Role::Doctor),
            "caregiver" => Ok(Role::Caregiver),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

/// A registered account as stored. Never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Hex SHA-256 digest of the password
    #[serde(rename = "password")]
    pub password_hash: String,
    pub role: Role,
    pub created_at: i64,
}

impl User {
    /// The projection returned to clients and kept in sessions.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

/// User fields safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Coarse patient status shown on dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientStatus {
    Risk,
    #[default]
    Stable,
}

impl fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientStatus::Risk => f.write_str("risk"),
            PatientStatus::Stable => f.write_str("stable"),
        }
    }
}

/// Patient document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PatientStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Patient {
    /// A bare patient with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            diagnosis: None,
            status: None,
            sleep_hours: None,
            extra: Map::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = Some(diagnosis.into());
        self
    }

    pub fn with_status(mut self, status: PatientStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_sleep_hours(mut self, hours: Vec<f64>) -> Self {
        self.sleep_hours = Some(hours);
        self
    }

    /// Display name, falling back to `Patient <id>`.
    pub fn display_name(&self) -> String {
        match non_empty(&self.name) {
            Some(name) => name.to_string(),
            None => format!("Patient {}", self.id),
        }
    }
}

/// A caregiver's behavioral/health log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub patient_id: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antecedent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hydration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meds: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LogEntry {
    /// An empty entry for a patient at the given time.
    pub fn new(patient_id: impl Into<String>, created_at: i64) -> Self {
        Self {
            patient_id: patient_id.into(),
            created_at,
            mood: None,
            antecedent: None,
            behavior: None,
            consequence: None,
            note: None,
            sleep_start: None,
            sleep_end: None,
            hydration: None,
            food: None,
            meds: None,
            extra: Map::new(),
        }
    }

    /// Build an entry from a client payload.
    ///
    /// `patient_id` always wins over a `patientId` in the payload. A missing
    /// or non-positive `createdAt` is replaced by `now`.
    pub fn from_payload(
        patient_id: &str,
        mut payload: Map<String, Value>,
        now: i64,
    ) -> Result<Self, serde_json::Error> {
        payload.insert("patientId".to_string(), Value::from(patient_id));
        let created_at = payload
            .get("createdAt")
            .and_then(Value::as_i64)
            .filter(|ts| *ts > 0)
            .unwrap_or(now);
        payload.insert("createdAt".to_string(), Value::from(created_at));
        serde_json::from_value(Value::Object(payload))
    }

    /// Whether the entry records sleep times.
    pub fn has_sleep(&self) -> bool {
        non_empty(&self.sleep_start).is_some() || non_empty(&self.sleep_end).is_some()
    }

    /// Whether the entry describes a behavioral incident.
    pub fn is_incident(&self) -> bool {
        non_empty(&self.behavior).is_some() || non_empty(&self.consequence).is_some()
    }

    pub fn drank(&self) -> bool {
        self.hydration.as_deref() == Some(HYDRATION_DRANK)
    }

    pub fn ate_meal(&self) -> bool {
        self.food
            .as_deref()
            .is_some_and(|food| FOOD_EATEN.contains(&food))
    }

    pub fn meds_given(&self) -> bool {
        self.meds.as_deref() == Some(MEDS_GIVEN)
    }
}

/// A clinician's free-text note on a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicianNote {
    pub patient_id: String,
    #[serde(default)]
    pub note: String,
    pub created_at: i64,
}

/// Temporary public link to a patient's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub code: String,
    pub url: String,
    pub expires_at: i64,
}

impl ShareLink {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Authenticated session keyed by its bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user: PublicUser,
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// Treat empty strings as absent.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}
