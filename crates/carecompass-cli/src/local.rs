//! Local state file.
//!
//! Everything the CLI shows is read from this file. Writes land here first
//! and are pushed to the server afterwards when one is reachable.

use anyhow::{Context, Result};
use carecompass_core::credentials::{generate_share_code, SHARE_CODE_LEN};
use carecompass_core::{ClinicianNote, LogEntry, Patient, PatientStatus, ShareLink};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Patient selected when nothing else is
pub const DEFAULT_PATIENT: &str = "alex";

/// Host used for share links generated without a server
pub const LOCAL_SHARE_HOST: &str = "carecompass.app";

/// Lifetime of a locally generated share link
pub const LOCAL_SHARE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// The demo patients a fresh state file starts with
pub fn default_patients() -> Vec<Patient> {
    vec![
        Patient::new("alex")
            .with_name("Alex Doe")
            .with_diagnosis("ASD Level 2")
            .with_status(PatientStatus::Risk)
            .with_sleep_hours(vec![7.0, 6.5, 5.0, 6.0, 8.0, 8.5, 7.5]),
        Patient::new("sarah")
            .with_name("Sarah Smith")
            .with_diagnosis("Down Syndrome")
            .with_status(PatientStatus::Stable)
            .with_sleep_hours(vec![8.0, 8.0, 8.0, 7.5, 8.0, 8.0, 7.0]),
        Patient::new("mike")
            .with_name("Mike Jones")
            .with_diagnosis("ADHD / SPD")
            .with_status(PatientStatus::Stable)
            .with_sleep_hours(vec![7.0, 6.0, 6.5, 7.0, 6.5, 7.0, 7.5]),
        Patient::new("emily")
            .with_name("Emily Clark")
            .with_diagnosis("Global Delay")
            .with_status(PatientStatus::Risk)
            .with_sleep_hours(vec![6.0, 5.0, 5.5, 6.0, 6.5, 6.0, 6.0]),
    ]
}

fn default_selected() -> String {
    DEFAULT_PATIENT.to_string()
}

/// Contents of the state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default = "default_selected")]
    pub selected_patient: String,
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub clinician_notes: Vec<ClinicianNote>,
    #[serde(default)]
    pub share_links: BTreeMap<String, ShareLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            selected_patient: default_selected(),
            patients: default_patients(),
            logs: Vec::new(),
            clinician_notes: Vec::new(),
            share_links: BTreeMap::new(),
            auth_token: None,
        }
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> i64) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

impl LocalState {
    pub fn patient(&self, id: &str) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn select(&mut self, id: &str) -> Result<()> {
        if self.patient(id).is_none() {
            anyhow::bail!("Unknown patient: {}", id);
        }
        self.selected_patient = id.to_string();
        Ok(())
    }

    pub fn add_patient(&mut self, patient: Patient) -> Result<()> {
        if self.patient(&patient.id).is_some() {
            anyhow::bail!("Patient ID already exists");
        }
        self.patients.push(patient);
        Ok(())
    }

    /// Remove a patient and everything recorded for them
    pub fn remove_patient(&mut self, id: &str) {
        self.patients.retain(|p| p.id != id);
        self.logs.retain(|l| l.patient_id != id);
        self.clinician_notes.retain(|n| n.patient_id != id);
        self.share_links.remove(id);

        if self.selected_patient == id {
            self.selected_patient = self
                .patients
                .first()
                .map(|p| p.id.clone())
                .unwrap_or_else(default_selected);
        }
    }

    pub fn add_log(&mut self, patient_id: &str, payload: Map<String, Value>, now: i64) -> Result<LogEntry> {
        let entry = LogEntry::from_payload(patient_id, payload, now).context("Invalid log entry")?;
        self.logs.push(entry.clone());
        Ok(entry)
    }

    /// Logs for a patient, newest first
    pub fn logs(&self, patient_id: &str) -> Vec<LogEntry> {
        let logs: Vec<LogEntry> = self
            .logs
            .iter()
            .filter(|l| l.patient_id == patient_id)
            .cloned()
            .collect();
        newest_first(logs, |l| l.created_at)
    }

    pub fn add_note(&mut self, patient_id: &str, note: &str, now: i64) -> ClinicianNote {
        let note = ClinicianNote {
            patient_id: patient_id.to_string(),
            note: note.to_string(),
            created_at: now,
        };
        self.clinician_notes.push(note.clone());
        note
    }

    pub fn notes(&self, patient_id: &str) -> Vec<ClinicianNote> {
        let notes: Vec<ClinicianNote> = self
            .clinician_notes
            .iter()
            .filter(|n| n.patient_id == patient_id)
            .cloned()
            .collect();
        newest_first(notes, |n| n.created_at)
    }

    /// Take over the server's records. Server share links win; local links
    /// stay only for patients the server still has.
    pub fn replace_synced(
        &mut self,
        patients: Vec<Patient>,
        logs: Vec<LogEntry>,
        notes: Vec<ClinicianNote>,
        share_links: BTreeMap<String, ShareLink>,
    ) {
        self.patients = patients;
        self.logs = logs;
        self.clinician_notes = notes;
        self.share_links.extend(share_links);

        let patients = &self.patients;
        self.share_links
            .retain(|id, _| patients.iter().any(|p| &p.id == id));
        if self.patient(&self.selected_patient).is_none() {
            if let Some(first) = self.patients.first() {
                self.selected_patient = first.id.clone();
            }
        }
    }

    /// Generate a share link without a server
    pub fn local_share_link(&mut self, patient_id: &str, now: i64) -> ShareLink {
        let code = generate_share_code(SHARE_CODE_LEN);
        let link = ShareLink {
            url: format!("{}/share/{}", LOCAL_SHARE_HOST, code),
            code,
            expires_at: now + LOCAL_SHARE_TTL_MS,
        };
        self.share_links.insert(patient_id.to_string(), link.clone());
        link
    }

    /// The live share link for a patient. Returns whether an expired link
    /// was dropped, so the caller knows to save.
    pub fn share_link(&mut self, patient_id: &str, now: i64) -> (Option<ShareLink>, bool) {
        match self.share_links.get(patient_id) {
            None => (None, false),
            Some(link) if !link.is_expired(now) => (Some(link.clone()), false),
            Some(_) => {
                self.share_links.remove(patient_id);
                (None, true)
            }
        }
    }
}

/// Reads and writes the state file.
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.carecompass/local.json`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".carecompass")
            .join("local.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, falling back to the demo defaults when the file is
    /// missing or unreadable. An empty patient list is refilled with the
    /// demo patients.
    pub fn load(&self) -> LocalState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return LocalState::default(),
        };

        match serde_json::from_str::<LocalState>(&raw) {
            Ok(mut state) => {
                if state.patients.is_empty() {
                    state.patients = default_patients();
                }
                state
            }
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Unreadable state file, using defaults");
                LocalState::default()
            }
        }
    }

    /// Write the state atomically
    pub fn save(&self, state: &LocalState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_file_gives_demo_patients() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path().join("local.json"));
        let state = store.load();
        assert_eq!(state.selected_patient, "alex");
        let ids: Vec<&str> = state.patients.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alex", "sarah", "mike", "emily"]);
        assert_eq!(state.patients[0].status, Some(PatientStatus::Risk));
    }

    #[test]
    fn test_empty_patients_are_refilled() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("local.json");
        std::fs::write(&path, r#"{"patients": [], "authToken": "t1"}"#).unwrap();
        let state = LocalStore::new(path).load();
        assert_eq!(state.patients.len(), 4);
        assert_eq!(state.auth_token.as_deref(), Some("t1"));
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("local.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(LocalStore::new(path).load(), LocalState::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let store = LocalStore::new(temp_dir.path().join("nested").join("local.json"));
        let mut state = LocalState::default();
        state
            .add_log("alex", payload(json!({"mood": "calm"})), 5)
            .unwrap();
        state.auth_token = Some("abc".to_string());
        store.save(&state).unwrap();

        assert_eq!(store.load(), state);
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"selectedPatient\""));
        assert!(raw.contains("\"clinicianNotes\""));
    }

    #[test]
    fn test_add_patient_rejects_duplicates() {
        let mut state = LocalState::default();
        let err = state.add_patient(Patient::new("alex")).unwrap_err();
        assert_eq!(err.to_string(), "Patient ID already exists");
        state.add_patient(Patient::new("zoe")).unwrap();
        assert!(state.patient("zoe").is_some());
    }

    #[test]
    fn test_remove_selected_patient_reselects() {
        let mut state = LocalState::default();
        state.add_log("alex", Map::new(), 1).unwrap();
        state.add_note("alex", "n", 1);
        state.local_share_link("alex", 0);

        state.remove_patient("alex");
        assert_eq!(state.selected_patient, "sarah");
        assert!(state.logs("alex").is_empty());
        assert!(state.notes("alex").is_empty());
        assert!(state.share_links.is_empty());

        for id in ["sarah", "mike", "emily"] {
            state.remove_patient(id);
        }
        assert_eq!(state.selected_patient, "alex");
    }

    #[test]
    fn test_select_unknown_patient() {
        let mut state = LocalState::default();
        assert!(state.select("nobody").is_err());
        state.select("mike").unwrap();
        assert_eq!(state.selected_patient, "mike");
    }

    #[test]
    fn test_logs_sorted_newest_first() {
        let mut state = LocalState::default();
        state.add_log("alex", payload(json!({"createdAt": 10})), 0).unwrap();
        state.add_log("alex", payload(json!({"createdAt": 30})), 0).unwrap();
        state.add_log("alex", Map::new(), 20).unwrap();
        let times: Vec<i64> = state.logs("alex").iter().map(|l| l.created_at).collect();
        assert_eq!(times, vec![30, 20, 10]);
    }

    #[test]
    fn test_replace_synced_drops_links_of_unknown_patients() {
        let mut state = LocalState::default();
        state.local_share_link("alex", 0);
        let local_zoe = state.local_share_link("zoe", 0);
        state.add_log("alex", Map::new(), 1).unwrap();

        let server_link = ShareLink {
            code: "ABC234".to_string(),
            url: "http://localhost:3000/share/ABC234".to_string(),
            expires_at: 99,
        };
        let mut links = BTreeMap::new();
        links.insert("mike".to_string(), server_link.clone());

        state.replace_synced(
            vec![Patient::new("mike"), Patient::new("zoe")],
            vec![LogEntry::new("mike", 5)],
            Vec::new(),
            links,
        );

        assert_eq!(state.share_links.len(), 2);
        assert_eq!(state.share_links["mike"], server_link);
        assert_eq!(state.share_links["zoe"], local_zoe);
        assert!(!state.share_links.contains_key("alex"));
        assert!(state.logs("alex").is_empty());
        assert_eq!(state.selected_patient, "mike");
    }

    #[test]
    fn test_local_share_link_expiry() {
        let mut state = LocalState::default();
        let link = state.local_share_link("alex", 1_000);
        assert_eq!(link.url, format!("carecompass.app/share/{}", link.code));
        assert_eq!(link.expires_at, 1_000 + LOCAL_SHARE_TTL_MS);

        assert_eq!(state.share_link("alex", 2_000), (Some(link.clone()), false));
        assert_eq!(state.share_link("alex", link.expires_at + 1), (None, true));
        assert_eq!(state.share_link("alex", 0), (None, false));
    }
}
