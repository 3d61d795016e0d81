//! Local-first data layer.
//!
//! Writes are saved to the state file, then pushed to the server when it is
//! reachable and a session token is held. A rejected token is forgotten.

use anyhow::{Context, Result};
use carecompass_api::{ApiClient, ClientError, LoginRequest, RegisterRequest};
use carecompass_core::{
    now_millis, ClinicianNote, LogEntry, Patient, PatientStatus, PublicUser, Role, ShareLink,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::local::{default_patients, LocalState, LocalStore};

/// Result of pulling server data into the state file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No server configured or it did not answer
    Offline,
    /// No session token held
    SignedOut,
    /// The server rejected the token; it has been cleared
    Unauthorized,
    /// The server holds no patients; local data was kept
    NoServerData,
    Synced {
        patients: usize,
        logs: usize,
        notes: usize,
        share_links: usize,
    },
}

/// State file plus an optional server connection.
pub struct DataLayer {
    local: LocalStore,
    state: LocalState,
    client: Option<ApiClient>,
}

impl DataLayer {
    /// Load the state file. Pass `None` to work offline.
    pub fn open(local: LocalStore, client: Option<ApiClient>) -> Self {
        let state = local.load();
        let client = client.map(|mut c| {
            c.set_token(state.auth_token.clone());
            c
        });
        Self {
            local,
            state,
            client,
        }
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn client(&self) -> Option<&ApiClient> {
        self.client.as_ref()
    }

    pub fn save(&self) -> Result<()> {
        self.local.save(&self.state)
    }

    fn set_token(&mut self, token: Option<String>) {
        self.state.auth_token = token.clone();
        if let Some(client) = self.client.as_mut() {
            client.set_token(token);
        }
    }

    /// Client to push through: reachable and holding a token
    async fn online(&self) -> Option<&ApiClient> {
        let client = self.client.as_ref()?;
        client.token()?;
        if client.is_available().await {
            Some(client)
        } else {
            None
        }
    }

    /// Log a failed push; forget the token if the server rejected it.
    fn push_failed(&mut self, what: &str, error: ClientError) -> Result<()> {
        warn!(error = %error, "Failed to push {} to server", what);
        if error.is_unauthorized() {
            self.set_token(None);
            self.save()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<PublicUser> {
        let client = self.client.as_ref().context("No server configured")?;
        let request = RegisterRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: password.to_string(),
            role: role.to_string(),
        };
        Ok(client.register(&request).await?.user)
    }

    /// Log in and keep the session token in the state file
    pub async fn login(&mut self, email: &str, password: &str, role: Role) -> Result<PublicUser> {
        let client = self.client.as_ref().context("No server configured")?;
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            role: role.to_string(),
        };
        let response = client.login(&request).await?;
        self.set_token(Some(response.token));
        self.save()?;
        Ok(response.user)
    }

    /// End the session. The local token is cleared even if the server
    /// cannot be told.
    pub async fn logout(&mut self) -> Result<bool> {
        if self.state.auth_token.is_none() {
            return Ok(false);
        }
        if let Some(client) = self.client.as_ref() {
            if let Err(e) = client.logout().await {
                debug!(error = %e, "Server logout failed");
            }
        }
        self.set_token(None);
        self.save()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub fn select_patient(&mut self, id: &str) -> Result<()> {
        self.state.select(id)?;
        self.save()
    }

    pub async fn add_patient(&mut self, patient: Patient) -> Result<()> {
        self.state.add_patient(patient.clone())?;
        self.save()?;

        let pushed = match self.online().await {
            Some(client) => Some(client.create_patient(&patient).await),
            None => None,
        };
        if let Some(Err(e)) = pushed {
            self.push_failed("patient", e)?;
        }
        Ok(())
    }

    pub async fn remove_patient(&mut self, id: &str) -> Result<()> {
        self.state.remove_patient(id);
        self.save()?;

        let pushed = match self.online().await {
            Some(client) => Some(client.delete_patient(id).await),
            None => None,
        };
        if let Some(Err(e)) = pushed {
            self.push_failed("patient removal", e)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Logs and notes
    // ------------------------------------------------------------------

    pub async fn add_log(&mut self, patient_id: &str, payload: Map<String, Value>) -> Result<LogEntry> {
        let entry = self.state.add_log(patient_id, payload, now_millis())?;
        self.save()?;

        let pushed = match self.online().await {
            Some(client) => Some(client.add_log(patient_id, &entry).await),
            None => None,
        };
        if let Some(Err(e)) = pushed {
            self.push_failed("log", e)?;
        }
        Ok(entry)
    }

    pub async fn add_note(&mut self, patient_id: &str, note: &str) -> Result<ClinicianNote> {
        let note = self.state.add_note(patient_id, note, now_millis());
        self.save()?;

        let pushed = match self.online().await {
            Some(client) => Some(client.add_note(patient_id, &note.note).await),
            None => None,
        };
        if let Some(Err(e)) = pushed {
            self.push_failed("note", e)?;
        }
        Ok(note)
    }

    // ------------------------------------------------------------------
    // Share links
    // ------------------------------------------------------------------

    /// Create a share link on the server, or locally when that fails
    pub async fn create_share_link(&mut self, patient_id: &str) -> Result<ShareLink> {
        let created = match self.online().await {
            Some(client) => Some(client.create_share_link(patient_id).await),
            None => None,
        };

        let link = match created {
            Some(Ok(link)) => {
                self.state
                    .share_links
                    .insert(patient_id.to_string(), link.clone());
                link
            }
            Some(Err(e)) => {
                self.push_failed("share link", e)?;
                self.state.local_share_link(patient_id, now_millis())
            }
            None => self.state.local_share_link(patient_id, now_millis()),
        };
        self.save()?;
        Ok(link)
    }

    /// The patient's live share link from the state file
    pub fn share_link(&mut self, patient_id: &str) -> Result<Option<ShareLink>> {
        let (link, dropped) = self.state.share_link(patient_id, now_millis());
        if dropped {
            self.save()?;
        }
        Ok(link)
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Replace local patients, logs and notes with the server's copy
    pub async fn sync(&mut self) -> Result<SyncOutcome> {
        let Some(client) = self.client.as_ref() else {
            return Ok(SyncOutcome::Offline);
        };
        if !client.is_available().await {
            return Ok(SyncOutcome::Offline);
        }
        if client.token().is_none() {
            return Ok(SyncOutcome::SignedOut);
        }

        let server_patients = match client.patients().await {
            Ok(patients) => patients,
            Err(e) if e.is_unauthorized() => {
                self.set_token(None);
                self.save()?;
                return Ok(SyncOutcome::Unauthorized);
            }
            Err(e) => return Err(e).context("Failed to fetch patients"),
        };
        if server_patients.is_empty() {
            return Ok(SyncOutcome::NoServerData);
        }

        let patients: Vec<Patient> = server_patients.into_iter().map(merge_defaults).collect();
        let mut logs = Vec::new();
        let mut notes = Vec::new();
        let mut share_links = BTreeMap::new();

        for patient in &patients {
            match client.logs(&patient.id).await {
                Ok(fetched) => logs.extend(fetched),
                Err(e) => warn!(patient = %patient.id, error = %e, "Failed to fetch logs"),
            }
            match client.notes(&patient.id).await {
                Ok(fetched) => notes.extend(fetched),
                Err(e) => warn!(patient = %patient.id, error = %e, "Failed to fetch notes"),
            }
            match client.share_link(&patient.id).await {
                Ok(Some(link)) => {
                    share_links.insert(patient.id.clone(), link);
                }
                Ok(None) => {}
                Err(e) => debug!(patient = %patient.id, error = %e, "Failed to fetch share link"),
            }
        }

        let outcome = SyncOutcome::Synced {
            patients: patients.len(),
            logs: logs.len(),
            notes: notes.len(),
            share_links: share_links.len(),
        };

        self.state.replace_synced(patients, logs, notes, share_links);
        self.save()?;

        Ok(outcome)
    }
}

/// Fill fields the server left out, from the matching demo patient or
/// from generic placeholders.
fn merge_defaults(mut patient: Patient) -> Patient {
    let fallback = default_patients()
        .into_iter()
        .find(|p| p.id == patient.id)
        .unwrap_or_else(|| {
            Patient::new(patient.id.clone())
                .with_name(format!("Patient {}", patient.id))
                .with_diagnosis("Not specified")
                .with_status(PatientStatus::Stable)
                .with_sleep_hours(Vec::new())
        });

    patient.name = patient.name.or(fallback.name);
    patient.diagnosis = patient.diagnosis.or(fallback.diagnosis);
    patient.status = patient.status.or(fallback.status);
    patient.sleep_hours = patient.sleep_hours.or(fallback.sleep_hours);
    patient
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LOCAL_SHARE_HOST;
    use carecompass_core::{BackendKind, ServerConfig};
    use carecompass_server::Server;
    use carecompass_store::Store;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::broadcast;

    fn offline_layer(dir: &std::path::Path) -> DataLayer {
        DataLayer::open(LocalStore::new(dir.join("local.json")), None)
    }

    #[test]
    fn test_merge_known_patient_keeps_server_fields() {
        let merged = merge_defaults(Patient::new("alex").with_status(PatientStatus::Stable));
        assert_eq!(merged.name.as_deref(), Some("Alex Doe"));
        assert_eq!(merged.diagnosis.as_deref(), Some("ASD Level 2"));
        assert_eq!(merged.status, Some(PatientStatus::Stable));
        assert_eq!(merged.sleep_hours.as_ref().map(Vec::len), Some(7));
    }

    #[test]
    fn test_merge_unknown_patient_gets_placeholders() {
        let merged = merge_defaults(Patient::new("p9").with_diagnosis("Autism"));
        assert_eq!(merged.name.as_deref(), Some("Patient p9"));
        assert_eq!(merged.diagnosis.as_deref(), Some("Autism"));
        assert_eq!(merged.status, Some(PatientStatus::Stable));
        assert_eq!(merged.sleep_hours, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_offline_writes_persist() {
        let temp_dir = tempdir().unwrap();
        let mut layer = offline_layer(temp_dir.path());

        layer
            .add_patient(Patient::new("zoe").with_name("Zoe"))
            .await
            .unwrap();
        let payload = json!({"mood": "happy"}).as_object().cloned().unwrap();
        layer.add_log("zoe", payload).await.unwrap();
        layer.add_note("zoe", "Doing well").await.unwrap();

        let reopened = offline_layer(temp_dir.path());
        assert!(reopened.state().patient("zoe").is_some());
        assert_eq!(reopened.state().logs("zoe")[0].mood.as_deref(), Some("happy"));
        assert_eq!(reopened.state().notes("zoe")[0].note, "Doing well");
    }

    #[tokio::test]
    async fn test_offline_share_link_is_local() {
        let temp_dir = tempdir().unwrap();
        let mut layer = offline_layer(temp_dir.path());
        let link = layer.create_share_link("alex").await.unwrap();
        assert!(link.url.starts_with("carecompass.app/share/"));
        assert_eq!(layer.share_link("alex").unwrap(), Some(link));
    }

    struct TestServer {
        url: String,
        store: Arc<Store>,
        shutdown: broadcast::Sender<()>,
    }

    impl TestServer {
        async fn start() -> Self {
            let config = ServerConfig {
                backend: BackendKind::Memory,
                ..ServerConfig::default()
            };
            let store = Arc::new(Store::in_memory());
            let server = Server::with_store(config, store.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let shutdown = server.shutdown_handle();
            tokio::spawn(server.serve(listener));
            Self {
                url,
                store,
                shutdown,
            }
        }

        fn layer(&self, dir: &std::path::Path) -> DataLayer {
            let client = ApiClient::new(&self.url).unwrap();
            DataLayer::open(LocalStore::new(dir.join("local.json")), Some(client))
        }
    }

    async fn signed_in(server: &TestServer, dir: &std::path::Path, register: bool) -> DataLayer {
        let mut layer = server.layer(dir);
        if register {
            layer
                .register("Dana Lee", "dana@example.com", "secret1", Role::Caregiver)
                .await
                .unwrap();
        }
        layer
            .login("dana@example.com", "secret1", Role::Caregiver)
            .await
            .unwrap();
        layer
    }

    #[tokio::test]
    async fn test_writes_are_pushed_and_synced() {
        let server = TestServer::start().await;
        let first_dir = tempdir().unwrap();
        let mut first = signed_in(&server, first_dir.path(), true).await;
        assert!(first.state().auth_token.is_some());

        first
            .add_patient(Patient::new("zoe").with_diagnosis("ADHD"))
            .await
            .unwrap();
        let payload = json!({"behavior": "outburst"}).as_object().cloned().unwrap();
        first.add_log("zoe", payload).await.unwrap();
        first.add_note("zoe", "Follow up").await.unwrap();

        assert!(server.store.patient("zoe").is_some());
        assert_eq!(server.store.logs("zoe").len(), 1);
        assert_eq!(server.store.notes("zoe").len(), 1);

        let second_dir = tempdir().unwrap();
        let mut second = signed_in(&server, second_dir.path(), false).await;
        let outcome = second.sync().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                patients: 1,
                logs: 1,
                notes: 1,
                share_links: 0,
            }
        );

        let state = second.state();
        assert_eq!(state.selected_patient, "zoe");
        let zoe = state.patient("zoe").unwrap();
        assert_eq!(zoe.name.as_deref(), Some("Patient zoe"));
        assert_eq!(zoe.diagnosis.as_deref(), Some("ADHD"));
        assert_eq!(state.logs("zoe")[0].behavior.as_deref(), Some("outburst"));

        server.shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_sync_without_server_patients_keeps_local() {
        let server = TestServer::start().await;
        let temp_dir = tempdir().unwrap();
        let mut layer = signed_in(&server, temp_dir.path(), true).await;
        assert_eq!(layer.sync().await.unwrap(), SyncOutcome::NoServerData);
        assert_eq!(layer.state().patients.len(), 4);
        server.shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_rejected_token_is_cleared() {
        let server = TestServer::start().await;
        let temp_dir = tempdir().unwrap();
        let local = LocalStore::new(temp_dir.path().join("local.json"));
        let state = LocalState {
            auth_token: Some("stale".to_string()),
            ..LocalState::default()
        };
        local.save(&state).unwrap();

        let mut layer = server.layer(temp_dir.path());
        assert_eq!(layer.sync().await.unwrap(), SyncOutcome::Unauthorized);
        assert_eq!(layer.state().auth_token, None);
        assert_eq!(local.load().auth_token, None);
        assert_eq!(layer.sync().await.unwrap(), SyncOutcome::SignedOut);
        server.shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_share_link_created_on_server() {
        let server = TestServer::start().await;
        let temp_dir = tempdir().unwrap();
        let mut layer = signed_in(&server, temp_dir.path(), true).await;
        layer.add_patient(Patient::new("zoe")).await.unwrap();

        let link = layer.create_share_link("zoe").await.unwrap();
        assert!(link.url.ends_with(&format!("/share/{}", link.code)));
        assert!(!link.url.starts_with(LOCAL_SHARE_HOST));
        let stored = server.store.share_link("zoe", now_millis()).await.unwrap();
        assert_eq!(stored, Some(link));
        server.shutdown.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_sync_offline() {
        let temp_dir = tempdir().unwrap();
        let mut layer = offline_layer(temp_dir.path());
        assert_eq!(layer.sync().await.unwrap(), SyncOutcome::Offline);
        assert!(!layer.logout().await.unwrap());
    }
}
