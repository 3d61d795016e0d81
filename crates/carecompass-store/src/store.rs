//! The store: in-memory document, serialized writers, durable commits.

use crate::backend::{Backend, MemoryBackend};
use crate::snapshot::{Mutation, Snapshot};
use crate::{Result, StoreError};
use carecompass_core::credentials::{
    generate_share_code, generate_token, normalize_email, SHARE_CODE_LEN,
};
use carecompass_core::{
    ClinicianNote, LogEntry, Patient, PublicUser, Role, Session, ShareLink, User,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Counts removed by [`Store::prune_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PruneStats {
    pub sessions: usize,
    pub share_links: usize,
}

impl PruneStats {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0 && self.share_links == 0
    }
}

/// Document counts per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub doctors: usize,
    pub caregivers: usize,
    pub patients: usize,
    pub logs: usize,
    pub clinician_notes: usize,
    pub share_links: usize,
    pub sessions: usize,
}

impl StoreStats {
    fn of(db: &Snapshot) -> Self {
        Self {
            doctors: db.doctors.len(),
            caregivers: db.caregivers.len(),
            patients: db.patients.len(),
            logs: db.logs.len(),
            clinician_notes: db.clinician_notes.len(),
            share_links: db.share_links.len(),
            sessions: db.sessions.len(),
        }
    }
}

/// CareCompass document store.
///
/// Writes:
/// - are serialized by `gate`,
/// - compute the next document from the current one,
/// - commit to the backend before the next document is published.
///
/// Reads clone out of `state` and never wait on the backend.
pub struct Store {
    backend: Arc<dyn Backend>,
    gate: Mutex<()>,
    state: RwLock<Snapshot>,
}

fn millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Newest first; ties keep reverse insertion order.
fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> i64) -> Vec<T> {
    items.sort_by_key(|item| created_at(item));
    items.reverse();
    items
}

impl Store {
    /// Open a store over `backend`, loading whatever it holds.
    pub async fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        let snapshot = backend.load().await?;
        let stats = StoreStats::of(&snapshot);
        info!(
            backend = backend.name(),
            patients = stats.patients,
            logs = stats.logs,
            sessions = stats.sessions,
            "Opened store"
        );
        Ok(Self {
            backend,
            gate: Mutex::new(()),
            state: RwLock::new(snapshot),
        })
    }

    /// Empty store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
            gate: Mutex::new(()),
            state: RwLock::new(Snapshot::default()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run `decide` against the current document under the writer gate and
    /// commit the mutation it returns, if any.
    async fn write<T>(
        &self,
        decide: impl FnOnce(&Snapshot) -> Result<(Option<Mutation>, T)>,
    ) -> Result<T> {
        let _guard = self.gate.lock().await;

        let mut next = self.state.read().clone();
        let (mutation, out) = decide(&next)?;
        let Some(mutation) = mutation else {
            return Ok(out);
        };

        mutation.apply(&mut next);
        self.backend.commit(&mutation, &next).await?;
        *self.state.write() = next;

        debug!(op = mutation.op(), "Committed mutation");
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Users and sessions
    // ------------------------------------------------------------------

    /// Insert a user. The email is stored normalized.
    pub async fn create_user(&self, mut user: User) -> Result<User> {
        user.email = normalize_email(&user.email);
        self.write(|db| {
            let taken = db
                .users(user.role)
                .iter()
                .any(|u| normalize_email(&u.email) == user.email);
            if taken {
                return Err(StoreError::DuplicateEmail(user.email.clone()));
            }
            Ok((
                Some(Mutation::InsertUser { user: user.clone() }),
                user.clone(),
            ))
        })
        .await
    }

    pub fn find_user(&self, role: Role, email: &str) -> Option<User> {
        let email = normalize_email(email);
        self.state
            .read()
            .users(role)
            .iter()
            .find(|u| normalize_email(&u.email) == email)
            .cloned()
    }

    /// Start a session for `user` expiring `ttl` after `now`.
    pub async fn create_session(&self, user: PublicUser, ttl: Duration, now: i64) -> Result<Session> {
        let session = Session {
            token: generate_token(),
            user,
            expires_at: now.saturating_add(millis(ttl)),
        };
        self.write(|_| {
            Ok((
                Some(Mutation::PutSession {
                    session: session.clone(),
                }),
                session.clone(),
            ))
        })
        .await
    }

    /// Look up a live session. An expired one is removed on the way out.
    pub async fn session(&self, token: &str, now: i64) -> Result<Option<Session>> {
        let found = self.state.read().sessions.get(token).cloned();
        match found {
            None => Ok(None),
            Some(session) if !session.is_expired(now) => Ok(Some(session)),
            Some(_) => {
                debug!("Session expired, removing");
                self.write(|db| {
                    // another writer may have replaced or dropped it meanwhile
                    let still_expired = db
                        .sessions
                        .get(token)
                        .is_some_and(|s| s.is_expired(now));
                    let mutation = still_expired.then(|| Mutation::RemoveSession {
                        token: token.to_string(),
                    });
                    Ok((mutation, ()))
                })
                .await?;
                Ok(None)
            }
        }
    }

    /// Remove a session. Unknown tokens are ignored.
    pub async fn remove_session(&self, token: &str) -> Result<bool> {
        self.write(|db| {
            if db.sessions.contains_key(token) {
                Ok((
                    Some(Mutation::RemoveSession {
                        token: token.to_string(),
                    }),
                    true,
                ))
            } else {
                Ok((None, false))
            }
        })
        .await
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub fn patients(&self) -> Vec<Patient> {
        self.state.read().patients.clone()
    }

    pub fn patient(&self, id: &str) -> Option<Patient> {
        self.state.read().patients.iter().find(|p| p.id == id).cloned()
    }

    pub async fn insert_patient(&self, patient: Patient) -> Result<Patient> {
        self.write(|db| {
            if db.has_patient(&patient.id) {
                return Err(StoreError::PatientExists(patient.id.clone()));
            }
            Ok((
                Some(Mutation::InsertPatient {
                    patient: patient.clone(),
                }),
                patient.clone(),
            ))
        })
        .await
    }

    /// Remove a patient with its logs, notes and share link.
    pub async fn remove_patient(&self, id: &str) -> Result<()> {
        self.write(|db| {
            let referenced = db.has_patient(id)
                || db.logs.iter().any(|l| l.patient_id == id)
                || db.clinician_notes.iter().any(|n| n.patient_id == id)
                || db.share_links.contains_key(id);
            let mutation = referenced.then(|| Mutation::RemovePatient { id: id.to_string() });
            Ok((mutation, ()))
        })
        .await?;
        info!(patient = %id, "Removed patient");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Logs and notes
    // ------------------------------------------------------------------

    /// Append a log for `patient_id`; the id overrides the entry's own.
    pub async fn append_log(&self, patient_id: &str, mut entry: LogEntry) -> Result<LogEntry> {
        entry.patient_id = patient_id.to_string();
        self.write(|_| {
            Ok((
                Some(Mutation::AppendLog { log: entry.clone() }),
                entry.clone(),
            ))
        })
        .await
    }

    /// Logs for a patient, newest first.
    pub fn logs(&self, patient_id: &str) -> Vec<LogEntry> {
        let logs: Vec<LogEntry> = self
            .state
            .read()
            .logs
            .iter()
            .filter(|l| l.patient_id == patient_id)
            .cloned()
            .collect();
        newest_first(logs, |l| l.created_at)
    }

    pub async fn append_note(&self, patient_id: &str, note: String, now: i64) -> Result<ClinicianNote> {
        let note = ClinicianNote {
            patient_id: patient_id.to_string(),
            note,
            created_at: now,
        };
        self.write(|_| {
            Ok((
                Some(Mutation::AppendNote { note: note.clone() }),
                note.clone(),
            ))
        })
        .await
    }

    /// Clinician notes for a patient, newest first.
    pub fn notes(&self, patient_id: &str) -> Vec<ClinicianNote> {
        let notes: Vec<ClinicianNote> = self
            .state
            .read()
            .clinician_notes
            .iter()
            .filter(|n| n.patient_id == patient_id)
            .cloned()
            .collect();
        newest_first(notes, |n| n.created_at)
    }

    // ------------------------------------------------------------------
    // Share links
    // ------------------------------------------------------------------

    /// Store `link` as the patient's share link, replacing any previous one.
    pub async fn put_share_link(&self, patient_id: &str, link: ShareLink) -> Result<ShareLink> {
        self.write(|_| {
            Ok((
                Some(Mutation::PutShareLink {
                    patient_id: patient_id.to_string(),
                    link: link.clone(),
                }),
                link.clone(),
            ))
        })
        .await
    }

    /// Generate a fresh link under `base_url` with a code no live link uses.
    pub async fn create_share_link(
        &self,
        patient_id: &str,
        base_url: &str,
        ttl: Duration,
        now: i64,
    ) -> Result<ShareLink> {
        let base_url = base_url.trim_end_matches('/');
        let expires_at = now.saturating_add(millis(ttl));
        self.write(|db| {
            let in_use: BTreeSet<&str> = db
                .share_links
                .iter()
                .filter(|(pid, l)| pid.as_str() != patient_id && !l.is_expired(now))
                .map(|(_, l)| l.code.as_str())
                .collect();
            let code = loop {
                let code = generate_share_code(SHARE_CODE_LEN);
                if !in_use.contains(code.as_str()) {
                    break code;
                }
            };
            let link = ShareLink {
                url: format!("{base_url}/share/{code}"),
                code,
                expires_at,
            };
            Ok((
                Some(Mutation::PutShareLink {
                    patient_id: patient_id.to_string(),
                    link: link.clone(),
                }),
                link,
            ))
        })
        .await
    }

    /// The patient's live share link. An expired one is removed.
    pub async fn share_link(&self, patient_id: &str, now: i64) -> Result<Option<ShareLink>> {
        let found = self.state.read().share_links.get(patient_id).cloned();
        match found {
            None => Ok(None),
            Some(link) if !link.is_expired(now) => Ok(Some(link)),
            Some(_) => {
                self.write(|db| {
                    let still_expired = db
                        .share_links
                        .get(patient_id)
                        .is_some_and(|l| l.is_expired(now));
                    let mutation = still_expired.then(|| Mutation::RemoveShareLink {
                        patient_id: patient_id.to_string(),
                    });
                    Ok((mutation, ()))
                })
                .await?;
                Ok(None)
            }
        }
    }

    /// Resolve a public share code to `(patient_id, link)`.
    pub fn share_link_by_code(&self, code: &str, now: i64) -> Option<(String, ShareLink)> {
        let code = code.trim().to_ascii_uppercase();
        self.state
            .read()
            .share_links
            .iter()
            .find(|(_, l)| l.code == code && !l.is_expired(now))
            .map(|(pid, l)| (pid.clone(), l.clone()))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Drop every expired session and share link.
    pub async fn prune_expired(&self, now: i64) -> Result<PruneStats> {
        let stats = self
            .write(|db| {
                let stats = PruneStats {
                    sessions: db.sessions.values().filter(|s| s.is_expired(now)).count(),
                    share_links: db.share_links.values().filter(|l| l.is_expired(now)).count(),
                };
                let mutation = (!stats.is_empty()).then_some(Mutation::PruneExpired { now });
                Ok((mutation, stats))
            })
            .await?;

        if !stats.is_empty() {
            info!(
                sessions = stats.sessions,
                share_links = stats.share_links,
                "Pruned expired entries"
            );
        }
        Ok(stats)
    }

    /// Create a bare patient record for every patient id that only appears
    /// in logs. Returns the created ids in order of first appearance.
    pub async fn repair_missing_patients(&self) -> Result<Vec<String>> {
        let missing: Vec<String> = {
            let db = self.state.read();
            let mut seen = BTreeSet::new();
            let missing = db
                .logs
                .iter()
                .map(|l| l.patient_id.clone())
                .filter(|id| !id.is_empty() && !db.has_patient(id) && seen.insert(id.clone()))
                .collect();
            missing
        };

        let mut created = Vec::with_capacity(missing.len());
        for id in missing {
            match self.insert_patient(Patient::new(id.clone())).await {
                Ok(_) => created.push(id),
                Err(StoreError::PatientExists(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !created.is_empty() {
            info!(count = created.len(), "Created missing patient records");
        }
        Ok(created)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats::of(&self.state.read())
    }

    /// A copy of the whole document.
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    /// Replace the whole document.
    pub async fn import(&self, snapshot: Snapshot) -> Result<StoreStats> {
        let stats = StoreStats::of(&snapshot);
        self.write(|_| {
            Ok((
                Some(Mutation::Import {
                    snapshot: Box::new(snapshot),
                }),
                (),
            ))
        })
        .await?;
        info!(
            backend = self.backend.name(),
            patients = stats.patients,
            logs = stats.logs,
            "Imported snapshot"
        );
        Ok(stats)
    }
}
