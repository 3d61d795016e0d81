//! The database document and the mutations applied to it.

use carecompass_core::{ClinicianNote, LogEntry, Patient, PublicUser, Role, Session, ShareLink, User};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Every collection the application keeps.
///
/// Serialized with the same top-level keys as the flat `db.json` file, so an
/// existing database loads as-is. Unknown top-level keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub doctors: Vec<User>,
    #[serde(default)]
    pub caregivers: Vec<User>,
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub clinician_notes: Vec<ClinicianNote>,
    /// Keyed by patient id; at most one link per patient
    #[serde(default)]
    pub share_links: BTreeMap<String, ShareLink>,
    /// Keyed by token
    #[serde(default, deserialize_with = "sessions_by_token")]
    pub sessions: BTreeMap<String, Session>,
}

/// Session as found on disk. Older files keep the token only as the map key.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default)]
    token: Option<String>,
    user: PublicUser,
    expires_at: i64,
}

fn sessions_by_token<'de, D>(deserializer: D) -> Result<BTreeMap<String, Session>, D::Error>
where
    D: Deserializer<'de>,
{
    let stored = BTreeMap::<String, StoredSession>::deserialize(deserializer)?;
    Ok(stored
        .into_iter()
        .map(|(key, session)| {
            let session = Session {
                token: session.token.unwrap_or_else(|| key.clone()),
                user: session.user,
                expires_at: session.expires_at,
            };
            (key, session)
        })
        .collect())
}

impl Snapshot {
    pub fn users(&self, role: Role) -> &[User] {
        match role {
            Role::Doctor => &self.doctors,
            Role::Caregiver => &self.caregivers,
        }
    }

    fn users_mut(&mut self, role: Role) -> &mut Vec<User> {
        match role {
            Role::Doctor => &mut self.doctors,
            Role::Caregiver => &mut self.caregivers,
        }
    }

    pub fn has_patient(&self, id: &str) -> bool {
        self.patients.iter().any(|p| p.id == id)
    }
}

/// A single durable change to the [`Snapshot`].
///
/// Applying the same sequence of mutations to an empty snapshot always
/// yields the same result, which is what the journal backend relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    InsertUser { user: User },
    PutSession { session: Session },
    RemoveSession { token: String },
    InsertPatient { patient: Patient },
    /// Removes the patient with its logs, notes and share link
    RemovePatient { id: String },
    AppendLog { log: LogEntry },
    AppendNote { note: ClinicianNote },
    PutShareLink { patient_id: String, link: ShareLink },
    RemoveShareLink { patient_id: String },
    /// Drops every session and share link that expired before `now`
    PruneExpired { now: i64 },
    /// Replaces the whole document
    Import { snapshot: Box<Snapshot> },
}

impl Mutation {
    pub fn apply(&self, db: &mut Snapshot) {
        match self {
            Mutation::InsertUser { user } => {
                db.users_mut(user.role).push(user.clone());
            }
            Mutation::PutSession { session } => {
                db.sessions.insert(session.token.clone(), session.clone());
            }
            Mutation::RemoveSession { token } => {
                db.sessions.remove(token);
            }
            Mutation::InsertPatient { patient } => {
                db.patients.push(patient.clone());
            }
            Mutation::RemovePatient { id } => {
                db.patients.retain(|p| &p.id != id);
                db.logs.retain(|l| &l.patient_id != id);
                db.clinician_notes.retain(|n| &n.patient_id != id);
                db.share_links.remove(id);
            }
            Mutation::AppendLog { log } => {
                db.logs.push(log.clone());
            }
            Mutation::AppendNote { note } => {
                db.clinician_notes.push(note.clone());
            }
            Mutation::PutShareLink { patient_id, link } => {
                db.share_links.insert(patient_id.clone(), link.clone());
            }
            Mutation::RemoveShareLink { patient_id } => {
                db.share_links.remove(patient_id);
            }
            Mutation::PruneExpired { now } => {
                db.sessions.retain(|_, s| !s.is_expired(*now));
                db.share_links.retain(|_, l| !l.is_expired(*now));
            }
            Mutation::Import { snapshot } => {
                *db = (**snapshot).clone();
            }
        }
    }

    /// Short name used in log lines
    pub fn op(&self) -> &'static str {
        match self {
            Mutation::InsertUser { .. } => "insert_user",
            Mutation::PutSession { .. } => "put_session",
            Mutation::RemoveSession { .. } => "remove_session",
            Mutation::InsertPatient { .. } => "insert_patient",
            Mutation::RemovePatient { .. } => "remove_patient",
            Mutation::AppendLog { .. } => "append_log",
            Mutation::AppendNote { .. } => "append_note",
            Mutation::PutShareLink { .. } => "put_share_link",
            Mutation::RemoveShareLink { .. } => "remove_share_link",
            Mutation::PruneExpired { .. } => "prune_expired",
            Mutation::Import { .. } => "import",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carecompass_core::PublicUser;

    fn session(token: &str, expires_at: i64) -> Session {
        Session {
            token: token.to_string(),
            user: PublicUser {
                id: "u1".to_string(),
                name: "Dana".to_string(),
                email: "dana@example.com".to_string(),
                role: Role::Caregiver,
            },
            expires_at,
        }
    }

    #[test]
    fn test_remove_patient_cascades() {
        let mut db = Snapshot::default();
        Mutation::InsertPatient {
            patient: Patient::new("alex"),
        }
        .apply(&mut db);
        Mutation::InsertPatient {
            patient: Patient::new("sarah"),
        }
        .apply(&mut db);
        Mutation::AppendLog {
            log: LogEntry::new("alex", 1),
        }
        .apply(&mut db);
        Mutation::AppendLog {
            log: LogEntry::new("sarah", 2),
        }
        .apply(&mut db);
        Mutation::AppendNote {
            note: ClinicianNote {
                patient_id: "alex".to_string(),
                note: "check sleep".to_string(),
                created_at: 3,
            },
        }
        .apply(&mut db);
        Mutation::PutShareLink {
            patient_id: "alex".to_string(),
            link: ShareLink {
                code: "ABC234".to_string(),
                url: "http://localhost:3000/share/ABC234".to_string(),
                expires_at: 10,
            },
        }
        .apply(&mut db);

        Mutation::RemovePatient {
            id: "alex".to_string(),
        }
        .apply(&mut db);

        assert_eq!(db.patients.len(), 1);
        assert_eq!(db.logs.len(), 1);
        assert_eq!(db.logs[0].patient_id, "sarah");
        assert!(db.clinician_notes.is_empty());
        assert!(db.share_links.is_empty());
    }

    #[test]
    fn test_prune_expired_keeps_live_entries() {
        let mut db = Snapshot::default();
        Mutation::PutSession {
            session: session("old", 100),
        }
        .apply(&mut db);
        Mutation::PutSession {
            session: session("edge", 200),
        }
        .apply(&mut db);
        Mutation::PutSession {
            session: session("new", 300),
        }
        .apply(&mut db);

        Mutation::PruneExpired { now: 200 }.apply(&mut db);

        // expiry is strict: expires_at == now is still live
        let tokens: Vec<&String> = db.sessions.keys().collect();
        assert_eq!(tokens, vec!["edge", "new"]);
    }

    #[test]
    fn test_mutation_json_is_tagged() {
        let m = Mutation::RemoveSession {
            token: "t1".to_string(),
        };
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, r#"{"op":"remove_session","token":"t1"}"#);
        assert_eq!(m.op(), "remove_session");
    }

    #[test]
    fn test_snapshot_reads_legacy_db_file() {
        let json = r#"{
            "users": [],
            "history": [],
            "doctors": [],
            "caregivers": [],
            "patients": [{"id": "alex", "name": "Alex Doe", "room": "4B"}],
            "logs": [{"patientId": "alex", "createdAt": 5, "mood": "calm"}],
            "clinicianNotes": [],
            "shareLinks": {}
        }"#;
        let db: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(db.patients[0].display_name(), "Alex Doe");
        assert_eq!(db.patients[0].extra["room"], "4B");
        assert_eq!(db.logs[0].mood.as_deref(), Some("calm"));
        assert!(db.sessions.is_empty());
    }

    #[test]
    fn test_legacy_sessions_take_token_from_key() {
        let json = r#"{
            "sessions": {
                "abc123": {
                    "user": {"id": "u1", "name": "Dana", "email": "d@x.io", "role": "caregiver"},
                    "expiresAt": 1
                },
                "def456": {
                    "token": "def456",
                    "user": {"id": "u2", "name": "Rey", "email": "r@x.io", "role": "doctor"},
                    "expiresAt": 2
                }
            }
        }"#;
        let db: Snapshot = serde_json::from_str(json).unwrap();
        assert_eq!(db.sessions["abc123"].token, "abc123");
        assert_eq!(db.sessions["abc123"].user.role, Role::Caregiver);
        assert_eq!(db.sessions["def456"].expires_at, 2);

        let reread: Snapshot = serde_json::from_str(&serde_json::to_string(&db).unwrap()).unwrap();
        assert_eq!(reread, db);
    }
}
