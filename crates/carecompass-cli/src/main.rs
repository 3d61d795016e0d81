//! CareCompass CLI
//!
//! Command-line client for CareCompass. Works from a local state file and
//! syncs with a CareCompass server when one is reachable.

mod display;
mod local;
mod sync;

use anyhow::{Context, Result};
use carecompass_api::{ApiClient, DEFAULT_SERVER_URL};
use carecompass_core::{
    now_millis, status_from_logs, weekly_summary, BackendKind, Patient, PatientStatus, Role,
    ServerConfig, ShareLink, WeeklySummary,
};
use carecompass_store::{backend_for, Store, StoreStats};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use display::{bar, format_date_time, format_duration, format_time_ago, minutes_until};
use local::LocalStore;
use sync::{DataLayer, SyncOutcome};

#[derive(Parser)]
#[command(name = "carecompass")]
#[command(about = "CareCompass - patient-care tracking for caregivers and clinicians")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(long, global = true, env = "CARECOMPASS_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Local state file (default: ~/.carecompass/local.json)
    #[arg(long, global = true, env = "CARECOMPASS_STATE")]
    state_file: Option<PathBuf>,

    /// Never contact the server
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check if the server is reachable
    Ping,

    /// Show server status
    Status,

    /// Create an account
    Register {
        name: String,
        email: String,
        /// doctor or caregiver
        #[arg(long, default_value = "caregiver")]
        role: Role,
        #[arg(long, env = "CARECOMPASS_PASSWORD")]
        password: String,
    },

    /// Log in and remember the session
    Login {
        email: String,
        /// doctor or caregiver
        #[arg(long, default_value = "caregiver")]
        role: Role,
        #[arg(long, env = "CARECOMPASS_PASSWORD")]
        password: String,
    },

    /// Forget the session
    Logout,

    /// Show the logged in user
    Whoami,

    /// Pull patients, logs and notes from the server
    Sync,

    /// Manage patients
    #[command(subcommand)]
    Patients(PatientCommands),

    /// Behavior and health logs
    #[command(subcommand)]
    Logs(LogCommands),

    /// Clinician notes
    #[command(subcommand)]
    Notes(NoteCommands),

    /// Temporary share links
    #[command(subcommand)]
    Share(ShareCommands),

    /// Weekly summary for a patient
    Summary {
        /// Patient id (default: selected patient)
        patient: Option<String>,

        /// Ask the server instead of summarizing local logs
        #[arg(long)]
        remote: bool,
    },

    /// Maintain a server data directory
    #[command(subcommand)]
    Store(StoreCommands),
}

#[derive(Subcommand)]
enum PatientCommands {
    /// List patients
    List,

    /// Add a patient
    Add {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        diagnosis: Option<String>,
    },

    /// Remove a patient with their logs, notes and share link
    Remove { id: String },

    /// Make a patient the default for other commands
    Select { id: String },
}

#[derive(Subcommand)]
enum LogCommands {
    /// Record a log entry
    Add {
        /// Patient id (default: selected patient)
        #[arg(long)]
        patient: Option<String>,
        #[command(flatten)]
        fields: LogFields,
    },

    /// List log entries, newest first
    List {
        #[arg(long)]
        patient: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
struct LogFields {
    #[arg(long)]
    mood: Option<String>,
    #[arg(long)]
    antecedent: Option<String>,
    #[arg(long)]
    behavior: Option<String>,
    #[arg(long)]
    consequence: Option<String>,
    #[arg(long)]
    note: Option<String>,
    /// Bedtime as HH:MM
    #[arg(long)]
    sleep_start: Option<String>,
    /// Wake time as HH:MM
    #[arg(long)]
    sleep_end: Option<String>,
    /// e.g. drank
    #[arg(long)]
    hydration: Option<String>,
    /// full, partial or none
    #[arg(long)]
    food: Option<String>,
    /// e.g. given
    #[arg(long)]
    meds: Option<String>,
}

impl LogFields {
    fn into_payload(self) -> Map<String, Value> {
        let fields = [
            ("mood", self.mood),
            ("antecedent", self.antecedent),
            ("behavior", self.behavior),
            ("consequence", self.consequence),
            ("note", self.note),
            ("sleepStart", self.sleep_start),
            ("sleepEnd", self.sleep_end),
            ("hydration", self.hydration),
            ("food", self.food),
            ("meds", self.meds),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), Value::String(v))))
            .collect()
    }
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Add a clinician note
    Add {
        note: String,
        #[arg(long)]
        patient: Option<String>,
    },

    /// List notes, newest first
    List {
        #[arg(long)]
        patient: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShareCommands {
    /// Create a share link
    Create {
        #[arg(long)]
        patient: Option<String>,
    },

    /// Show the live share link
    Show {
        #[arg(long)]
        patient: Option<String>,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Copy all data from one backend to another
    Migrate {
        #[arg(long)]
        from: BackendKind,
        #[arg(long)]
        to: BackendKind,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Load the data and print record counts
    Verify {
        #[arg(long)]
        backend: Option<BackendKind>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Add patients that logs or notes refer to but that do not exist
    Repair {
        #[arg(long)]
        backend: Option<BackendKind>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Simple logging for CLI
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt().with_target(false).init();
    }

    let cli = Cli::parse();

    let client = if cli.offline {
        None
    } else {
        Some(ApiClient::new(&cli.server).context("Invalid server URL")?)
    };
    let path = cli.state_file.unwrap_or_else(LocalStore::default_path);
    let mut data = DataLayer::open(LocalStore::new(path), client);

    match cli.command {
        Commands::Ping => cmd_ping(&data).await,
        Commands::Status => cmd_status(&data).await,
        Commands::Register {
            name,
            email,
            role,
            password,
        } => cmd_register(&data, &name, &email, role, &password).await,
        Commands::Login {
            email,
            role,
            password,
        } => cmd_login(&mut data, &email, role, &password).await,
        Commands::Logout => cmd_logout(&mut data).await,
        Commands::Whoami => cmd_whoami(&mut data).await,
        Commands::Sync => cmd_sync(&mut data).await,
        Commands::Patients(command) => cmd_patients(&mut data, command).await,
        Commands::Logs(command) => cmd_logs(&mut data, command).await,
        Commands::Notes(command) => cmd_notes(&mut data, command).await,
        Commands::Share(command) => cmd_share(&mut data, command).await,
        Commands::Summary { patient, remote } => cmd_summary(&data, patient, remote).await,
        Commands::Store(command) => cmd_store(command).await,
    }
}

fn require_client(data: &DataLayer) -> Result<&ApiClient> {
    data.client()
        .context("Server access is disabled (--offline)")
}

/// Resolve an optional patient argument against the state file
fn patient_id(data: &DataLayer, patient: Option<String>) -> Result<String> {
    let id = patient.unwrap_or_else(|| data.state().selected_patient.clone());
    if data.state().patient(&id).is_none() {
        anyhow::bail!("Unknown patient: {}", id);
    }
    Ok(id)
}

async fn cmd_ping(data: &DataLayer) -> Result<()> {
    let client = require_client(data)?;
    let start = Instant::now();
    match client.ping().await {
        Ok(_) => {
            let elapsed = start.elapsed();
            println!("✓ Pong! ({:.2}ms)", elapsed.as_secs_f64() * 1000.0);
        }
        Err(e) => {
            println!("✗ Server not reachable at {}: {}", client.base_url(), e);
        }
    }
    Ok(())
}

async fn cmd_status(data: &DataLayer) -> Result<()> {
    let client = require_client(data)?;
    match client.status().await {
        Ok(status) => {
            println!("CareCompass Server Status");
            println!("─────────────────────────");
            println!("Server:   {}", client.base_url());
            println!("Version:  {}", status.version);
            println!("Backend:  {}", status.backend);
            println!("Uptime:   {}", format_duration(status.uptime_secs));
            println!("Requests: {}", status.requests);
            println!("Latency:  {:.2}ms avg", status.avg_latency_ms);
            println!("State:    {}", data.local().path().display());
            if !status.collections.is_empty() {
                println!();
                for (name, count) in &status.collections {
                    println!("  {:<16} {}", name, count);
                }
            }
        }
        Err(e) if e.is_unavailable() => {
            println!("✗ Server not reachable at {}", client.base_url());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_register(
    data: &DataLayer,
    name: &str,
    email: &str,
    role: Role,
    password: &str,
) -> Result<()> {
    let user = data.register(name, email, password, role).await?;
    println!("✓ Registered {} <{}> as {}", user.name, user.email, user.role);
    println!("  Log in with: carecompass login {} --role {}", user.email, user.role);
    Ok(())
}

async fn cmd_login(data: &mut DataLayer, email: &str, role: Role, password: &str) -> Result<()> {
    let user = data.login(email, password, role).await?;
    println!("✓ Logged in as {} ({})", user.name, user.role);

    match data.sync().await {
        Ok(outcome) => print_sync_outcome(&outcome),
        Err(e) => println!("✗ Sync failed: {:#}", e),
    }
    Ok(())
}

async fn cmd_logout(data: &mut DataLayer) -> Result<()> {
    if data.logout().await? {
        println!("✓ Logged out");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

async fn cmd_whoami(data: &mut DataLayer) -> Result<()> {
    let client = require_client(data)?;
    if client.token().is_none() {
        println!("Not logged in.");
        return Ok(());
    }

    match client.me().await {
        Ok(user) => {
            println!("{} <{}>", user.name, user.email);
            println!("Role: {}", user.role);
        }
        Err(e) if e.is_unauthorized() => {
            println!("✗ Session expired. Log in again.");
            data.logout().await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn cmd_sync(data: &mut DataLayer) -> Result<()> {
    let outcome = data.sync().await?;
    print_sync_outcome(&outcome);
    Ok(())
}

fn print_sync_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Offline => println!("✗ Server not reachable, using local data"),
        SyncOutcome::SignedOut => println!("Not logged in, using local data"),
        SyncOutcome::Unauthorized => println!("✗ Session expired. Log in again."),
        SyncOutcome::NoServerData => println!("Server has no patients yet, keeping local data"),
        SyncOutcome::Synced {
            patients,
            logs,
            notes,
            share_links,
        } => println!(
            "✓ Synced {} patients, {} logs, {} notes, {} share links",
            patients, logs, notes, share_links
        ),
    }
}

async fn cmd_patients(data: &mut DataLayer, command: PatientCommands) -> Result<()> {
    match command {
        PatientCommands::List => {
            let state = data.state();
            for patient in &state.patients {
                let marker = if patient.id == state.selected_patient { "*" } else { " " };
                let status = patient.status.unwrap_or_default();
                println!(
                    "{} {:<10} {:<20} {:<20} {}",
                    marker,
                    patient.id,
                    patient.display_name(),
                    patient.diagnosis.as_deref().unwrap_or("-"),
                    status_label(status)
                );
            }
        }
        PatientCommands::Add {
            id,
            name,
            diagnosis,
        } => {
            let mut patient = Patient::new(id.clone()).with_status(PatientStatus::Stable);
            patient.name = name;
            patient.diagnosis = diagnosis;
            data.add_patient(patient).await?;
            println!("✓ Added patient {}", id);
        }
        PatientCommands::Remove { id } => {
            if data.state().patient(&id).is_none() {
                anyhow::bail!("Unknown patient: {}", id);
            }
            data.remove_patient(&id).await?;
            println!("✓ Removed patient {}", id);
        }
        PatientCommands::Select { id } => {
            data.select_patient(&id)?;
            println!("✓ Selected patient {}", id);
        }
    }
    Ok(())
}

fn status_label(status: PatientStatus) -> &'static str {
    match status {
        PatientStatus::Risk => "⚠ risk",
        PatientStatus::Stable => "stable",
    }
}

async fn cmd_logs(data: &mut DataLayer, command: LogCommands) -> Result<()> {
    match command {
        LogCommands::Add { patient, fields } => {
            let id = patient_id(data, patient)?;
            let entry = data.add_log(&id, fields.into_payload()).await?;
            println!("✓ Logged for {} at {}", id, format_date_time(entry.created_at));
        }
        LogCommands::List { patient, limit } => {
            let id = patient_id(data, patient)?;
            let logs = data.state().logs(&id);
            if logs.is_empty() {
                println!("No logs for {}.", id);
                return Ok(());
            }

            let now = now_millis();
            for log in logs.iter().take(limit) {
                let mut parts = Vec::new();
                let labeled = [
                    ("mood", &log.mood),
                    ("antecedent", &log.antecedent),
                    ("behavior", &log.behavior),
                    ("consequence", &log.consequence),
                    ("sleep", &log.sleep_start),
                    ("until", &log.sleep_end),
                    ("water", &log.hydration),
                    ("food", &log.food),
                    ("meds", &log.meds),
                    ("note", &log.note),
                ];
                for (label, value) in labeled {
                    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                        parts.push(format!("{}: {}", label, value));
                    }
                }
                println!("{:>10}  {}", format_time_ago(log.created_at, now), parts.join(", "));
            }
            if logs.len() > limit {
                println!("... and {} more", logs.len() - limit);
            }
        }
    }
    Ok(())
}

async fn cmd_notes(data: &mut DataLayer, command: NoteCommands) -> Result<()> {
    match command {
        NoteCommands::Add { note, patient } => {
            let id = patient_id(data, patient)?;
            data.add_note(&id, &note).await?;
            println!("✓ Note added for {}", id);
        }
        NoteCommands::List { patient } => {
            let id = patient_id(data, patient)?;
            let notes = data.state().notes(&id);
            if notes.is_empty() {
                println!("No notes for {}.", id);
            }
            for note in notes {
                println!("[{}] {}", format_date_time(note.created_at), note.note);
            }
        }
    }
    Ok(())
}

async fn cmd_share(data: &mut DataLayer, command: ShareCommands) -> Result<()> {
    let now = now_millis();
    match command {
        ShareCommands::Create { patient } => {
            let id = patient_id(data, patient)?;
            let link = data.create_share_link(&id).await?;
            println!("✓ Share link for {}", id);
            print_share_link(&link, now);
        }
        ShareCommands::Show { patient } => {
            let id = patient_id(data, patient)?;
            match data.share_link(&id)? {
                Some(link) => print_share_link(&link, now),
                None => println!("No active share link for {}.", id),
            }
        }
    }
    Ok(())
}

fn print_share_link(link: &ShareLink, now: i64) {
    println!("  Code:    {}", link.code);
    println!("  URL:     {}", link.url);
    println!("  Expires: in {} min", minutes_until(link.expires_at, now));
}

async fn cmd_summary(data: &DataLayer, patient: Option<String>, remote: bool) -> Result<()> {
    let id = patient_id(data, patient)?;

    let (status, summary) = if remote {
        let client = require_client(data)?;
        let offset = chrono::Local::now().offset().local_minus_utc() / 60;
        let response = client.summary(&id, Some(offset)).await?;
        (
            response.status,
            WeeklySummary {
                days: response.days,
            },
        )
    } else {
        let logs = data.state().logs(&id);
        (
            status_from_logs(&logs),
            weekly_summary(&logs, &chrono::Local::now()),
        )
    };

    let name = data
        .state()
        .patient(&id)
        .map(Patient::display_name)
        .unwrap_or_else(|| id.clone());
    println!("{} - {}", name, status_label(status));
    println!();
    println!(
        "{:<8} {:>6}  {:>9} {:>6} {:>6} {:>5}",
        "Day", "Sleep", "Incidents", "Water", "Meals", "Meds"
    );
    for day in &summary.days {
        let sleep = day
            .sleep_hours
            .map(|h| format!("{:.1}h", h))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:>6}  {:>9} {:>6} {:>6} {:>5}  {}",
            day.label,
            sleep,
            day.incidents,
            day.hydration,
            day.meals,
            day.meds,
            bar(day.sleep_hours.unwrap_or(0.0), 1.0)
        );
    }
    Ok(())
}

async fn cmd_store(command: StoreCommands) -> Result<()> {
    match command {
        StoreCommands::Migrate { from, to, data_dir } => {
            if from == to {
                anyhow::bail!("Source and target backends are the same");
            }
            let source = open_store(Some(from), data_dir.clone()).await?;
            let target = open_store(Some(to), data_dir).await?;

            let start = Instant::now();
            let stats = target.import(source.snapshot()).await?;
            println!(
                "✓ Migrated {} -> {} in {}",
                source.backend_name(),
                target.backend_name(),
                format_elapsed(start.elapsed())
            );
            print_store_stats(&stats);
        }
        StoreCommands::Verify { backend, data_dir } => {
            let store = open_store(backend, data_dir).await?;
            println!("✓ {} store loaded", store.backend_name());
            print_store_stats(&store.stats());
        }
        StoreCommands::Repair { backend, data_dir } => {
            let store = open_store(backend, data_dir).await?;
            let added = store.repair_missing_patients().await?;
            if added.is_empty() {
                println!("✓ Nothing to repair");
            } else {
                println!("✓ Added {} missing patients: {}", added.len(), added.join(", "));
            }
        }
    }
    Ok(())
}

/// Open a server store from the server configuration with overrides
async fn open_store(backend: Option<BackendKind>, data_dir: Option<PathBuf>) -> Result<Store> {
    let mut config = ServerConfig::load();
    if let Some(backend) = backend {
        config.backend = backend;
    }
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    config
        .ensure_dirs()
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let store = Store::open(backend_for(&config))
        .await
        .with_context(|| {
            format!(
                "Failed to open {:?} store in {}",
                config.backend,
                config.data_dir.display()
            )
        })?;
    Ok(store)
}

fn print_store_stats(stats: &StoreStats) {
    println!("  Doctors:         {}", stats.doctors);
    println!("  Caregivers:      {}", stats.caregivers);
    println!("  Patients:        {}", stats.patients);
    println!("  Logs:            {}", stats.logs);
    println!("  Clinician notes: {}", stats.clinician_notes);
    println!("  Share links:     {}", stats.share_links);
    println!("  Sessions:        {}", stats.sessions);
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() == 0 {
        format!("{}ms", elapsed.as_millis())
    } else {
        format_duration(elapsed.as_secs())
    }
}
