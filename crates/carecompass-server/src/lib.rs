//! CareCompass Server
//!
//! HTTP API for caregivers and doctors: accounts and sessions, patients,
//! behaviour logs, clinician notes, share links and weekly summaries.

mod auth;
mod error;
mod routes;
mod server;
mod signals;
mod state;

pub use auth::AuthUser;
pub use error::ApiError;
pub use routes::router;
pub use server::Server;
pub use state::AppState;
