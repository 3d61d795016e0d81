//! CareCompass API
//!
//! Request and response bodies shared by the server and its clients, and an
//! async HTTP client for the server's routes.

mod client;
mod error;
mod protocol;

pub use client::{ApiClient, DEFAULT_SERVER_URL};
pub use error::ClientError;
pub use protocol::*;
