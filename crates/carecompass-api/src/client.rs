//! HTTP client for the CareCompass server.

use crate::protocol::{
    ErrorBody, LoginRequest, LoginResponse, LogoutRequest, MeResponse, MessageResponse,
    NoteRequest, OkResponse, PingResponse, RegisterRequest, RegisterResponse, StatusResponse,
    SummaryQuery, SummaryResponse,
};
use crate::ClientError;
use carecompass_core::{ClinicianNote, LogEntry, Patient, PublicUser, ShareLink};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Server URL used when none is configured
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";

/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the reachability probe
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Async client for the CareCompass HTTP API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for `base_url` with the default timeout
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    /// Attach a session token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ClientError> {
        let url = self.url(segments)?;
        debug!(%method, %url, "API request");
        let builder = self.http.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        Self::send(self.request(Method::GET, segments)?).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ClientError> {
        Self::send(self.request(Method::POST, segments)?.json(body)).await
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    pub async fn ping(&self) -> Result<PingResponse, ClientError> {
        self.get(&["api", "ping"]).await
    }

    /// Probe `/api/ping` with a short timeout
    pub async fn is_available(&self) -> bool {
        let builder = match self.request(Method::GET, &["api", "ping"]) {
            Ok(builder) => builder.timeout(PING_TIMEOUT),
            Err(_) => return false,
        };
        match Self::send::<PingResponse>(builder).await {
            Ok(ping) => ping.ok,
            Err(e) => {
                debug!(error = %e, "Server not available");
                false
            }
        }
    }

    pub async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get(&["api", "status"]).await
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.post(&["api", "register"], request).await
    }

    /// Log in. The returned token is not attached to this client.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError> {
        self.post(&["api", "login"], request).await
    }

    pub async fn logout(&self) -> Result<MessageResponse, ClientError> {
        let body = LogoutRequest {
            token: self.token.clone(),
        };
        self.post(&["api", "logout"], &body).await
    }

    pub async fn me(&self) -> Result<PublicUser, ClientError> {
        let me: MeResponse = self.get(&["api", "me"]).await?;
        Ok(me.user)
    }

    // ------------------------------------------------------------------
    // Patients
    // ------------------------------------------------------------------

    pub async fn patients(&self) -> Result<Vec<Patient>, ClientError> {
        self.get(&["api", "patients"]).await
    }

    pub async fn create_patient(&self, patient: &Patient) -> Result<Patient, ClientError> {
        self.post(&["api", "patients"], patient).await
    }

    pub async fn delete_patient(&self, id: &str) -> Result<OkResponse, ClientError> {
        Self::send(self.request(Method::DELETE, &["api", "patients", id])?).await
    }

    // ------------------------------------------------------------------
    // Logs and notes
    // ------------------------------------------------------------------

    pub async fn logs(&self, patient_id: &str) -> Result<Vec<LogEntry>, ClientError> {
        self.get(&["api", "logs", patient_id]).await
    }

    /// Post any log document; the server fills `patientId` and `createdAt`
    pub async fn add_log<B: Serialize + ?Sized>(
        &self,
        patient_id: &str,
        log: &B,
    ) -> Result<LogEntry, ClientError> {
        self.post(&["api", "logs", patient_id], log).await
    }

    pub async fn notes(&self, patient_id: &str) -> Result<Vec<ClinicianNote>, ClientError> {
        self.get(&["api", "notes", patient_id]).await
    }

    pub async fn add_note(&self, patient_id: &str, note: &str) -> Result<ClinicianNote, ClientError> {
        let body = NoteRequest {
            note: note.to_string(),
        };
        self.post(&["api", "notes", patient_id], &body).await
    }

    // ------------------------------------------------------------------
    // Share links and summaries
    // ------------------------------------------------------------------

    pub async fn create_share_link(&self, patient_id: &str) -> Result<ShareLink, ClientError> {
        self.post(&["api", "share", patient_id], &serde_json::json!({}))
            .await
    }

    /// The patient's live share link, `None` when missing or expired
    pub async fn share_link(&self, patient_id: &str) -> Result<Option<ShareLink>, ClientError> {
        match self.get(&["api", "share", patient_id]).await {
            Ok(link) => Ok(Some(link)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn summary(
        &self,
        patient_id: &str,
        tz_offset_minutes: Option<i32>,
    ) -> Result<SummaryResponse, ClientError> {
        let query = SummaryQuery { tz_offset_minutes };
        Self::send(
            self.request(Method::GET, &["api", "summary", patient_id])?
                .query(&query),
        )
        .await
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_connect() || e.is_timeout() {
        ClientError::Unavailable(e.to_string())
    } else {
        ClientError::Http(e)
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });

    Err(match status {
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        _ => ClientError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_segments() {
        let client = ApiClient::new("http://localhost:3000/").unwrap();
        let url = client.url(&["api", "logs", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/logs/a%20b%2Fc");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = ApiClient::new("https://care.example/app").unwrap();
        let url = client.url(&["api", "ping"]).unwrap();
        assert_eq!(url.as_str(), "https://care.example/app/api/ping");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            ApiClient::new("mailto:someone@example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_token_handling() {
        let mut client = ApiClient::new(DEFAULT_SERVER_URL).unwrap().with_token("t1");
        assert_eq!(client.token(), Some("t1"));
        client.set_token(None);
        assert_eq!(client.token(), None);
    }
}
