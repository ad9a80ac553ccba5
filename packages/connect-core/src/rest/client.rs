//! REST client for the vendor streaming API: login, session management,
//! track metadata, and signed streaming URLs (§4.3, §6.2).

use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use thiserror::Error;

use super::signing::sign;
use super::types::{FileUrlResponse, LoginResponse, RawTrackGet, SessionStartResponse, TrackMetadata};
use crate::tokens::now_secs;

const DEFAULT_BASE_URL: &str = "https://www.vendor.example/api.json/0.2";
const REFERER: &str = "https://play.vendor.example/";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_PROFILE: &str = "qbz-1";
const SESSION_EXPIRY_BUFFER_SECS: i64 = 60;

/// Errors a signed REST call can fail with.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not authenticated")]
    Unauthorized,
    #[error("resource not found")]
    NotFound,
    #[error("failed to decode response body")]
    Decode(String),
}

#[derive(Debug, Default)]
struct AuthState {
    app_id: String,
    app_secret: String,
    user_auth_token: Option<String>,
    session_id: Option<String>,
    session_expires_at: i64,
}

/// Signs and issues calls against the vendor REST API.
pub struct RestClient {
    http: Client,
    base_url: String,
    auth: RwLock<AuthState>,
}

impl RestClient {
    #[must_use]
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self::with_base_url(app_id, app_secret, DEFAULT_BASE_URL.to_string())
    }

    #[must_use]
    pub fn with_base_url(app_id: String, app_secret: String, base_url: String) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");

        Self {
            http,
            base_url,
            auth: RwLock::new(AuthState {
                app_id,
                app_secret,
                ..Default::default()
            }),
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let auth = self.auth.read();
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Referer", REFERER.parse().unwrap());
        headers.insert("Origin", "https://play.vendor.example".parse().unwrap());
        headers.insert("User-Agent", USER_AGENT.parse().unwrap());
        headers.insert("X-App-Id", auth.app_id.parse().unwrap());
        if let Some(token) = &auth.user_auth_token {
            if let Ok(value) = token.parse() {
                headers.insert("X-User-Auth-Token", value);
            }
        }
        if let Some(session_id) = &auth.session_id {
            if let Ok(value) = session_id.parse() {
                headers.insert("X-Session-Id", value);
            }
        }
        headers
    }

    /// `user/login(email, password)`, POST with `extra=partner`.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), RestError> {
        let app_id = self.auth.read().app_id.clone();
        let signed_params = [
            ("app_id", app_id.as_str()),
            ("email", email),
            ("password", password),
        ];
        let mut sorted = signed_params.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        let (ts, sig) = sign("user", "login", &sorted, &self.auth.read().app_secret);

        let url = format!("{}/user/login", self.base_url);
        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .query(&[
                ("email", email),
                ("password", password),
                ("app_id", app_id.as_str()),
                ("request_ts", ts.as_str()),
                ("request_sig", sig.as_str()),
            ])
            .body("extra=partner")
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RestError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(RestError::Unauthorized);
        }

        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))?;
        self.auth.write().user_auth_token = Some(parsed.user_auth_token);
        Ok(())
    }

    /// Starts (or reuses) a session; valid iff `expires_at - 60s > now`.
    pub async fn start_session(&self) -> Result<(), RestError> {
        {
            let auth = self.auth.read();
            if auth.session_id.is_some() && auth.session_expires_at - SESSION_EXPIRY_BUFFER_SECS > now_secs() {
                return Ok(());
            }
        }

        let signed_params = [("profile", SESSION_PROFILE)];
        let (ts, sig) = sign("session", "start", &signed_params, &self.auth.read().app_secret);

        let url = format!("{}/session/start", self.base_url);
        let body = format!("profile={SESSION_PROFILE}&request_ts={ts}&request_sig={sig}");

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RestError::Unauthorized);
        }

        let parsed: SessionStartResponse = response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))?;

        let mut auth = self.auth.write();
        auth.session_id = Some(parsed.session_id);
        auth.session_expires_at = parsed.expires_at;
        Ok(())
    }

    /// `track/get(track_id)`, normalized per §4.3.
    pub async fn track_get(&self, track_id: &str) -> Result<TrackMetadata, RestError> {
        self.start_session().await?;

        let app_id = self.auth.read().app_id.clone();
        let mut signed_params = vec![("app_id", app_id.as_str()), ("track_id", track_id)];
        signed_params.sort_by_key(|(k, _)| *k);
        let (ts, sig) = sign("track", "get", &signed_params, &self.auth.read().app_secret);

        let url = format!("{}/track/get", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers())
            .query(&[
                ("track_id", track_id),
                ("app_id", app_id.as_str()),
                ("request_ts", ts.as_str()),
                ("request_sig", sig.as_str()),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RestError::NotFound);
        }
        if !response.status().is_success() {
            return Err(RestError::Unauthorized);
        }

        let raw: RawTrackGet = response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))?;
        Ok(raw.into())
    }

    /// `track/getFileUrl(track_id, format_id, intent=stream)`.
    pub async fn track_get_file_url(&self, track_id: &str, format_id: i32) -> Result<(String, i32), RestError> {
        self.start_session().await?;

        let format_str = format_id.to_string();
        let mut signed_params = vec![
            ("format_id", format_str.as_str()),
            ("intent", "stream"),
            ("track_id", track_id),
        ];
        signed_params.sort_by_key(|(k, _)| *k);
        let (ts, sig) = sign("track", "getFileUrl", &signed_params, &self.auth.read().app_secret);

        let url = format!("{}/track/getFileUrl", self.base_url);
        let response = self
            .http
            .get(&url)
            .headers(self.headers())
            .query(&[
                ("format_id", format_str.as_str()),
                ("intent", "stream"),
                ("track_id", track_id),
                ("request_ts", ts.as_str()),
                ("request_sig", sig.as_str()),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RestError::NotFound);
        }
        if !response.status().is_success() {
            return Err(RestError::Unauthorized);
        }

        let parsed: FileUrlResponse = response
            .json()
            .await
            .map_err(|e| RestError::Decode(e.to_string()))?;
        Ok((parsed.url, parsed.format_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_app_id_and_optional_tokens() {
        let client = RestClient::new("app-id".into(), "secret".into());
        let headers = client.headers();
        assert_eq!(headers.get("X-App-Id").unwrap(), "app-id");
        assert!(headers.get("X-User-Auth-Token").is_none());
        assert!(headers.get("X-Session-Id").is_none());

        client.auth.write().user_auth_token = Some("token".into());
        client.auth.write().session_id = Some("session".into());
        let headers = client.headers();
        assert_eq!(headers.get("X-User-Auth-Token").unwrap(), "token");
        assert_eq!(headers.get("X-Session-Id").unwrap(), "session");
    }
}
