// Incident platform bridge: log in with the stored credentials and fire the
// QRadar trigger with an offense id.

use crate::api::normalize_address;
use crate::config::PlatformConfig;
use crate::error::{ConnectorError, ConnectorResult};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const AUTH_PATH: &str = "/auth/authenticate";
const TRIGGER_PATH: &str = "/api/triggers/1/qradar";

#[derive(Serialize, Debug)]
struct Credentials<'a> {
    loginid: &'a str,
    password: &'a str,
    token: &'a str,
}

#[derive(Serialize, Debug)]
struct AuthRequest<'a> {
    credentials: Credentials<'a>,
}

#[derive(Deserialize, Debug)]
struct AuthResponse {
    token: String,
}

#[derive(Serialize, Debug)]
struct TriggerPayload {
    #[serde(rename = "Offense_ID")]
    offense_id: String,
}

/// Client for the incident platform's authenticate and trigger endpoints.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl PlatformClient {
    /// Fails when url, username or password is missing.
    pub fn new(config: &PlatformConfig) -> ConnectorResult<Self> {
        if !config.is_complete() {
            return Err(ConnectorError::Config(
                "Configure the incident platform server details before forwarding the offense data."
                    .into(),
            ));
        }
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ConnectorError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(PlatformClient {
            client,
            base_url: normalize_address(&config.cyops_url),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn trigger_url(&self) -> String {
        format!("{}{}", self.base_url, TRIGGER_PATH)
    }

    /// Exchange the stored credentials for a bearer token.
    pub fn authenticate(&self) -> ConnectorResult<String> {
        let url = format!("{}{}", self.base_url, AUTH_PATH);
        debug!("fetching token from endpoint: {}", url);
        let body = AuthRequest {
            credentials: Credentials {
                loginid: &self.username,
                password: &self.password,
                token: "",
            },
        };
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|source| ConnectorError::Transport {
                url: url.clone(),
                source,
            })?;
        let res = ensure_success(res)?;
        let auth: AuthResponse = res.json().map_err(|e| {
            ConnectorError::InvalidResponse(format!("authenticate returned no token: {}", e))
        })?;
        Ok(auth.token)
    }

    /// Authenticate, then post the offense id to the QRadar trigger.
    pub fn send_offense_id(&self, offense_id: &str) -> ConnectorResult<String> {
        info!("Send offense ID {}", offense_id);
        let uri = self.trigger_url();
        let token = self.authenticate()?;
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ConnectorError::InvalidResponse("token is not a valid header value".into())
        })?;
        bearer.set_sensitive(true);

        let payload = TriggerPayload {
            offense_id: offense_id.to_string(),
        };
        let res = self
            .client
            .post(&uri)
            .header(AUTHORIZATION, bearer)
            .json(&payload)
            .send()
            .map_err(|source| ConnectorError::Transport {
                url: uri.clone(),
                source,
            })?;
        ensure_success(res)?;
        Ok(format!("Offense details sent to {}", uri))
    }
}

fn ensure_success(res: Response) -> ConnectorResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().unwrap_or_default();
    Err(ConnectorError::Http {
        status: status.as_u16(),
        body,
    })
}
