// API client module: a small blocking HTTP session for the QRadar REST API.
// Every request carries the same fixed headers (token, API version, JSON
// content type) and every response goes through one normalization step so
// operations only ever see a `serde_json::Value` or a `ConnectorError`.

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, trace, warn};

/// Query parameters, extra headers and body for a single request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RequestParts {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params(mut self, params: Vec<(String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Blocking session bound to one QRadar console.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// Prefix `https://` when the address carries no scheme and drop any
/// trailing slash.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("https://") || address.starts_with("http://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

/// Map a case-insensitive method name onto the four verbs the API accepts.
pub fn parse_method(name: &str) -> ConnectorResult<Method> {
    match name.trim().to_ascii_lowercase().as_str() {
        "get" => Ok(Method::GET),
        "post" => Ok(Method::POST),
        "patch" => Ok(Method::PATCH),
        "delete" => Ok(Method::DELETE),
        _ => Err(ConnectorError::UnsupportedMethod(name.to_string())),
    }
}

impl ApiClient {
    /// Build the session: fixed headers plus the TLS verification flag.
    pub fn new(config: &ConnectorConfig) -> ConnectorResult<Self> {
        debug!("Creating Session");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut sec = HeaderValue::from_str(&config.token).map_err(|_| {
            ConnectorError::Config("token contains characters not allowed in a header".into())
        })?;
        sec.set_sensitive(true);
        headers.insert(HeaderName::from_static("sec"), sec);

        let version = HeaderValue::from_str(&config.api_version).map_err(|_| {
            ConnectorError::Config(format!("invalid api_version `{}`", config.api_version))
        })?;
        headers.insert(HeaderName::from_static("version"), version);

        let client = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ConnectorError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(ApiClient {
            client,
            base_url: format!("{}/api", normalize_address(&config.address)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/{endpoint}` with any leading slash on the endpoint removed.
    pub fn url(&self, endpoint: &str) -> ConnectorResult<Url> {
        let raw = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| ConnectorError::invalid("endpoint", e.to_string()))
    }

    /// Base URL extended by percent-encoded path segments. Used where a
    /// segment holds user data such as a reference-set value.
    pub fn segment_url(&self, segments: &[&str]) -> ConnectorResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ConnectorError::Config(format!("invalid address: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ConnectorError::Config("address cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub fn get(&self, endpoint: &str, parts: RequestParts) -> ConnectorResult<Value> {
        self.request(Method::GET, endpoint, parts)
    }

    pub fn post(&self, endpoint: &str, parts: RequestParts) -> ConnectorResult<Value> {
        self.request(Method::POST, endpoint, parts)
    }

    pub fn request(
        &self,
        method: Method,
        endpoint: &str,
        parts: RequestParts,
    ) -> ConnectorResult<Value> {
        let url = self.url(endpoint)?;
        self.send(method, url, parts)
    }

    /// Send a request to an already-built URL and normalize the response.
    pub fn send(&self, method: Method, url: Url, parts: RequestParts) -> ConnectorResult<Value> {
        debug!("{} to URL: {}", method, url);
        let mut req = self.client.request(method, url.clone());
        if !parts.params.is_empty() {
            req = req.query(&parts.params);
        }
        if !parts.headers.is_empty() {
            req = req.headers(extra_headers(&parts.headers)?);
        }
        if let Some(body) = parts.body {
            req = req.body(body);
        }
        let res = req.send().map_err(|source| ConnectorError::Transport {
            url: url.to_string(),
            source,
        })?;
        parse_response(res)
    }
}

fn extra_headers(pairs: &[(String, String)]) -> ConnectorResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConnectorError::invalid("headers", format!("bad header name `{}`", name)))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ConnectorError::invalid("headers", format!("bad value for header `{}`", name))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn parse_response(res: Response) -> ConnectorResult<Value> {
    let status = res.status();
    let url = res.url().to_string();
    let text = res
        .text()
        .map_err(|source| ConnectorError::Transport { url, source })?;
    normalize_response(status, text)
}

/// Turn a status and body into the value handed back to operations:
/// non-2xx is an error, an empty body is `[]`, anything else is JSON when
/// it parses and a JSON string otherwise.
pub fn normalize_response(status: StatusCode, text: String) -> ConnectorResult<Value> {
    if !status.is_success() {
        return Err(ConnectorError::Http {
            status: status.as_u16(),
            body: text,
        });
    }
    debug!("Return Status Code: {}", status.as_u16());
    trace!("Return Text: {}", text);
    if text.trim().is_empty() {
        warn!("empty response body, returning empty list");
        return Ok(Value::Array(Vec::new()));
    }
    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(_) => {
            debug!("response body is not JSON, returning raw text");
            Ok(Value::String(text))
        }
    }
}
