// Operation registry: each named action turns a parameter object into one
// or more QRadar REST calls and hands back the JSON response.

use crate::api::{parse_method, ApiClient, RequestParts};
use crate::ariel::{self, PollPolicy, SearchStatus};
use crate::batch;
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, ConnectorResult};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Parameters passed to an operation.
pub type Params = Map<String, Value>;

/// Callback invoked on every Ariel status poll.
pub type PollObserver = Arc<dyn Fn(&SearchStatus, Duration) + Send + Sync>;

/// Handler signature shared by every registered operation.
pub type Handler = fn(&Session, &Params) -> ConnectorResult<Value>;

const AQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_MAX_RESULTS: u64 = 100;
const MIN_SEARCH_LEN: usize = 3;
const APP_MARKER: &str = "cybersponse";

/// Name to handler table.
pub const OPERATIONS: &[(&str, Handler)] = &[
    ("get_offenses", get_offenses),
    ("query_qradar", query_qradar),
    ("get_events_related_to_offense", get_events_related_to_offense),
    ("get_closing_reasons", get_closing_reasons),
    ("close_offense", close_offense),
    ("get_source_ip", get_source_ip),
    ("get_destination_ip", get_destination_ip),
    ("invoke_api", invoke_api),
    ("get_offense_type", get_offense_type),
    ("handle_reference_set_value", handle_reference_set_value),
    ("add_notes", add_notes),
    ("get_notes", get_notes),
    ("validate_app_installed", validate_app_installed),
];

pub fn lookup(name: &str) -> Option<Handler> {
    OPERATIONS
        .iter()
        .find(|(op, _)| *op == name)
        .map(|(_, handler)| *handler)
}

pub fn operation_names() -> impl Iterator<Item = &'static str> {
    OPERATIONS.iter().map(|(name, _)| *name)
}

/// State for one operation invocation: a fresh HTTP session plus the
/// search polling settings.
pub struct Session {
    pub api: ApiClient,
    poll: PollPolicy,
    observer: Option<PollObserver>,
}

impl Session {
    fn search(&self, query: &str) -> ConnectorResult<Value> {
        let observer = self.observer.clone();
        ariel::search_with_progress(&self.api, query, self.poll, move |status, waited| {
            if let Some(observer) = &observer {
                observer(status, waited);
            }
        })
    }
}

/// Entry point for running operations against one QRadar console.
#[derive(Clone)]
pub struct Connector {
    config: ConnectorConfig,
    poll: PollPolicy,
    observer: Option<PollObserver>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        Connector {
            config,
            poll: PollPolicy::default(),
            observer: None,
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Register a callback fired on every search status poll.
    pub fn on_search_poll<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SearchStatus, Duration) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn session(&self) -> ConnectorResult<Session> {
        Ok(Session {
            api: ApiClient::new(&self.config)?,
            poll: self.poll,
            observer: self.observer.clone(),
        })
    }

    /// Run the named operation.
    pub fn execute(&self, operation: &str, params: &Params) -> ConnectorResult<Value> {
        let handler =
            lookup(operation).ok_or_else(|| ConnectorError::UnknownOperation(operation.into()))?;
        info!(operation, "executing operation");
        handler(&self.session()?, params)
    }

    /// Confirm the console answers `help/versions` with something.
    pub fn check_health(&self) -> ConnectorResult<()> {
        debug!("attempting QRadar connection");
        let res = self.session()?.api.get("help/versions", RequestParts::new())?;
        if is_empty(&res) {
            return Err(ConnectorError::InvalidResponse(
                "help/versions returned no API versions".into(),
            ));
        }
        info!("Check health successful");
        Ok(())
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

/// Strings verbatim, numbers and booleans as their JSON text.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required<'p>(params: &'p Params, name: &str) -> ConnectorResult<&'p Value> {
    match params.get(name) {
        None | Some(Value::Null) => Err(ConnectorError::MissingParam(name.to_string())),
        Some(value) => Ok(value),
    }
}

fn required_str(params: &Params, name: &str) -> ConnectorResult<String> {
    let value = required(params, name)?;
    scalar_string(value)
        .ok_or_else(|| ConnectorError::invalid(name, format!("expected a scalar, got {}", value)))
}

fn optional_str(params: &Params, name: &str) -> Option<String> {
    params
        .get(name)
        .and_then(scalar_string)
        .filter(|s| !s.trim().is_empty())
}

/// Offense ids land in URL paths, so only integers are accepted.
fn offense_id(params: &Params) -> ConnectorResult<String> {
    let id = required_str(params, "offense_id")?;
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConnectorError::invalid(
            "offense_id",
            format!("`{}` is not a numeric offense id", id),
        ));
    }
    Ok(id.to_string())
}

/// A JSON object parameter flattened to string pairs. Missing, null, empty
/// string and empty object all mean no pairs. A string is parsed as JSON.
pub fn object_pairs(params: &Params, name: &str) -> ConnectorResult<Vec<(String, String)>> {
    let map = match params.get(name) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => return Err(ConnectorError::invalid(name, "expected a JSON object")),
        },
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(ConnectorError::invalid(
                name,
                format!("expected a JSON object, got {}", other),
            ))
        }
    };
    Ok(map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), scalar_string(v).unwrap_or_else(|| v.to_string())))
        .collect())
}

/// Request body for `invoke_api`: the payload serialized as JSON, `{}` when
/// nothing was given. A string that already holds JSON is sent as-is.
pub fn payload_body(payload: Option<&Value>) -> String {
    match payload {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => "{}".to_string(),
        Some(Value::String(s)) if serde_json::from_str::<Value>(s).is_ok() => s.clone(),
        Some(Value::Object(map)) if map.is_empty() => "{}".to_string(),
        Some(other) => other.to_string(),
    }
}

/// `start_time between <5 minutes ago> and <now>` in epoch milliseconds.
pub fn default_offense_filter(now: DateTime<Utc>) -> String {
    let start = now - chrono::Duration::minutes(5);
    format!(
        "start_time between {} and {}",
        start.timestamp() * 1000,
        now.timestamp() * 1000
    )
}

/// Convert an offense timestamp into AQL `START`/`STOP` form.
///
/// RFC 3339 strings are converted to UTC and integers are treated as epoch
/// milliseconds. Anything else loses its last five characters (the
/// `.000Z` suffix the platform sends) and has `T` replaced by a space.
pub fn aql_time(name: &str, value: &Value) -> ConnectorResult<String> {
    let from_millis = |ms: i64| {
        DateTime::<Utc>::from_timestamp_millis(ms)
            .map(|t| t.format(AQL_TIME_FORMAT).to_string())
            .ok_or_else(|| ConnectorError::invalid(name, format!("{} is out of range", ms)))
    };
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(ms) => from_millis(ms),
            None => Err(ConnectorError::invalid(name, "expected epoch milliseconds")),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return from_millis(ms);
            }
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(t.with_timezone(&Utc).format(AQL_TIME_FORMAT).to_string());
            }
            let chars: Vec<char> = s.chars().collect();
            let keep = chars.len().saturating_sub(5);
            Ok(chars[..keep].iter().collect::<String>().replace('T', " "))
        }
        other => Err(ConnectorError::invalid(
            name,
            format!("expected a timestamp, got {}", other),
        )),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn get_offenses(s: &Session, p: &Params) -> ConnectorResult<Value> {
    debug!("getting offenses from qradar");
    let filter = match optional_str(p, "filter_string") {
        Some(filter) => filter,
        None => {
            debug!("Using default filter string for offenses in the last 5 minutes");
            default_offense_filter(Utc::now())
        }
    };
    debug!("Filter String: {}", filter);
    s.api
        .get("siem/offenses", RequestParts::new().param("filter", filter))
}

fn query_qradar(s: &Session, p: &Params) -> ConnectorResult<Value> {
    debug!("Querying QRadar for a custom string");
    let search = optional_str(p, "search_string").unwrap_or_default();
    if search.chars().count() < MIN_SEARCH_LEN {
        return Err(ConnectorError::invalid(
            "search_string",
            "Search String shorter than 3 characters in len",
        ));
    }
    s.search(&search)
}

fn get_events_related_to_offense(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let id = offense_id(p)?;
    debug!("Looking for events related to offense {}", id);
    let limit = match p.get("max_results").and_then(Value::as_u64) {
        Some(limit) => limit,
        None => {
            warn!("Defaulting to {} max results.", DEFAULT_MAX_RESULTS);
            DEFAULT_MAX_RESULTS
        }
    };
    let start = aql_time("start_time", required(p, "start_time")?)?;
    let stop = aql_time("last_updated_time", required(p, "last_updated_time")?)?;
    let query = format!(
        "select * from events where InOffense({}) limit {} start '{}' stop '{}'",
        id, limit, start, stop
    );
    s.search(&query)
}

fn get_closing_reasons(s: &Session, _: &Params) -> ConnectorResult<Value> {
    debug!("Retrieving offense closing reason IDs");
    s.api.get("siem/offense_closing_reasons", RequestParts::new())
}

fn get_offense_type(s: &Session, _: &Params) -> ConnectorResult<Value> {
    debug!("Retrieving offense type IDs");
    s.api.get("siem/offense_types", RequestParts::new())
}

fn close_offense(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let id = offense_id(p)?;
    let reason = required_str(p, "offense_close_id")?;
    if let Some(note) = optional_str(p, "closure_note") {
        debug!("Adding closure note to offense {}", id);
        s.api.post(
            &format!("siem/offenses/{}/notes", id),
            RequestParts::new().param("note_text", note),
        )?;
    }
    debug!("Closing offense {}", id);
    s.api.post(
        &format!("siem/offenses/{}", id),
        RequestParts::new()
            .param("closing_reason_id", reason)
            .param("status", "CLOSED"),
    )
}

fn add_notes(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let id = offense_id(p)?;
    let note = required_str(p, "closure_note")?;
    debug!("Create a note on offense {}", id);
    s.api.post(
        &format!("siem/offenses/{}/notes", id),
        RequestParts::new().param("note_text", note),
    )
}

fn get_notes(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let id = offense_id(p)?;
    debug!("Get notes of offense {}", id);
    s.api
        .get(&format!("siem/offenses/{}/notes", id), RequestParts::new())
}

fn get_source_ip(s: &Session, p: &Params) -> ConnectorResult<Value> {
    debug!("Getting source ip details");
    let ids = batch::parse_ids("source_address_ids", required(p, "source_address_ids")?)?;
    let rows = batch::fetch_by_ids(
        &s.api,
        "siem/source_addresses",
        &ids,
        "id, source_ip, network, magnitude",
    )?;
    Ok(Value::Array(rows))
}

fn get_destination_ip(s: &Session, p: &Params) -> ConnectorResult<Value> {
    debug!("Getting destination ip details");
    let ids = batch::parse_ids(
        "destination_address_ids",
        required(p, "destination_address_ids")?,
    )?;
    let rows = batch::fetch_by_ids(
        &s.api,
        "siem/local_destination_addresses",
        &ids,
        "id, local_destination_ip, network, magnitude",
    )?;
    Ok(Value::Array(rows))
}

fn invoke_api(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let method = parse_method(&required_str(p, "method")?)?;
    let endpoint = required_str(p, "endpoint")?;
    let mut parts = RequestParts::new()
        .params(object_pairs(p, "request_parameters")?)
        .headers(object_pairs(p, "headers")?);
    if method != Method::GET {
        parts = parts.body(payload_body(p.get("request_payload")));
    }
    s.api.request(method, endpoint.trim_start_matches('/'), parts)
}

fn handle_reference_set_value(s: &Session, p: &Params) -> ConnectorResult<Value> {
    let action = required_str(p, "method")?;
    let name = required_str(p, "name")?;
    let (method, url) = match action.as_str() {
        "Retrieves Value" => (
            Method::GET,
            s.api.segment_url(&["reference_data", "sets", &name])?,
        ),
        "Add Value" => (
            Method::POST,
            s.api.segment_url(&["reference_data", "sets", &name])?,
        ),
        "Delete Value" => {
            let value = required_str(p, "value")?;
            if value.trim().is_empty() {
                return Err(ConnectorError::invalid(
                    "value",
                    "a value is required to delete from a reference set",
                ));
            }
            (
                Method::DELETE,
                s.api
                    .segment_url(&["reference_data", "sets", &name, &value])?,
            )
        }
        other => {
            return Err(ConnectorError::invalid(
                "method",
                format!("unknown reference set action `{}`", other),
            ))
        }
    };
    let query = p
        .iter()
        .filter(|(key, _)| key.as_str() != "method")
        .filter_map(|(key, value)| scalar_string(value).map(|v| (key.clone(), v)))
        .collect();
    let response = s.api.send(method, url, RequestParts::new().params(query))?;

    let message = format!(
        "Successfully perform {} method on reference set {}",
        action, name
    );
    Ok(match response {
        Value::Object(mut map) => {
            map.insert("message".into(), Value::String(message));
            Value::Object(map)
        }
        other => json!({ "result": other, "message": message }),
    })
}

fn validate_app_installed(s: &Session, _: &Params) -> ConnectorResult<Value> {
    let res = s.api.get(
        "config/extension_management/extensions",
        RequestParts::new().param("fields", "name, version, id"),
    )?;
    let installed = res
        .as_array()
        .map(|records| {
            records.iter().any(|r| {
                r.get("name")
                    .and_then(Value::as_str)
                    .map(|n| n.to_lowercase().contains(APP_MARKER))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false);
    let message = if installed {
        "Validated connection. CyberSponse App is installed on the QRadar server"
    } else {
        warn!(
            "CyberSponse App is not installed on the QRadar server {}",
            s.api.base_url()
        );
        "Validated connection. However, CyberSponse App is not installed on the QRadar server"
    };
    Ok(json!({ "installed": installed, "message": message }))
}
