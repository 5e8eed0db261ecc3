#![allow(dead_code)]

use mockito::{Matcher, Mock, ServerGuard};
use qradar_connector::ariel::PollPolicy;
use qradar_connector::config::ConnectorConfig;
use qradar_connector::{Connector, Params};
use serde_json::Value;
use std::time::Duration;

pub const TOKEN: &str = "secret-token";

pub fn connector_config(server: &ServerGuard) -> ConnectorConfig {
    ConnectorConfig::new(server.url(), TOKEN)
}

/// Connector pointed at the mock server with millisecond polling.
pub fn connector(server: &ServerGuard) -> Connector {
    Connector::new(connector_config(server))
        .with_poll_policy(PollPolicy::new(Duration::from_millis(1), Duration::from_millis(3)))
}

pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        other => panic!("params must be an object, got {}", other),
    }
}

/// A mock carrying the session headers every QRadar request must send.
pub fn qradar_mock(server: &mut ServerGuard, method: &str, path: &str) -> Mock {
    server
        .mock(method, path)
        .match_header("sec", TOKEN)
        .match_header("version", "6.0")
        .match_header("accept", "application/json")
}

pub fn query(pairs: &[(&str, &str)]) -> Matcher {
    Matcher::AllOf(
        pairs
            .iter()
            .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string()))
            .collect(),
    )
}
