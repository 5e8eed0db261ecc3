// Address lookups filter by id, and the console rejects overly long query
// strings, so id lists are split into fixed-size `id in (...)` filters.

use crate::api::{ApiClient, RequestParts};
use crate::error::{ConnectorError, ConnectorResult};
use serde_json::Value;
use tracing::info;

/// Ids sent per GET request.
pub const BATCH_SIZE: usize = 100;

/// One `id in (a,b,c)` filter per consecutive chunk of `ids`.
pub fn chunk_filters<T: AsRef<str>>(ids: &[T], size: usize) -> Vec<String> {
    ids.chunks(size.max(1))
        .map(|chunk| {
            let joined = chunk.iter().map(|id| id.as_ref()).collect::<Vec<_>>().join(",");
            format!("id in ({})", joined)
        })
        .collect()
}

/// Fetch `endpoint` for every id, one request per batch, concatenating the
/// results in input order.
pub fn fetch_by_ids<T: AsRef<str>>(
    api: &ApiClient,
    endpoint: &str,
    ids: &[T],
    fields: &str,
) -> ConnectorResult<Vec<Value>> {
    let mut result = Vec::new();
    for filter in chunk_filters(ids, BATCH_SIZE) {
        info!("Filter String: {}", filter);
        let parts = RequestParts::new()
            .param("filter", filter)
            .param("fields", fields);
        match api.get(endpoint, parts)? {
            Value::Array(items) => result.extend(items),
            other => result.push(other),
        }
    }
    Ok(result)
}

/// Read an id list given as a JSON array of numbers/strings or as a
/// comma-separated string. Ids are spliced into the filter expression, so
/// each one must be an unsigned integer.
pub fn parse_ids(name: &str, value: &Value) -> ConnectorResult<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) => numeric_id(name, &n.to_string()),
                Value::String(s) if !s.trim().is_empty() => numeric_id(name, s),
                other => Err(ConnectorError::invalid(
                    name,
                    format!("unsupported id value {}", other),
                )),
            })
            .collect(),
        Value::String(s) => s
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|id| numeric_id(name, id))
            .collect(),
        Value::Number(n) => Ok(vec![numeric_id(name, &n.to_string())?]),
        other => Err(ConnectorError::invalid(
            name,
            format!("expected a list of ids, got {}", other),
        )),
    }
}

fn numeric_id(name: &str, raw: &str) -> ConnectorResult<String> {
    let id = raw.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConnectorError::invalid(
            name,
            format!("`{}` is not a numeric id", id),
        ));
    }
    Ok(id.to_string())
}
