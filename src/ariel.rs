// Ariel searches run asynchronously on the console: submit the AQL, poll
// the job status on a fixed interval, then fetch the results once.

use crate::api::{ApiClient, RequestParts};
use crate::error::{ConnectorError, ConnectorResult};
use serde_json::Value;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info};

/// Longest a search may run before we give up.
pub const MAX_SEARCH_WAIT: Duration = Duration::from_secs(600);
/// Pause between two status requests.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polling cadence and budget for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    max_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: POLL_INTERVAL,
            max_wait: MAX_SEARCH_WAIT,
        }
    }
}

impl PollPolicy {
    /// The interval is clamped to at least one millisecond.
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        PollPolicy {
            interval: interval.max(MIN_POLL_INTERVAL),
            max_wait,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Upper bound on status requests issued for one search.
    pub fn max_polls(&self) -> u64 {
        (self.max_wait.as_nanos() / self.interval.as_nanos()) as u64 + 1
    }
}

/// Status reported by `GET ariel/searches/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchStatus {
    Wait,
    Execute,
    Sorting,
    Completed,
    Canceled,
    Error,
    Other(String),
}

impl SearchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WAIT" => SearchStatus::Wait,
            "EXECUTE" => SearchStatus::Execute,
            "SORTING" => SearchStatus::Sorting,
            "COMPLETED" => SearchStatus::Completed,
            "CANCELED" | "CANCELLED" => SearchStatus::Canceled,
            "ERROR" => SearchStatus::Error,
            _ => SearchStatus::Other(raw.to_string()),
        }
    }

    fn is_failure(&self) -> bool {
        matches!(self, SearchStatus::Canceled | SearchStatus::Error)
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStatus::Wait => f.write_str("WAIT"),
            SearchStatus::Execute => f.write_str("EXECUTE"),
            SearchStatus::Sorting => f.write_str("SORTING"),
            SearchStatus::Completed => f.write_str("COMPLETED"),
            SearchStatus::Canceled => f.write_str("CANCELED"),
            SearchStatus::Error => f.write_str("ERROR"),
            SearchStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Run an AQL query and return its results.
pub fn search(api: &ApiClient, query: &str, policy: PollPolicy) -> ConnectorResult<Value> {
    search_with_progress(api, query, policy, |_, _| {})
}

/// Like [`search`], calling `on_poll` with each status and the time waited
/// so far.
pub fn search_with_progress<F>(
    api: &ApiClient,
    query: &str,
    policy: PollPolicy,
    on_poll: F,
) -> ConnectorResult<Value>
where
    F: FnMut(&SearchStatus, Duration),
{
    info!("Running ariel search");
    debug!("Search string: {}", query);
    let search_id = submit(api, query)?;
    wait_for_completion(api, &search_id, policy, on_poll)?;
    api.get(&format!("ariel/searches/{}/results", search_id), RequestParts::new())
}

/// Start a search and return its id.
pub fn submit(api: &ApiClient, query: &str) -> ConnectorResult<String> {
    let res = api.post(
        "ariel/searches",
        RequestParts::new().param("query_expression", query),
    )?;
    match res.get("search_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ConnectorError::InvalidResponse(
            "search submission returned no search_id".into(),
        )),
    }
}

/// Poll until the search completes, fails, or the wait budget runs out.
pub fn wait_for_completion<F>(
    api: &ApiClient,
    search_id: &str,
    policy: PollPolicy,
    mut on_poll: F,
) -> ConnectorResult<()>
where
    F: FnMut(&SearchStatus, Duration),
{
    let endpoint = format!("ariel/searches/{}", search_id);
    let mut waited = Duration::ZERO;
    loop {
        let res = api.get(&endpoint, RequestParts::new())?;
        let status = SearchStatus::parse(res.get("status").and_then(Value::as_str).unwrap_or(""));
        on_poll(&status, waited);

        if status == SearchStatus::Completed {
            return Ok(());
        }
        if status.is_failure() {
            error!("search {} ended with status {}", search_id, status);
            return Err(ConnectorError::SearchFailed {
                search_id: search_id.to_string(),
                status: status.to_string(),
            });
        }
        if waited >= policy.max_wait {
            let secs = policy.max_wait.as_secs();
            error!(
                "Search took longer than {} seconds to complete so we quit trying.",
                secs
            );
            return Err(ConnectorError::SearchTimeout {
                search_id: search_id.to_string(),
                secs,
            });
        }
        waited += policy.interval;
        debug!(
            "Waiting for search results: total search time {}s",
            waited.as_secs_f64()
        );
        thread::sleep(policy.interval);
    }
}
