mod common;

use common::{connector, params, qradar_mock, query};
use mockito::Matcher;
use qradar_connector::ariel::SearchStatus;
use qradar_connector::ConnectorError;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn get_offenses_passes_filter_and_session_headers() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/siem/offenses")
        .match_header("content-type", "application/json")
        .match_query(query(&[("filter", "status=OPEN")]))
        .with_status(200)
        .with_body(r#"[{"id": 1, "status": "OPEN"}]"#)
        .create();

    let value = connector(&server)
        .execute("get_offenses", &params(json!({"filter_string": "status=OPEN"})))
        .unwrap();

    assert_eq!(value, json!([{"id": 1, "status": "OPEN"}]));
    mock.assert();
}

#[test]
fn get_offenses_defaults_to_last_five_minutes() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/siem/offenses")
        .match_query(Matcher::Regex(
            r"^filter=start_time\+between\+\d+\+and\+\d+$".into(),
        ))
        .with_body("[]")
        .create();

    connector(&server)
        .execute("get_offenses", &params(json!({"filter_string": ""})))
        .unwrap();
    mock.assert();
}

#[test]
fn non_success_status_carries_status_and_body() {
    let mut server = mockito::Server::new();
    let _mock = qradar_mock(&mut server, "GET", "/api/siem/offense_types")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(r#"{"message": "You are unauthorized to access the requested resource."}"#)
        .create();

    let err = connector(&server)
        .execute("get_offense_type", &params(json!({})))
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("unauthorized"));
}

#[test]
fn empty_and_text_bodies_are_normalized() {
    let mut server = mockito::Server::new();
    let _empty = qradar_mock(&mut server, "GET", "/api/siem/offense_closing_reasons")
        .match_query(Matcher::Any)
        .with_status(200)
        .create();
    let _text = qradar_mock(&mut server, "GET", "/api/siem/offenses/9/notes")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("note service unavailable")
        .create();

    let c = connector(&server);
    assert_eq!(
        c.execute("get_closing_reasons", &params(json!({}))).unwrap(),
        json!([])
    );
    assert_eq!(
        c.execute("get_notes", &params(json!({"offense_id": 9}))).unwrap(),
        json!("note service unavailable")
    );
}

#[test]
fn query_qradar_polls_until_completed() {
    let mut server = mockito::Server::new();
    let submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(query(&[("query_expression", "select * from events")]))
        .with_status(201)
        .with_body(r#"{"search_id": "abc-123", "status": "WAIT"}"#)
        .create();
    let waiting = qradar_mock(&mut server, "GET", "/api/ariel/searches/abc-123")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "EXECUTE"}"#)
        .expect(2)
        .create();
    let done = qradar_mock(&mut server, "GET", "/api/ariel/searches/abc-123")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "completed"}"#)
        .expect(1)
        .create();
    let results = qradar_mock(&mut server, "GET", "/api/ariel/searches/abc-123/results")
        .match_query(Matcher::Any)
        .with_body(r#"{"events": [{"sourceip": "10.0.0.1"}]}"#)
        .create();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observed = seen.clone();
    let value = connector(&server)
        .on_search_poll(move |status, _| observed.lock().unwrap().push(status.clone()))
        .execute(
            "query_qradar",
            &params(json!({"search_string": "select * from events"})),
        )
        .unwrap();

    assert_eq!(value, json!({"events": [{"sourceip": "10.0.0.1"}]}));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            SearchStatus::Execute,
            SearchStatus::Execute,
            SearchStatus::Completed
        ]
    );
    submit.assert();
    waiting.assert();
    done.assert();
    results.assert();
}

#[test]
fn search_times_out_after_bounded_polls() {
    let mut server = mockito::Server::new();
    let _submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(Matcher::Any)
        .with_body(r#"{"search_id": "slow"}"#)
        .create();
    // 3ms budget at 1ms interval: 3 / 1 + 1 status requests.
    let status = qradar_mock(&mut server, "GET", "/api/ariel/searches/slow")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "EXECUTE"}"#)
        .expect(4)
        .create();
    let results = qradar_mock(&mut server, "GET", "/api/ariel/searches/slow/results")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let polls = Arc::new(AtomicUsize::new(0));
    let counter = polls.clone();
    let err = connector(&server)
        .on_search_poll(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .execute("query_qradar", &params(json!({"search_string": "select 1"})))
        .unwrap_err();

    assert!(matches!(err, ConnectorError::SearchTimeout { ref search_id, .. } if search_id == "slow"));
    assert_eq!(polls.load(Ordering::SeqCst), 4);
    status.assert();
    results.assert();
}

#[test]
fn failed_search_stops_polling() {
    let mut server = mockito::Server::new();
    let _submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(Matcher::Any)
        .with_body(r#"{"search_id": "bad"}"#)
        .create();
    let status = qradar_mock(&mut server, "GET", "/api/ariel/searches/bad")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "ERROR"}"#)
        .expect(1)
        .create();

    let err = connector(&server)
        .execute("query_qradar", &params(json!({"search_string": "select broken"})))
        .unwrap_err();
    assert!(matches!(err, ConnectorError::SearchFailed { ref status, .. } if status == "ERROR"));
    status.assert();
}

#[test]
fn events_related_to_offense_builds_aql() {
    let mut server = mockito::Server::new();
    let aql = "select * from events where InOffense(42) limit 100 \
               start '2024-01-15 10:00:00' stop '2024-01-15 10:05:00'";
    let submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(query(&[("query_expression", aql)]))
        .with_body(r#"{"search_id": "ev"}"#)
        .create();
    let _status = qradar_mock(&mut server, "GET", "/api/ariel/searches/ev")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "COMPLETED"}"#)
        .create();
    let _results = qradar_mock(&mut server, "GET", "/api/ariel/searches/ev/results")
        .match_query(Matcher::Any)
        .with_body(r#"{"events": []}"#)
        .create();

    let value = connector(&server)
        .execute(
            "get_events_related_to_offense",
            &params(json!({
                "offense_id": "42",
                "start_time": "2024-01-15T10:00:00.000Z",
                "last_updated_time": "2024-01-15T10:05:00.000Z",
                "max_results": "lots"
            })),
        )
        .unwrap();
    assert_eq!(value, json!({"events": []}));
    submit.assert();
}

#[test]
fn close_offense_adds_note_then_closes() {
    let mut server = mockito::Server::new();
    let note = qradar_mock(&mut server, "POST", "/api/siem/offenses/42/notes")
        .match_query(query(&[("note_text", "false positive")]))
        .with_status(201)
        .with_body(r#"{"id": 7, "note_text": "false positive"}"#)
        .create();
    let close = qradar_mock(&mut server, "POST", "/api/siem/offenses/42")
        .match_query(query(&[("closing_reason_id", "3"), ("status", "CLOSED")]))
        .with_body(r#"{"id": 42, "status": "CLOSED"}"#)
        .create();

    let value = connector(&server)
        .execute(
            "close_offense",
            &params(json!({
                "offense_id": 42,
                "offense_close_id": 3,
                "closure_note": "false positive"
            })),
        )
        .unwrap();
    assert_eq!(value, json!({"id": 42, "status": "CLOSED"}));
    note.assert();
    close.assert();
}

#[test]
fn close_offense_without_note_skips_notes_endpoint() {
    let mut server = mockito::Server::new();
    let note = qradar_mock(&mut server, "POST", "/api/siem/offenses/42/notes")
        .match_query(Matcher::Any)
        .expect(0)
        .create();
    let close = qradar_mock(&mut server, "POST", "/api/siem/offenses/42")
        .match_query(Matcher::Any)
        .with_body(r#"{"id": 42, "status": "CLOSED"}"#)
        .create();

    connector(&server)
        .execute(
            "close_offense",
            &params(json!({"offense_id": "42", "offense_close_id": "1"})),
        )
        .unwrap();
    note.assert();
    close.assert();
}

#[test]
fn add_notes_posts_note_text() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "POST", "/api/siem/offenses/5/notes")
        .match_query(query(&[("note_text", "escalated to tier 2")]))
        .with_status(201)
        .with_body(r#"{"id": 1}"#)
        .create();

    connector(&server)
        .execute(
            "add_notes",
            &params(json!({"offense_id": 5, "closure_note": "escalated to tier 2"})),
        )
        .unwrap();
    mock.assert();
}

#[test]
fn source_addresses_are_fetched_in_batches_of_one_hundred() {
    let mut server = mockito::Server::new();
    let ids: Vec<u32> = (1..=150).collect();
    let first = ids[..100]
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let second = ids[100..]
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let first = format!("id in ({})", first);
    let second = format!("id in ({})", second);
    let fields = "id, source_ip, network, magnitude";

    let batch_one = qradar_mock(&mut server, "GET", "/api/siem/source_addresses")
        .match_query(query(&[
            ("filter", first.as_str()),
            ("fields", fields),
        ]))
        .with_body(r#"[{"id": 1, "source_ip": "10.0.0.1"}]"#)
        .create();
    let batch_two = qradar_mock(&mut server, "GET", "/api/siem/source_addresses")
        .match_query(query(&[
            ("filter", second.as_str()),
            ("fields", fields),
        ]))
        .with_body(r#"[{"id": 101, "source_ip": "10.0.0.101"}]"#)
        .create();

    let value = connector(&server)
        .execute("get_source_ip", &params(json!({"source_address_ids": ids})))
        .unwrap();

    assert_eq!(
        value,
        json!([
            {"id": 1, "source_ip": "10.0.0.1"},
            {"id": 101, "source_ip": "10.0.0.101"}
        ])
    );
    batch_one.assert();
    batch_two.assert();
}

#[test]
fn destination_addresses_accept_comma_separated_ids() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/siem/local_destination_addresses")
        .match_query(query(&[
            ("filter", "id in (3,4)"),
            ("fields", "id, local_destination_ip, network, magnitude"),
        ]))
        .with_body(r#"[{"id": 3}, {"id": 4}]"#)
        .create();

    let value = connector(&server)
        .execute(
            "get_destination_ip",
            &params(json!({"destination_address_ids": "3, 4"})),
        )
        .unwrap();
    assert_eq!(value, json!([{"id": 3}, {"id": 4}]));
    mock.assert();
}

#[test]
fn invoke_api_forwards_params_headers_and_payload() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "POST", "/api/siem/offenses/5")
        .match_query(query(&[("assigned_to", "analyst")]))
        .match_header("range", "items=0-9")
        .match_body(Matcher::Json(json!({"follow_up": true})))
        .with_body(r#"{"id": 5, "assigned_to": "analyst"}"#)
        .create();

    let value = connector(&server)
        .execute(
            "invoke_api",
            &params(json!({
                "method": "post",
                "endpoint": "/siem/offenses/5",
                "request_parameters": {"assigned_to": "analyst"},
                "headers": {"Range": "items=0-9"},
                "request_payload": {"follow_up": true}
            })),
        )
        .unwrap();
    assert_eq!(value, json!({"id": 5, "assigned_to": "analyst"}));
    mock.assert();
}

#[test]
fn invoke_api_get_sends_no_body() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/system/about")
        .match_query(Matcher::Any)
        .match_body("")
        .with_body(r#"{"release_name": "7.5.0"}"#)
        .create();

    let value = connector(&server)
        .execute(
            "invoke_api",
            &params(json!({
                "method": "GET",
                "endpoint": "system/about",
                "request_parameters": null,
                "headers": "",
                "request_payload": {"ignored": 1}
            })),
        )
        .unwrap();
    assert_eq!(value["release_name"], "7.5.0");
    mock.assert();
}

#[test]
fn reference_set_add_value_reports_message() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "POST", "/api/reference_data/sets/blocklist")
        .match_query(query(&[("name", "blocklist"), ("value", "10.0.0.1")]))
        .with_body(r#"{"name": "blocklist", "number_of_elements": 1}"#)
        .create();

    let value = connector(&server)
        .execute(
            "handle_reference_set_value",
            &params(json!({"method": "Add Value", "name": "blocklist", "value": "10.0.0.1"})),
        )
        .unwrap();
    assert_eq!(value["number_of_elements"], 1);
    assert_eq!(
        value["message"],
        "Successfully perform Add Value method on reference set blocklist"
    );
    mock.assert();
}

#[test]
fn reference_set_delete_value_targets_value_path() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "DELETE", "/api/reference_data/sets/blocklist/10.0.0.1")
        .match_query(Matcher::Any)
        .with_body(r#"[]"#)
        .create();

    let value = connector(&server)
        .execute(
            "handle_reference_set_value",
            &params(json!({"method": "Delete Value", "name": "blocklist", "value": "10.0.0.1"})),
        )
        .unwrap();
    assert_eq!(value["result"], json!([]));
    assert_eq!(
        value["message"],
        "Successfully perform Delete Value method on reference set blocklist"
    );
    mock.assert();
}

#[test]
fn validate_app_installed_checks_extension_names() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/config/extension_management/extensions")
        .match_query(query(&[("fields", "name, version, id")]))
        .with_body(r#"[{"name": "Pulse"}, {"name": "CyberSponse SOAR App", "id": 3}]"#)
        .create();

    let value = connector(&server)
        .execute("validate_app_installed", &params(json!({})))
        .unwrap();
    assert_eq!(value["installed"], true);
    mock.assert();
}

#[test]
fn health_check_needs_versions() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/help/versions")
        .match_query(Matcher::Any)
        .with_body(r#"[{"version": "6.0"}]"#)
        .create();
    connector(&server).check_health().unwrap();
    mock.assert();

    let mut empty = mockito::Server::new();
    let _mock = qradar_mock(&mut empty, "GET", "/api/help/versions")
        .match_query(Matcher::Any)
        .with_body("")
        .create();
    let err = connector(&empty).check_health().unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidResponse(_)));
}

#[test]
fn canceled_search_stops_polling() {
    let mut server = mockito::Server::new();
    let _submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(Matcher::Any)
        .with_body(r#"{"search_id": "gone"}"#)
        .create();
    let status = qradar_mock(&mut server, "GET", "/api/ariel/searches/gone")
        .match_query(Matcher::Any)
        .with_body(r#"{"status": "CANCELED"}"#)
        .expect(1)
        .create();
    let results = qradar_mock(&mut server, "GET", "/api/ariel/searches/gone/results")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let err = connector(&server)
        .execute("query_qradar", &params(json!({"search_string": "select 1"})))
        .unwrap_err();
    assert!(matches!(err, ConnectorError::SearchFailed { ref status, .. } if status == "CANCELED"));
    status.assert();
    results.assert();
}

#[test]
fn blank_search_id_is_an_invalid_response() {
    let mut server = mockito::Server::new();
    let _submit = qradar_mock(&mut server, "POST", "/api/ariel/searches")
        .match_query(Matcher::Any)
        .with_body(r#"{"search_id": ""}"#)
        .create();
    let polls = server
        .mock("GET", Matcher::Regex(r"^/api/ariel/searches".into()))
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let err = connector(&server)
        .execute("query_qradar", &params(json!({"search_string": "select 1"})))
        .unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidResponse(_)));
    polls.assert();
}

#[test]
fn reference_set_retrieve_value_gets_the_set() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/reference_data/sets/blocklist")
        .match_query(query(&[("name", "blocklist")]))
        .with_body(r#"{"name": "blocklist", "data": [{"value": "10.0.0.1"}]}"#)
        .create();

    let value = connector(&server)
        .execute(
            "handle_reference_set_value",
            &params(json!({"method": "Retrieves Value", "name": "blocklist"})),
        )
        .unwrap();
    assert_eq!(value["data"][0]["value"], "10.0.0.1");
    assert_eq!(
        value["message"],
        "Successfully perform Retrieves Value method on reference set blocklist"
    );
    mock.assert();
}

#[test]
fn reference_set_delete_rejects_blank_value() {
    let mut server = mockito::Server::new();
    let delete = server
        .mock("DELETE", Matcher::Regex(r"^/api/reference_data/sets".into()))
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    for value in ["", "   "] {
        let err = connector(&server)
            .execute(
                "handle_reference_set_value",
                &params(json!({"method": "Delete Value", "name": "blocklist", "value": value})),
            )
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidParam { ref name, .. } if name == "value"));
    }
    delete.assert();
}

#[test]
fn non_numeric_address_ids_never_reach_the_filter() {
    let mut server = mockito::Server::new();
    let lookup = qradar_mock(&mut server, "GET", "/api/siem/source_addresses")
        .match_query(Matcher::Any)
        .expect(0)
        .create();

    let err = connector(&server)
        .execute(
            "get_source_ip",
            &params(json!({"source_address_ids": ["1) or (magnitude > 0"]})),
        )
        .unwrap_err();
    assert!(
        matches!(err, ConnectorError::InvalidParam { ref name, .. } if name == "source_address_ids")
    );
    lookup.assert();
}

#[test]
fn validate_app_installed_reports_missing_app() {
    let mut server = mockito::Server::new();
    let mock = qradar_mock(&mut server, "GET", "/api/config/extension_management/extensions")
        .match_query(Matcher::Any)
        .with_body(r#"[{"name": "Pulse", "id": 1}]"#)
        .create();

    let value = connector(&server)
        .execute("validate_app_installed", &params(json!({})))
        .unwrap();
    assert_eq!(value["installed"], false);
    assert!(value["message"]
        .as_str()
        .unwrap()
        .contains("not installed"));
    mock.assert();
}
