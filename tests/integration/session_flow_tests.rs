//! Integration tests for session persistence and the sticky server URL.

use serde_json::json;

use super::test_helpers::{execute, execute_with, run_requests, test_config, StdioHarness};

#[tokio::test]
async fn session_values_persist_between_requests() {
    let responses = run_requests(
        &test_config(),
        &[
            execute_with(1, json!({ "script": "session.set count 5", "sessionId": "s1" })),
            execute_with(2, json!({ "script": "return session.get count", "sessionId": "s1" })),
        ],
    )
    .await;

    assert_eq!(responses[1]["result"], json!({ "value": 5 }));
}

#[tokio::test]
async fn sessions_are_isolated_by_id() {
    let responses = run_requests(
        &test_config(),
        &[
            execute_with(1, json!({ "script": "session.set key \"a\"", "sessionId": "a" })),
            execute_with(2, json!({ "script": "return session.get key", "sessionId": "b" })),
        ],
    )
    .await;

    assert_eq!(responses[1]["result"], json!({ "value": null }));
}

/// Requests without a session id share the default session.
#[tokio::test]
async fn requests_without_session_share_default() {
    let responses = run_requests(
        &test_config(),
        &[
            execute(1, "session.set shared [1, 2]"),
            execute_with(2, json!({ "script": "return session.get shared", "sessionId": "" })),
        ],
    )
    .await;

    assert_eq!(responses[1]["result"], json!([1, 2]));
}

/// A `serverUrl` applies to its own execution and every later one.
#[tokio::test]
async fn server_url_is_sticky() {
    let (mut harness, remote) = StdioHarness::start(&test_config());

    harness.send(&execute(1, "call tests.query")).await;
    harness
        .send(&execute_with(
            2,
            json!({ "script": "call tests.query", "serverUrl": "http://inventory.test:9000" }),
        ))
        .await;
    harness.send(&execute(3, "call tests.query")).await;
    let (responses, result) = harness.finish().await;

    result.expect("dispatcher succeeds");
    assert_eq!(responses.len(), 3);
    let urls: Vec<_> = remote.calls().into_iter().map(|call| call.server_url).collect();
    assert_eq!(
        urls,
        vec![
            "http://localhost:1215".to_owned(),
            "http://inventory.test:9000".to_owned(),
            "http://inventory.test:9000".to_owned(),
        ]
    );
}

/// A remote call's result flows back into the script.
#[tokio::test]
async fn remote_result_is_returned_to_the_script() {
    let responses = run_requests(
        &test_config(),
        &[execute(
            1,
            "let r = call spec.search {\"query\": \"Array\"}\nreturn $r",
        )],
    )
    .await;

    assert_eq!(
        responses[0]["result"],
        json!({ "method": "spec.search", "params": { "query": "Array" } })
    );
}
