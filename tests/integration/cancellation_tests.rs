//! Integration tests for `cancel` handling over stdio.
//!
//! A cancel response must never wait behind a running execution, and it must
//! always be written before the response of the execution it cancels.

use serde_json::json;

use super::test_helpers::{
    cancel, execute, start_with_controller, test_config, wait_until_active,
};

const LONG_SCRIPT: &str = "print \"started\"\nsleep 60000\nreturn 1";

#[tokio::test]
async fn cancel_running_execution_by_id() {
    let (mut harness, controller) = start_with_controller(&test_config());

    harness.send(&execute(1, LONG_SCRIPT)).await;
    wait_until_active(&controller, 1).await;
    harness.send(&cancel(2, Some(1))).await;

    let responses = harness.responses(2).await;
    assert_eq!(
        responses[0],
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": { "cancelled": true, "executionId": 1 }
        })
    );
    assert_eq!(
        responses[1],
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32001, "message": "Script execution cancelled" }
        })
    );

    let (rest, result) = harness.finish().await;
    result.expect("dispatcher succeeds");
    assert!(rest.is_empty());
}

/// A cancel without params targets the running execution.
#[tokio::test]
async fn cancel_without_target_hits_running_execution() {
    let (mut harness, controller) = start_with_controller(&test_config());

    harness.send(&execute(10, LONG_SCRIPT)).await;
    wait_until_active(&controller, 10).await;
    harness.send(&cancel(11, None)).await;

    let responses = harness.responses(2).await;
    assert_eq!(responses[0]["id"], json!(11));
    assert_eq!(responses[0]["result"]["executionId"], json!(10));
    assert_eq!(responses[1]["id"], json!(10));
    assert_eq!(responses[1]["error"]["code"], json!(-32001));
}

/// A cancel for an unknown id answers immediately while a script runs.
#[tokio::test]
async fn cancel_response_is_not_delayed_by_running_execution() {
    let (mut harness, controller) = start_with_controller(&test_config());

    harness.send(&execute(1, LONG_SCRIPT)).await;
    wait_until_active(&controller, 1).await;
    harness.send(&cancel(2, Some(99))).await;

    let response = harness.next_response().await;
    assert_eq!(
        response,
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": { "cancelled": false, "reason": "no matching execution" }
        })
    );
    assert_eq!(controller.active_execution(), Some(1), "execution keeps running");

    harness.send(&cancel(3, Some(1))).await;
    let responses = harness.responses(2).await;
    assert_eq!(responses[0]["id"], json!(3));
    assert_eq!(responses[1]["id"], json!(1));
}

#[tokio::test]
async fn cancel_when_idle_reports_no_match() {
    let (mut harness, _controller) = start_with_controller(&test_config());

    harness.send(&cancel(1, None)).await;

    let response = harness.next_response().await;
    assert_eq!(response["result"]["cancelled"], json!(false));
}

/// A bare cancel with nothing running leaves admitted work untouched.
#[tokio::test]
async fn bare_cancel_between_executions_spares_admitted_work() {
    let (mut harness, controller) = start_with_controller(&test_config());
    let pending = controller.admit(7);

    harness.send(&cancel(8, None)).await;

    let response = harness.next_response().await;
    assert_eq!(
        response,
        json!({
            "jsonrpc": "2.0",
            "id": 8,
            "result": { "cancelled": false, "reason": "no matching execution" }
        })
    );
    assert!(!pending.is_cancelled());
    assert_eq!(controller.admitted_count(), 1);
}

/// A queued execution can be cancelled before it starts; it never runs and
/// answers with `-32001` in its turn.
#[tokio::test]
async fn cancel_queued_execution_before_it_starts() {
    let (mut harness, controller) = start_with_controller(&test_config());

    harness.send(&execute(1, LONG_SCRIPT)).await;
    wait_until_active(&controller, 1).await;
    harness.send(&execute(2, "return 2")).await;
    harness.send(&cancel(3, Some(2))).await;
    harness.send(&cancel(4, Some(1))).await;

    let responses = harness.responses(4).await;
    let ids: Vec<_> = responses.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(3), json!(4), json!(1), json!(2)]);
    assert_eq!(responses[0]["result"]["executionId"], json!(2));
    assert_eq!(responses[2]["error"]["code"], json!(-32001));
    assert_eq!(responses[3]["error"]["code"], json!(-32001));
}

/// Shutdown cancels running work; every admitted request still answers.
#[tokio::test]
async fn shutdown_cancels_running_and_queued_executions() {
    let (mut harness, controller) = start_with_controller(&test_config());

    harness.send(&execute(1, LONG_SCRIPT)).await;
    harness.send(&execute(2, "return 2")).await;
    wait_until_active(&controller, 1).await;
    for _ in 0..500 {
        if controller.admitted_count() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(controller.admitted_count(), 1, "second execution admitted");
    harness.shutdown();

    let (responses, result) = harness.finish().await;
    result.expect("dispatcher succeeds");
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], json!(1));
    assert_eq!(responses[0]["error"]["code"], json!(-32001));
    assert_eq!(responses[1]["id"], json!(2));
    assert_eq!(responses[1]["error"]["code"], json!(-32001));
}
