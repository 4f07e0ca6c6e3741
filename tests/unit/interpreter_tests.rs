//! Unit tests for the built-in directive interpreter.
//!
//! Remote calls go to an in-memory `RemoteCaller` that records every call
//! and answers from a fixed table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use script_runtime::remote::{RemoteCaller, RemoteFuture, RemoteHandle};
use script_runtime::script::{DirectiveEngine, OutputBuffer, ScriptContext, ScriptEngine};
use script_runtime::session::{SessionScope, SessionStore};
use script_runtime::AppError;

// ── Fixtures ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TableRemote {
    answers: HashMap<String, Result<Value, AppError>>,
    calls: Mutex<Vec<(String, String, Option<Value>)>>,
}

impl TableRemote {
    fn with(mut self, method: &str, answer: Result<Value, AppError>) -> Self {
        self.answers.insert(method.to_owned(), answer);
        self
    }

    fn calls(&self) -> Vec<(String, String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl RemoteCaller for TableRemote {
    fn call<'a>(
        &'a self,
        server_url: &'a str,
        method: &'a str,
        params: Option<Value>,
        _cancel: &'a CancellationToken,
    ) -> RemoteFuture<'a> {
        self.calls
            .lock()
            .unwrap()
            .push((server_url.to_owned(), method.to_owned(), params));
        let answer = self
            .answers
            .get(method)
            .cloned()
            .unwrap_or_else(|| Err(AppError::Remote(format!("Unknown method: {method}"))));
        Box::pin(async move { answer })
    }
}

struct Harness {
    output: OutputBuffer,
    store: Arc<SessionStore>,
    remote: Arc<TableRemote>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(remote: TableRemote) -> Self {
        Self {
            output: OutputBuffer::new(),
            store: Arc::new(SessionStore::new()),
            remote: Arc::new(remote),
            cancel: CancellationToken::new(),
        }
    }

    fn context(&self, session: &str) -> ScriptContext {
        ScriptContext {
            output: self.output.clone(),
            session: SessionScope::new(Arc::clone(&self.store), Some(session)),
            remote: RemoteHandle::new(
                Arc::clone(&self.remote) as Arc<dyn RemoteCaller>,
                "http://inventory.test".to_owned(),
                self.cancel.clone(),
            ),
            cancel: self.cancel.clone(),
        }
    }

    async fn run(&self, script: &str) -> Result<Option<Value>, AppError> {
        DirectiveEngine::new().run(script, self.context("s")).await
    }
}

// ── Statements ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_script_returns_nothing() {
    let harness = Harness::new(TableRemote::default());

    let value = harness.run("").await.expect("empty script succeeds");

    assert_eq!(value, None);
    assert!(harness.output.is_empty());
}

/// Strings print raw, other values as pretty JSON, bare text verbatim.
#[tokio::test]
async fn print_formats_values() {
    let harness = Harness::new(TableRemote::default());

    harness
        .run("print \"hello\"\nprint 42\nprint {\"a\": 1}\nprint not json at all")
        .await
        .expect("script succeeds");

    assert_eq!(
        harness.output.take(),
        vec![
            "hello".to_owned(),
            "42".to_owned(),
            "{\n  \"a\": 1\n}".to_owned(),
            "not json at all".to_owned(),
        ]
    );
}

/// Several arguments are rendered one by one and joined with a space.
#[tokio::test]
async fn print_joins_multiple_arguments() {
    let harness = Harness::new(TableRemote::default());

    harness
        .run("let n = 3\nprint \"passed:\" $n {\"ok\": true}\nprint $n $n")
        .await
        .expect("script succeeds");

    assert_eq!(
        harness.output.take(),
        vec![
            "passed: 3 {\n  \"ok\": true\n}".to_owned(),
            "3 3".to_owned(),
        ]
    );
}

#[tokio::test]
async fn comments_and_blank_lines_are_ignored() {
    let harness = Harness::new(TableRemote::default());

    let value = harness
        .run("# heading\n\n// note\n   \nreturn 1")
        .await
        .expect("script succeeds");

    assert_eq!(value, Some(json!(1)));
}

#[tokio::test]
async fn let_binds_and_return_reads_variable() {
    let harness = Harness::new(TableRemote::default());

    let value = harness
        .run("let totals = {\"pass\": 3}\nprint $totals\nreturn $totals")
        .await
        .expect("script succeeds");

    assert_eq!(value, Some(json!({ "pass": 3 })));
    assert_eq!(harness.output.len(), 1);
}

/// Statements after `return` do not run.
#[tokio::test]
async fn return_stops_the_script() {
    let harness = Harness::new(TableRemote::default());

    let value = harness
        .run("return\nprint \"unreachable\"")
        .await
        .expect("script succeeds");

    assert_eq!(value, None);
    assert!(harness.output.is_empty());
}

// ── Remote calls ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn call_expression_passes_params_and_binds_result() {
    let remote = TableRemote::default().with("tests.getStatus", Ok(json!({ "status": "PASS" })));
    let harness = Harness::new(remote);

    let value = harness
        .run("let status = call tests.getStatus {\"path\": \"a.js\"}\nreturn $status")
        .await
        .expect("script succeeds");

    assert_eq!(value, Some(json!({ "status": "PASS" })));
    assert_eq!(
        harness.remote.calls(),
        vec![(
            "http://inventory.test".to_owned(),
            "tests.getStatus".to_owned(),
            Some(json!({ "path": "a.js" })),
        )]
    );
}

#[tokio::test]
async fn call_statement_without_params() {
    let remote = TableRemote::default().with("runner.getJob", Ok(Value::Null));
    let harness = Harness::new(remote);

    harness.run("call runner.getJob").await.expect("script succeeds");

    assert_eq!(harness.remote.calls()[0].2, None);
}

/// Remote failures are not prefixed with the line number.
#[tokio::test]
async fn remote_error_passes_through_unchanged() {
    let remote =
        TableRemote::default().with("tests.getCode", Err(AppError::Remote("Test not found".into())));
    let harness = Harness::new(remote);

    let err = harness
        .run("print \"before\"\ncall tests.getCode \"x.js\"")
        .await
        .expect_err("remote failure");

    assert_eq!(err, AppError::Remote("Test not found".into()));
}

// ── Sessions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_statements_modify_the_store() {
    let harness = Harness::new(TableRemote::default());

    harness
        .run("session.set count 5\nsession.set name \"x\"\nsession.delete name")
        .await
        .expect("script succeeds");

    assert_eq!(harness.store.get("s", "count"), Some(json!(5)));
    assert_eq!(harness.store.get("s", "name"), None);
}

/// Values stored by one execution are visible to the next in the same
/// session.
#[tokio::test]
async fn session_values_persist_across_runs() {
    let harness = Harness::new(TableRemote::default());

    harness.run("session.set seen true").await.expect("first run");
    let value = harness.run("return session.get seen").await.expect("second run");

    assert_eq!(value, Some(json!(true)));
}

#[tokio::test]
async fn session_get_of_missing_key_is_null() {
    let harness = Harness::new(TableRemote::default());

    let value = harness.run("return session.get nothing").await.expect("run");

    assert_eq!(value, Some(Value::Null));
}

#[tokio::test]
async fn session_clear_empties_only_this_session() {
    let harness = Harness::new(TableRemote::default());
    harness.store.set("other", "k", json!(1));
    harness.store.set("s", "k", json!(1));

    harness.run("session.clear").await.expect("run");

    assert_eq!(harness.store.len("s"), 0);
    assert_eq!(harness.store.get("other", "k"), Some(json!(1)));
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fail_reports_line_number() {
    let harness = Harness::new(TableRemote::default());

    let err = harness
        .run("print 1\n\nfail Something went wrong")
        .await
        .expect_err("fail statement");

    assert_eq!(err, AppError::Script("line 3: Something went wrong".into()));
}

#[tokio::test]
async fn unknown_statement_is_a_script_error() {
    let harness = Harness::new(TableRemote::default());

    let err = harness.run("explode now").await.expect_err("unknown statement");

    assert_eq!(err, AppError::Script("line 1: unknown statement `explode`".into()));
}

#[tokio::test]
async fn undefined_variable_is_a_script_error() {
    let harness = Harness::new(TableRemote::default());

    let err = harness.run("return $missing").await.expect_err("undefined variable");

    assert_eq!(err, AppError::Script("line 1: undefined variable `$missing`".into()));
}

#[tokio::test]
async fn invalid_sleep_duration_is_rejected() {
    let harness = Harness::new(TableRemote::default());

    let err = harness.run("sleep soon").await.expect_err("bad duration");

    assert!(matches!(err, AppError::Script(ref msg) if msg.starts_with("line 1: invalid sleep")));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// A cancelled token stops the script before its next statement.
#[tokio::test]
async fn cancelled_token_stops_before_next_statement() {
    let harness = Harness::new(TableRemote::default());
    harness.cancel.cancel();

    let err = harness.run("print \"never\"").await.expect_err("cancelled");

    assert_eq!(err, AppError::Cancelled);
    assert!(harness.output.is_empty());
}

#[tokio::test]
async fn sleep_is_interrupted_by_cancellation() {
    let harness = Harness::new(TableRemote::default());
    let cancel = harness.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = harness.run("sleep 60000").await.expect_err("cancelled");

    assert_eq!(err, AppError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}
