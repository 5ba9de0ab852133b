mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use common::{DATABASE, Fixture};
use serde_json::json;
use sqlscope::execute::ExecutionError;
use sqlscope::extract::ExtractionStrategy;
use sqlscope::generation::{FixedResponseBackend, GenerationBackend, GenerationError};
use sqlscope::models::{ObjectType, QueryOutcome, ScopeMapping};
use sqlscope::pipeline::{Engine, PipelineError};
use sqlscope::record::OutcomeSink;
use sqlscope::validate::Gate;

fn engine(fixture: &Fixture, backend: Arc<FixedResponseBackend>) -> Engine {
    Engine::new(
        &fixture.settings,
        fixture.store.clone(),
        fixture.pools.clone(),
        backend,
    )
}

/// Answers with the queued responses in order, then repeats the last one.
struct ScriptedBackend(Mutex<VecDeque<String>>);

impl ScriptedBackend {
    fn new(responses: &[&str]) -> Self {
        Self(Mutex::new(responses.iter().map(|r| r.to_string()).collect()))
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, GenerationError> {
        let mut queue = self.0.lock().expect("script lock");
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or(GenerationError::EmptyResponse)
    }
}

#[test]
fn current_time_request_is_answered() {
    let fixture = Fixture::new();
    let backend = Arc::new(FixedResponseBackend::new(
        "Here you go:\n```sql\nSELECT datetime('now') AS now;\n```",
    ));
    let engine = engine(&fixture, backend);

    let answer = engine
        .ask(None, "show current time", None)
        .expect("time request should succeed");

    assert_eq!(answer.candidate.as_str(), "SELECT datetime('now') AS now;");
    assert_eq!(answer.extraction, ExtractionStrategy::FencedBlock);
    assert_eq!(answer.result.columns, vec!["now"]);
    assert_eq!(answer.result.row_count, 1);
    assert!(answer.scope.is_default());
    assert_eq!(answer.language, "en");

    let history = fixture
        .store
        .recent_outcomes("", 10)
        .expect("history should load");
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].row_count, 1);
}

#[test]
fn destructive_statement_is_rejected_before_the_store() {
    let fixture = Fixture::new();
    fixture.map("ana", "admin", "main", "2026-01-01T00:00:00.000Z");
    let backend = Arc::new(FixedResponseBackend::new("```sql\nDROP TABLE users;\n```"));
    let engine = engine(&fixture, backend);
    let pool = fixture.pools.get(DATABASE).expect("pool should exist");
    engine.describe(
        &ScopeMapping::mapped("ana", "admin", DATABASE, "main"),
        Instant::now() + Duration::from_secs(5),
    );
    let checkouts_before = pool.checkouts();

    let error = engine
        .ask(Some("ana"), "remove the users table", None)
        .expect_err("drop must be rejected");

    match &error {
        PipelineError::Rejected { candidate, verdict } => {
            assert_eq!(candidate.as_str(), "DROP TABLE users;");
            assert_eq!(verdict.reason, Some(Gate::RetrievalOnly));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(error.code(), "query_rejected");
    assert!(error.is_rejection());

    assert_eq!(pool.checkouts(), checkouts_before);
    let history = fixture.store.recent_outcomes("ana", 10).expect("history should load");
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].candidate.as_deref(), Some("DROP TABLE users;"));
}

#[test]
fn unmapped_identity_prompt_never_names_restricted_objects() {
    let fixture = Fixture::new();
    fixture.describe("salaries", ObjectType::Table, r#"{"description":"Payroll per employee"}"#);
    fixture.describe("orders", ObjectType::Table, r#"{"description":"One row per order"}"#);
    let backend = Arc::new(FixedResponseBackend::new(
        "```sql\nSELECT count(*) AS n FROM main.orders\n```",
    ));
    let engine = engine(&fixture, backend.clone());

    let answer = engine
        .ask(Some("stranger"), "how many orders were placed", None)
        .expect("default role may read orders");
    assert!(answer.scope.is_default());
    assert_eq!(answer.result.rows[0].get("n"), Some(&json!(3)));

    let prompt = backend.last_prompt().expect("prompt should be captured");
    assert!(prompt.contains("TABLE main.orders"));
    assert!(prompt.contains("One row per order"));
    for restricted in ["salaries", "Payroll", "customers", "order_totals", "sqlscope_"] {
        assert!(!prompt.contains(restricted), "prompt leaked `{restricted}`");
    }
}

#[test]
fn cached_schema_of_another_role_never_reaches_the_prompt() {
    let fixture = Fixture::new();
    fixture.map("ana", "reader", "main", "2026-01-01T00:00:00.000Z");
    let backend = Arc::new(FixedResponseBackend::new(
        "```sql\nSELECT count(*) AS n FROM main.orders\n```",
    ));
    let engine = engine(&fixture, backend.clone());

    let analyst_view = engine.describe(
        &ScopeMapping::mapped("ana", "analyst", DATABASE, "main"),
        Instant::now() + Duration::from_secs(5),
    );
    assert!(analyst_view.get("customers").is_some());

    let answer = engine
        .ask(Some("ana"), "how many orders were placed", None)
        .expect("reader may read orders");
    assert_eq!(answer.scope.role_name, "reader");

    let prompt = backend.last_prompt().expect("prompt should be captured");
    assert!(prompt.contains("TABLE main.orders"));
    for restricted in ["customers", "order_totals"] {
        assert!(!prompt.contains(restricted), "prompt leaked `{restricted}`");
    }
}

#[test]
fn multiple_statements_are_rejected() {
    let fixture = Fixture::new();
    let backend = Arc::new(FixedResponseBackend::new(
        "```sql\nSELECT * FROM users; SELECT * FROM orders;\n```",
    ));
    let engine = engine(&fixture, backend);

    let error = engine
        .ask(None, "everything", None)
        .expect_err("two statements must be rejected");
    match error {
        PipelineError::Rejected { verdict, .. } => {
            assert_eq!(verdict.reason, Some(Gate::SingleStatement));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn response_without_a_query_is_surfaced() {
    let fixture = Fixture::new();
    let backend = Arc::new(FixedResponseBackend::new("I cannot help with that."));
    let engine = engine(&fixture, backend);

    let error = engine
        .ask(None, "tell me a joke", None)
        .expect_err("no query in the response");
    assert_eq!(error.code(), "no_query");
    assert_eq!(error.to_string(), "no usable query produced");
}

#[test]
fn role_denial_invalidates_cached_scope() {
    let fixture = Fixture::new();
    fixture.map("ana", "analyst", "main", "2026-01-01T00:00:00.000Z");
    let backend = Arc::new(ScriptedBackend::new(&[
        "```sql\nSELECT name FROM main.customers ORDER BY id\n```",
        "```sql\nSELECT amount FROM main.salaries\n```",
    ]));
    let engine = Engine::new(
        &fixture.settings,
        fixture.store.clone(),
        fixture.pools.clone(),
        backend,
    );

    let answer = engine
        .ask(Some("ana"), "list customer names", None)
        .expect("analyst may read customers");
    assert_eq!(answer.result.row_count, 2);
    assert_eq!(answer.scope.role_name, "analyst");
    assert_eq!(engine.cached_scopes(), 1);

    let error = engine
        .ask(Some("ana"), "show salaries", None)
        .expect_err("salaries is not granted");
    assert!(matches!(
        error,
        PipelineError::Execution(ExecutionError::PermissionDenied(_))
    ));
    assert!(!error.is_rejection());
    assert_eq!(engine.cached_scopes(), 0);
}

struct BrokenSink;

impl OutcomeSink for BrokenSink {
    fn append(&self, _outcome: &QueryOutcome) -> Result<()> {
        bail!("outcome table is read-only")
    }
}

#[test]
fn recorder_failure_does_not_fail_the_request() {
    let fixture = Fixture::new();
    let backend = Arc::new(FixedResponseBackend::new("```sql\nSELECT 1 AS one\n```"));
    let engine = engine(&fixture, backend).with_outcome_sink(Arc::new(BrokenSink));

    let answer = engine.ask(None, "one", None).expect("request should succeed");
    assert_eq!(answer.result.rows[0].get("one"), Some(&json!(1)));
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<QueryOutcome>>);

impl OutcomeSink for CollectingSink {
    fn append(&self, outcome: &QueryOutcome) -> Result<()> {
        self.0.lock().expect("sink lock").push(outcome.clone());
        Ok(())
    }
}

#[test]
fn invalid_requests_are_refused_and_recorded() {
    let fixture = Fixture::new();
    let backend = Arc::new(FixedResponseBackend::new("```sql\nSELECT 1\n```"));
    let sink = Arc::new(CollectingSink::default());
    let engine = engine(&fixture, backend.clone()).with_outcome_sink(sink.clone());

    let empty = engine.ask(None, "   ", None).expect_err("empty request");
    assert_eq!(empty.code(), "invalid_request");

    let long_request = "x".repeat(fixture.settings.limits.max_request_chars + 1);
    let long = engine
        .ask(None, &long_request, None)
        .expect_err("request over the limit");
    assert_eq!(long.code(), "invalid_request");
    assert!(long.is_rejection());

    assert!(backend.last_prompt().is_none());
    let recorded = sink.0.lock().expect("sink lock");
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|outcome| !outcome.success && outcome.candidate.is_none()));
}

#[test]
fn stored_language_preference_reaches_the_prompt() {
    let fixture = Fixture::new();
    fixture
        .store
        .set_preferred_language("ana", "pt-BR")
        .expect("language should store");
    let backend = Arc::new(FixedResponseBackend::new("```sql\nSELECT 1\n```"));
    let engine = engine(&fixture, backend.clone());

    let answer = engine.ask(Some("ana"), "one", None).expect("request should succeed");
    assert_eq!(answer.language, "pt-BR");
    assert!(
        backend
            .last_prompt()
            .is_some_and(|prompt| prompt.contains("in this language: pt-BR"))
    );

    let overridden = engine
        .ask(Some("ana"), "one", Some("de"))
        .expect("request should succeed");
    assert_eq!(overridden.language, "de");
}

struct SlowBackend;

impl GenerationBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    fn generate(&self, _prompt: &str, timeout: Duration) -> Result<String, GenerationError> {
        Err(GenerationError::Timeout(timeout))
    }
}

#[test]
fn generation_timeout_is_a_deadline_error() {
    let fixture = Fixture::new();
    let engine = Engine::new(
        &fixture.settings,
        fixture.store.clone(),
        fixture.pools.clone(),
        Arc::new(SlowBackend),
    )
    .with_request_timeout(Duration::from_secs(1));

    let error = engine.ask(None, "anything", None).expect_err("backend timed out");
    assert_eq!(error.code(), "deadline_exceeded");
    assert!(!error.is_rejection());
}
