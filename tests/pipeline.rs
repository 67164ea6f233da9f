//! End-to-end orchestrator tests with scripted collaborators.
//!
//! The completion provider and executor are scripted mocks so every
//! transition of the turn state machine can be observed: which prompts
//! were sent, which statements reached the executor, and how the
//! bounded repair loop terminates.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dbchat::config::PipelineConfig;
use dbchat::error::PipelineError;
use dbchat::executor::QueryExecutor;
use dbchat::graph::MetadataGraph;
use dbchat::graph_memory::InMemoryGraph;
use dbchat::llm::{CompletionOptions, CompletionProvider};
use dbchat::models::{Column, RowSet, SchemaSnapshot, Table};
use dbchat::workflow::{Classification, Orchestrator};

/// Provider that pops scripted replies in order and records every
/// prompt it was sent.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, PipelineError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::unavailable("script exhausted"))
    }
}

/// Provider that pops scripted replies until the script runs out, then
/// stalls far past any stage deadline.
struct StallingProvider {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl StallingProvider {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for StallingProvider {
    fn model_name(&self) -> &str {
        "stalling"
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, PipelineError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(reply) => Ok(reply),
            None => {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                Err(PipelineError::unavailable("stalled"))
            }
        }
    }
}

/// Executor that pops scripted results and records every statement.
struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<RowSet, PipelineError>>>,
    statements: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(results: Vec<Result<RowSet, PipelineError>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            statements: Mutex::new(Vec::new()),
        })
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> Result<RowSet, PipelineError> {
        self.statements.lock().unwrap().push(sql.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PipelineError::unavailable("no scripted result")))
    }
}

fn snapshot() -> SchemaSnapshot {
    let column = |name: &str, ty: &str| Column {
        name: name.to_string(),
        data_type: ty.to_string(),
        nullable: true,
        default: None,
        description: None,
    };
    SchemaSnapshot {
        database: "shop".to_string(),
        tables: vec![
            Table {
                name: "orders".to_string(),
                description: Some("customer orders".to_string()),
                columns: vec![column("id", "integer"), column("status", "text")],
                primary_keys: vec!["id".to_string()],
                foreign_keys: vec![],
            },
            Table {
                name: "products".to_string(),
                description: None,
                columns: vec![column("id", "integer"), column("name", "text")],
                primary_keys: vec!["id".to_string()],
                foreign_keys: vec![],
            },
        ],
    }
}

async fn graph() -> Arc<InMemoryGraph> {
    let graph = Arc::new(InMemoryGraph::new());
    graph.build_graph(&snapshot()).await.unwrap();
    graph
}

fn config(max_repairs: u32) -> PipelineConfig {
    PipelineConfig {
        max_repairs,
        max_context_tables: 10,
        stage_timeout_secs: 5,
        max_result_rows: 1000,
    }
}

fn sample_rows() -> RowSet {
    RowSet {
        columns: vec!["count".to_string()],
        rows: vec![vec![serde_json::json!(5)]],
    }
}

async fn orchestrator(
    provider: Arc<ScriptedProvider>,
    executor: Arc<ScriptedExecutor>,
    max_repairs: u32,
) -> Orchestrator {
    Orchestrator::new(
        graph().await,
        provider,
        executor,
        Some(snapshot()),
        "shop",
        &config(max_repairs),
    )
}

#[tokio::test]
async fn greeting_short_circuits_the_pipeline() {
    let provider = ScriptedProvider::new(&[]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("hello there", &[]).await;

    assert_eq!(outcome.classification, Classification::Greeting);
    assert!(outcome.answer.contains("database assistant"));
    assert!(outcome.sql.is_none());
    // No collaborator was touched.
    assert!(provider.prompts().is_empty());
    assert!(executor.statements().is_empty());
}

#[tokio::test]
async fn happy_path_generates_validates_executes_synthesizes() {
    let provider = ScriptedProvider::new(&[
        "YES",
        "SELECT COUNT(*) FROM orders WHERE status = 'pending'",
        "You have 5 pending orders.",
    ]);
    let executor = ScriptedExecutor::new(vec![Ok(sample_rows())]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("how many pending orders are there?", &[]).await;

    assert_eq!(outcome.classification, Classification::Sql);
    assert_eq!(outcome.answer, "You have 5 pending orders.");
    assert_eq!(
        outcome.sql.as_deref(),
        Some("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
    );
    assert_eq!(outcome.rows.unwrap().rows.len(), 1);

    let statements = executor.statements();
    assert_eq!(statements.len(), 1);

    // Prompt 0: classification. Prompt 1: generation with retrieved
    // schema context. Prompt 2: synthesis with the rows.
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("YES"));
    assert!(prompts[1].contains("Table: orders"));
    assert!(prompts[2].contains("Query Results:"));
}

#[tokio::test]
async fn rejected_candidate_is_repaired_and_revalidated() {
    let provider = ScriptedProvider::new(&[
        "YES",
        "DELETE FROM orders",
        "SELECT * FROM orders WHERE status = 'pending'",
        "Two orders are pending.",
    ]);
    let executor = ScriptedExecutor::new(vec![Ok(sample_rows())]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("show pending orders", &[]).await;

    assert_eq!(outcome.answer, "Two orders are pending.");

    // The repair prompt carries the rejected SQL and the reason.
    let prompts = provider.prompts();
    assert!(prompts[2].contains("DELETE FROM orders"));
    assert!(prompts[2].contains("Only SELECT queries are allowed"));

    // The rejected statement never reached the executor.
    assert_eq!(
        executor.statements(),
        vec!["SELECT * FROM orders WHERE status = 'pending'".to_string()]
    );
}

#[tokio::test]
async fn validation_ceiling_terminates_with_message() {
    let provider = ScriptedProvider::new(&["YES", "DELETE FROM orders", "DROP TABLE orders"]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 1).await;

    let outcome = orch.run("show pending orders", &[]).await;

    assert!(outcome.answer.contains("SQL validation failed after 1 attempts"));
    assert!(outcome.sql.is_none());
    assert!(executor.statements().is_empty());
}

#[tokio::test]
async fn execution_failure_feeds_error_back_into_generation() {
    let provider = ScriptedProvider::new(&[
        "YES",
        "SELECT stats FROM orders",
        "SELECT status FROM orders",
        "All orders are pending.",
    ]);
    let executor = ScriptedExecutor::new(vec![
        Err(PipelineError::ExecutionFailed {
            message: "no such column: stats".to_string(),
        }),
        Ok(sample_rows()),
    ]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("what status are the orders in?", &[]).await;

    assert_eq!(outcome.answer, "All orders are pending.");
    assert_eq!(outcome.sql.as_deref(), Some("SELECT status FROM orders"));

    let prompts = provider.prompts();
    assert!(prompts[2].contains("no such column: stats"));
    assert!(prompts[2].contains("SELECT stats FROM orders"));

    assert_eq!(executor.statements().len(), 2);
}

#[tokio::test]
async fn execution_ceiling_bounds_total_attempts() {
    let provider = ScriptedProvider::new(&["YES", "SELECT 1", "SELECT 2", "SELECT 3"]);
    let failure = || {
        Err(PipelineError::ExecutionFailed {
            message: "disk image is malformed".to_string(),
        })
    };
    let executor = ScriptedExecutor::new(vec![failure(), failure(), failure()]);
    let orch = orchestrator(provider.clone(), executor.clone(), 2).await;

    let outcome = orch.run("count the orders", &[]).await;

    // Initial attempt plus exactly two repairs.
    assert_eq!(executor.statements().len(), 3);
    assert!(outcome
        .answer
        .contains("Query execution failed after 2 attempts"));
    assert!(outcome.answer.contains("disk image is malformed"));
}

#[tokio::test]
async fn provider_outage_is_fatal_not_retried() {
    let provider = ScriptedProvider::new(&["YES"]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    // The script is exhausted after classification, so generation hits
    // an unavailable provider.
    let outcome = orch.run("show all products", &[]).await;

    assert!(outcome.answer.contains("backing service"));
    assert!(outcome.sql.is_none());
    assert!(executor.statements().is_empty());
    // Exactly two prompts: classification and the single generation
    // attempt. No repair passes for infrastructure failures.
    assert_eq!(provider.prompts().len(), 2);
}

#[tokio::test]
async fn stalled_collaborator_hits_the_stage_deadline() {
    // Classification answers instantly; the generation call then hangs
    // far past the one-second stage deadline.
    let provider = StallingProvider::new(&["YES"]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = Orchestrator::new(
        graph().await,
        provider.clone(),
        executor.clone(),
        Some(snapshot()),
        "shop",
        &PipelineConfig {
            max_repairs: 3,
            max_context_tables: 10,
            stage_timeout_secs: 1,
            max_result_rows: 1000,
        },
    );

    let outcome = orch.run("how many orders are there?", &[]).await;

    assert!(outcome.answer.contains("backing service"));
    assert!(outcome.sql.is_none());
    // Exactly two prompts: classification and the single stalled
    // generation attempt. A deadline hit is fatal to the turn and is
    // never retried as a repair.
    assert_eq!(provider.prompts().len(), 2);
    assert!(executor.statements().is_empty());
}

#[tokio::test]
async fn classifier_outage_falls_back_to_keyword_heuristic() {
    // Empty script: every completion fails.
    let provider = ScriptedProvider::new(&[]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("tell me about yourself", &[]).await;
    assert_eq!(outcome.classification, Classification::General);

    let outcome = orch.run("how many orders are there?", &[]).await;
    // Keyword heuristic routes to SQL; generation then fails fatally.
    assert!(outcome.answer.contains("backing service"));
}

#[tokio::test]
async fn annotation_statement_is_stored_and_acknowledged() {
    let provider = ScriptedProvider::new(&[]);
    let executor = ScriptedExecutor::new(vec![]);
    let graph = graph().await;
    let orch = Orchestrator::new(
        graph.clone(),
        provider.clone(),
        executor.clone(),
        Some(snapshot()),
        "shop",
        &config(3),
    );

    let outcome = orch
        .run("The orders table contains customer purchase records", &[])
        .await;

    assert_eq!(outcome.classification, Classification::Annotation);
    assert!(outcome.answer.contains("Annotation saved"));
    assert!(provider.prompts().is_empty());

    let stored = graph.annotations().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].entity_name, "orders");
    assert_eq!(stored[0].content, "customer purchase records");
}

#[tokio::test]
async fn annotation_for_unknown_table_is_rejected() {
    let provider = ScriptedProvider::new(&[]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch
        .run("The invoices table stores billing records", &[])
        .await;

    assert_eq!(outcome.classification, Classification::Annotation);
    assert!(outcome.answer.contains("couldn't save that annotation"));
    assert!(outcome.answer.contains("invoices"));
}

#[tokio::test]
async fn dml_question_never_reaches_the_executor() {
    // Even when the model persistently produces writes, the executor
    // sees nothing.
    let provider = ScriptedProvider::new(&[
        "YES",
        "DROP TABLE orders",
        "DELETE FROM orders",
        "TRUNCATE TABLE orders",
        "UPDATE orders SET status = 'x'",
    ]);
    let executor = ScriptedExecutor::new(vec![]);
    let orch = orchestrator(provider.clone(), executor.clone(), 3).await;

    let outcome = orch.run("delete all my orders please", &[]).await;

    assert!(outcome.answer.contains("SQL validation failed"));
    assert!(executor.statements().is_empty());
}
