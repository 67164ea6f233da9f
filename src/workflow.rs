//! The turn orchestrator: a finite-state machine from question to answer.
//!
//! One user turn walks Classify → Retrieve → Generate → Validate →
//! Execute → Synthesize → Respond, with a bounded repair loop feeding
//! failed candidates (and their errors) back into generation. A single
//! `retry_count` is shared between validation and execution repairs so
//! the total number of passes per turn is deterministic.
//!
//! [`Orchestrator::run`] is the turn's sole error boundary: every
//! failure mode terminates in a user-legible answer, nothing panics or
//! propagates past it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::answer::{self, AnswerSynthesizer};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::executor::QueryExecutor;
use crate::extract;
use crate::generator::{PriorFailure, SqlGenerator};
use crate::graph::MetadataGraph;
use crate::guardrail;
use crate::llm::{CompletionOptions, CompletionProvider};
use crate::models::{Annotation, ChatTurn, RetrievalContext, RowSet, SchemaSnapshot};
use crate::schema;

/// Routing decision for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Greeting,
    General,
    Annotation,
    Sql,
}

/// What a turn produced, beyond the answer text.
#[derive(Debug)]
pub struct TurnOutcome {
    pub answer: String,
    pub sql: Option<String>,
    pub rows: Option<RowSet>,
    pub classification: Classification,
}

impl TurnOutcome {
    fn plain(answer: impl Into<String>, classification: Classification) -> Self {
        Self {
            answer: answer.into(),
            sql: None,
            rows: None,
            classification,
        }
    }
}

const GREETING_ANSWER: &str =
    "Hello! I'm your database assistant. How can I help you query your database today?";
const GENERAL_ANSWER: &str = "I can help you query your database. Ask me questions like \
    'Show me all products' or 'How many orders are there?'";

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "greetings"];
const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening"];
const QUERY_WORDS: &[&str] = &[
    "show", "list", "display", "find", "get", "count", "how many", "what are", "which", "select",
];

pub struct Orchestrator {
    graph: Arc<dyn MetadataGraph>,
    provider: Arc<dyn CompletionProvider>,
    executor: Arc<dyn QueryExecutor>,
    generator: SqlGenerator,
    synthesizer: AnswerSynthesizer,
    snapshot: Option<SchemaSnapshot>,
    database_name: String,
    max_repairs: u32,
    max_context_tables: usize,
    stage_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        graph: Arc<dyn MetadataGraph>,
        provider: Arc<dyn CompletionProvider>,
        executor: Arc<dyn QueryExecutor>,
        snapshot: Option<SchemaSnapshot>,
        database_name: impl Into<String>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            graph,
            generator: SqlGenerator::new(provider.clone()),
            synthesizer: AnswerSynthesizer::new(provider.clone()),
            provider,
            executor,
            snapshot,
            database_name: database_name.into(),
            max_repairs: config.max_repairs,
            max_context_tables: config.max_context_tables,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        }
    }

    /// Resolve one user turn. Never returns an error: every failure
    /// terminates in an answer.
    pub async fn run(&self, question: &str, history: &[ChatTurn]) -> TurnOutcome {
        let question = question.trim();
        if question.is_empty() {
            return TurnOutcome::plain(GENERAL_ANSWER, Classification::General);
        }

        // Annotation statements bypass the query pipeline entirely.
        if extract::looks_like_annotation(question) {
            if let Some(candidate) = extract::extract(question) {
                return self.store_annotation(candidate).await;
            }
        }

        let classification = self.classify(question, history).await;
        info!(?classification, "turn classified");

        match classification {
            Classification::Greeting => TurnOutcome::plain(GREETING_ANSWER, Classification::Greeting),
            Classification::General | Classification::Annotation => {
                TurnOutcome::plain(GENERAL_ANSWER, Classification::General)
            }
            Classification::Sql => self.resolve_query(question, history).await,
        }
    }

    /// CLASSIFY: greeting fast-path, then a YES/NO completion, then a
    /// keyword heuristic when the provider is unavailable. Single-shot;
    /// ambiguity defaults to a general answer rather than a retry.
    async fn classify(&self, question: &str, _history: &[ChatTurn]) -> Classification {
        let lower = question.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.iter().any(|w| GREETING_WORDS.contains(w))
            || GREETING_PHRASES.iter().any(|p| lower.contains(p))
        {
            return Classification::Greeting;
        }

        let prompt = self.classification_prompt(question);
        let options = CompletionOptions {
            temperature: 0.1,
            max_tokens: 10,
        };
        match self.with_deadline(self.provider.complete(&prompt, &options)).await {
            Ok(reply) => {
                if reply.to_uppercase().contains("YES") {
                    Classification::Sql
                } else {
                    Classification::General
                }
            }
            Err(err) => {
                debug!(error = %err, "classifier unavailable, using keyword heuristic");
                if QUERY_WORDS.iter().any(|k| lower.contains(k)) {
                    Classification::Sql
                } else {
                    Classification::General
                }
            }
        }
    }

    fn classification_prompt(&self, question: &str) -> String {
        let mut table_list = String::new();
        if let Some(snapshot) = &self.snapshot {
            if !snapshot.tables.is_empty() {
                table_list.push_str("\nAvailable database tables:\n");
                for table in snapshot.tables.iter().take(10) {
                    table_list.push_str(&format!("- {}\n", table.name));
                }
            }
        }
        format!(
            "You are a database assistant. A user has asked a question. Determine if this question requires querying a database to answer.\n\
            \n\
            User Question: {question}\n\
            {table_list}\n\
            Answer with ONLY one word: \"YES\" or \"NO\"\n\
            \n\
            - Answer \"YES\" if the question asks about data in the database (e.g., \"show products\", \"how many orders\", \"list customers\")\n\
            - Answer \"NO\" if it's a greeting (e.g., \"hello\", \"hi\"), general question about the system (e.g., \"what can you do\", \"help\"), or doesn't require database access\n\
            \n\
            Your answer (YES or NO):"
        )
    }

    /// RETRIEVE through RESPOND for a SQL-intent question.
    async fn resolve_query(&self, question: &str, history: &[ChatTurn]) -> TurnOutcome {
        // Retrieval never blocks the pipeline: failures degrade to an
        // empty context.
        let keywords = schema::extract_keywords(question);
        let context = match self
            .graph
            .retrieve_context(&keywords, self.max_context_tables)
            .await
        {
            Ok(context) => context,
            Err(err) => {
                warn!(error = %err, "context retrieval failed, proceeding without schema");
                RetrievalContext::default()
            }
        };
        debug!(tables = context.tables.len(), "context retrieved");

        let mut retry_count: u32 = 0;
        let mut failure: Option<PriorFailure> = None;

        loop {
            // GENERATE
            let sql = match self
                .with_deadline(self.generator.generate(question, &context, history, failure.as_ref()))
                .await
            {
                Ok(sql) => sql,
                Err(PipelineError::GenerationRefused { explanation }) => {
                    debug!(%explanation, "generator refused");
                    return TurnOutcome::plain(
                        "I couldn't generate a SQL query for your question. Please try rephrasing it.",
                        Classification::Sql,
                    );
                }
                Err(err) => return self.infrastructure_answer(err),
            };

            // VALIDATE
            let report = match guardrail::validate(&sql, self.snapshot.as_ref()) {
                Ok(report) => report,
                Err(PipelineError::ValidationRejected { reason }) => {
                    if retry_count < self.max_repairs {
                        retry_count += 1;
                        info!(retry_count, %reason, "validation rejected, repairing");
                        failure = Some(PriorFailure {
                            sql,
                            error: reason,
                        });
                        continue;
                    }
                    return TurnOutcome::plain(
                        format!(
                            "SQL validation failed after {} attempts: {}",
                            self.max_repairs, reason
                        ),
                        Classification::Sql,
                    );
                }
                Err(err) => return self.infrastructure_answer(err),
            };

            // EXECUTE
            match self.with_deadline(self.executor.execute(&sql)).await {
                Ok(rows) => {
                    // SYNTHESIZE: degrades internally, never fails the turn.
                    let answer = match tokio::time::timeout(
                        self.stage_timeout,
                        self.synthesizer.synthesize(question, &sql, &rows, history),
                    )
                    .await
                    {
                        Ok(answer) => answer,
                        Err(_) => answer::fallback_answer(&rows),
                    };
                    return TurnOutcome {
                        answer,
                        sql: Some(sql),
                        rows: Some(rows),
                        classification: Classification::Sql,
                    };
                }
                Err(PipelineError::ExecutionFailed { message }) => {
                    if retry_count < self.max_repairs {
                        retry_count += 1;
                        info!(retry_count, %message, "execution failed, repairing");
                        // Fold validator warnings into the repair prompt.
                        let mut error = message;
                        for w in &report.warnings {
                            error.push_str("; ");
                            error.push_str(w);
                        }
                        failure = Some(PriorFailure { sql, error });
                        continue;
                    }
                    return TurnOutcome::plain(
                        format!(
                            "Query execution failed after {} attempts. Error: {}",
                            self.max_repairs, message
                        ),
                        Classification::Sql,
                    );
                }
                Err(err) => return self.infrastructure_answer(err),
            }
        }
    }

    async fn store_annotation(&self, candidate: extract::AnnotationCandidate) -> TurnOutcome {
        let entity_desc = match (&candidate.entity, &candidate.parent_table) {
            (crate::models::EntityKind::Column, Some(table)) => {
                format!("column '{}' in table '{}'", candidate.entity_name, table)
            }
            (kind, _) if candidate.entity_name.is_empty() => {
                format!("{} '{}'", kind.as_str(), self.database_name)
            }
            (kind, _) => format!("{} '{}'", kind.as_str(), candidate.entity_name),
        };

        let entity_name = if candidate.entity_name.is_empty() {
            self.database_name.clone()
        } else {
            candidate.entity_name
        };
        let annotation = Annotation::new(
            candidate.entity,
            entity_name,
            candidate.parent_table,
            candidate.content.clone(),
        );

        match self.graph.store_annotation(annotation).await {
            Ok(()) => TurnOutcome::plain(
                format!("Annotation saved for {}: {}", entity_desc, candidate.content),
                Classification::Annotation,
            ),
            Err(err) => {
                let message = match err.downcast_ref::<PipelineError>() {
                    Some(PipelineError::EntityNotFound { entity }) => format!(
                        "I couldn't save that annotation: I don't know any {} called '{}'.",
                        candidate.entity.as_str(),
                        entity
                    ),
                    _ => format!("Failed to save annotation: {}", err),
                };
                warn!(error = %err, "annotation rejected");
                TurnOutcome::plain(message, Classification::Annotation)
            }
        }
    }

    fn infrastructure_answer(&self, err: PipelineError) -> TurnOutcome {
        warn!(error = %err, "turn aborted on infrastructure failure");
        TurnOutcome::plain(
            "I'm having trouble reaching a backing service right now. Please try again in a moment.",
            Classification::Sql,
        )
    }

    /// Wrap a collaborator call in the per-stage deadline. A timeout is
    /// an infrastructure failure, never a repair case.
    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(self.stage_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::unavailable(
                "collaborator call exceeded deadline",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_words_match_whole_words_only() {
        // "shipments" contains "hi" as a substring; the classifier must
        // not treat it as a greeting.
        let lower = "show shipments".to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        assert!(!words.iter().any(|w| GREETING_WORDS.contains(w)));

        let lower = "hey there".to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        assert!(words.iter().any(|w| GREETING_WORDS.contains(w)));
    }
}
