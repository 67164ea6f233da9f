//! Natural-language-to-SQL generation.
//!
//! Builds a deterministic prompt from the retrieved schema context, a
//! short conversation tail, and (on repair passes) the previous failed
//! candidate plus its error, then asks the completion provider for a
//! single SELECT statement. Model output is cleaned of markdown fences;
//! an `ERROR:`-prefixed reply is surfaced as
//! [`PipelineError::GenerationRefused`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::llm::{CompletionOptions, CompletionProvider};
use crate::models::{ChatTurn, RetrievalContext, Role};
use crate::schema;

/// How many trailing conversation turns are included in the prompt.
const HISTORY_TAIL: usize = 3;

/// The failed candidate carried into a repair pass.
#[derive(Debug, Clone)]
pub struct PriorFailure {
    pub sql: String,
    pub error: String,
}

pub struct SqlGenerator {
    provider: Arc<dyn CompletionProvider>,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Produce a candidate SELECT statement for `question`.
    ///
    /// On a repair pass, `failure` carries the previous candidate and
    /// the validator's or database's error text; the prompt asks for a
    /// corrected statement instead of a fresh one.
    pub async fn generate(
        &self,
        question: &str,
        context: &RetrievalContext,
        history: &[ChatTurn],
        failure: Option<&PriorFailure>,
    ) -> Result<String, PipelineError> {
        let prompt = build_prompt(question, context, history, failure);
        debug!(chars = prompt.len(), repair = failure.is_some(), "generation prompt built");

        let raw = self
            .provider
            .complete(&prompt, &CompletionOptions::deterministic())
            .await?;

        let sql = strip_fences(&raw);

        if let Some(explanation) = sql.strip_prefix("ERROR:") {
            return Err(PipelineError::GenerationRefused {
                explanation: explanation.trim().to_string(),
            });
        }
        if sql.is_empty() {
            return Err(PipelineError::GenerationRefused {
                explanation: "empty completion".to_string(),
            });
        }

        info!(sql = %sql.chars().take(80).collect::<String>(), "candidate generated");
        Ok(sql)
    }
}

fn build_prompt(
    question: &str,
    context: &RetrievalContext,
    history: &[ChatTurn],
    failure: Option<&PriorFailure>,
) -> String {
    let schema_text = schema::format_context(context);

    let mut tail = String::new();
    if !history.is_empty() {
        tail.push_str("\nPrevious conversation:\n");
        let skip = history.len().saturating_sub(HISTORY_TAIL);
        for turn in &history[skip..] {
            let speaker = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            tail.push_str(&format!("{}: {}\n", speaker, turn.content));
        }
    }

    let mut repair = String::new();
    if let Some(f) = failure {
        repair = format!(
            "\nA previous attempt failed with error: {}\n\nFailed Query:\n{}\n\nGenerate a corrected query that fixes the error.\n",
            f.error, f.sql
        );
    }

    format!(
        "You are a SQL expert. Given a database schema, convert the natural language question into a valid SQLite SELECT query.\n\
        \n\
        IMPORTANT: You must ONLY generate SELECT queries. Do not generate INSERT, UPDATE, DELETE, DROP, or any other type of query.\n\
        \n\
        {schema_text}\n\
        {tail}{repair}\n\
        User Question: {question}\n\
        \n\
        Instructions:\n\
        1. Generate ONLY a valid SQLite SELECT query\n\
        2. Do not include any explanations, markdown formatting, or additional text\n\
        3. Use proper SQL syntax for SQLite\n\
        4. Make sure to use correct table and column names from the schema\n\
        5. Only SELECT statements are allowed - no data manipulation\n\
        6. If the question is unclear or cannot be answered with the given schema, return \"ERROR: [explanation]\"\n\
        \n\
        SQL Query:"
    )
}

/// Strip a surrounding markdown code fence, if any.
fn strip_fences(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```sql") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RetrievalContext;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_fences("  SELECT 1  "), "SELECT 1");
        assert_eq!(strip_fences("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_prompt_contains_question_and_history_tail() {
        let history = vec![
            ChatTurn::user("one"),
            ChatTurn::assistant("two"),
            ChatTurn::user("three"),
            ChatTurn::assistant("four"),
        ];
        let prompt = build_prompt(
            "how many pending orders?",
            &RetrievalContext::default(),
            &history,
            None,
        );
        assert!(prompt.contains("User Question: how many pending orders?"));
        // Only the last three turns survive.
        assert!(!prompt.contains("User: one"));
        assert!(prompt.contains("Assistant: two"));
        assert!(prompt.contains("User: three"));
        assert!(prompt.contains("Assistant: four"));
        assert!(prompt.contains("SELECT queries"));
    }

    #[test]
    fn test_repair_prompt_carries_failed_sql_and_error() {
        let failure = PriorFailure {
            sql: "SELECT nme FROM orders".to_string(),
            error: "no such column: nme".to_string(),
        };
        let prompt = build_prompt(
            "list orders",
            &RetrievalContext::default(),
            &[],
            Some(&failure),
        );
        assert!(prompt.contains("no such column: nme"));
        assert!(prompt.contains("SELECT nme FROM orders"));
        assert!(prompt.contains("corrected query"));
    }
}
