//! Natural-language synthesis of executed results.
//!
//! After a successful execution the row set is rendered into a bounded
//! text table and handed to the completion provider together with the
//! question and a short conversation tail. Synthesis is best-effort:
//! the rows are already in hand, so a provider failure degrades to a
//! row-count answer instead of an infrastructure error.

use std::sync::Arc;

use tracing::warn;

use crate::llm::{CompletionOptions, CompletionProvider};
use crate::models::{ChatTurn, Role, RowSet};

/// Rows included in the synthesis prompt; anything beyond is summarized
/// as a count.
const MAX_PROMPT_ROWS: usize = 20;

/// Conversation turns included in the synthesis prompt.
const HISTORY_TAIL: usize = 5;

pub struct AnswerSynthesizer {
    provider: Arc<dyn CompletionProvider>,
}

impl AnswerSynthesizer {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Turn executed rows into a conversational answer.
    pub async fn synthesize(
        &self,
        question: &str,
        sql: &str,
        rows: &RowSet,
        history: &[ChatTurn],
    ) -> String {
        let prompt = build_prompt(question, sql, rows, history);
        let options = CompletionOptions {
            temperature: 0.7,
            max_tokens: 512,
        };

        match self.provider.complete(&prompt, &options).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => fallback_answer(rows),
            Err(err) => {
                warn!(error = %err, "synthesis failed, degrading to row count");
                fallback_answer(rows)
            }
        }
    }
}

pub fn fallback_answer(rows: &RowSet) -> String {
    if rows.rows.is_empty() {
        "The query executed successfully but returned no results.".to_string()
    } else {
        format!("I found {} result(s) for your query.", rows.rows.len())
    }
}

fn build_prompt(question: &str, sql: &str, rows: &RowSet, history: &[ChatTurn]) -> String {
    let mut tail = String::new();
    if !history.is_empty() {
        tail.push_str("\nPrevious conversation:\n");
        let skip = history.len().saturating_sub(HISTORY_TAIL);
        for turn in &history[skip..] {
            match turn.role {
                Role::User => tail.push_str(&format!("User: {}\n", turn.content)),
                Role::Assistant => tail.push_str(&format!("Assistant: {}\n", turn.content)),
            }
        }
    }

    let results_text = if rows.rows.is_empty() {
        "\nThe query returned no results.\n".to_string()
    } else {
        format!("\nQuery Results:\n{}\n", render_rows(rows))
    };

    format!(
        "You are a helpful database assistant. A user asked a question, and we executed a database query to get the answer.\n\
        \n\
        User Question: {question}\n\
        \n\
        SQL Query executed: {sql}\n\
        {results_text}{tail}\n\
        Your task:\n\
        1. Answer the user's question in a natural, conversational way\n\
        2. Use the query results to provide specific information\n\
        3. If there are no results, explain that clearly\n\
        4. Be concise but informative\n\
        5. If numbers or statistics are involved, highlight them\n\
        6. Do not mention SQL queries or technical details unless the user specifically asked about them\n\
        \n\
        Provide a clear, helpful answer to the user's question:"
    )
}

/// Render rows as an aligned text table, bounded to [`MAX_PROMPT_ROWS`].
pub fn render_rows(rows: &RowSet) -> String {
    let shown = rows.rows.len().min(MAX_PROMPT_ROWS);

    let cell = |v: &serde_json::Value| -> String {
        match v {
            serde_json::Value::Null => "NULL".to_string(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    };

    let mut widths: Vec<usize> = rows.columns.iter().map(|c| c.len()).collect();
    for row in rows.rows.iter().take(shown) {
        for (i, v) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell(v).len());
            }
        }
    }

    let mut out = String::new();
    let header: Vec<String> = rows
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{:width$}", c, width = widths[i]))
        .collect();
    out.push_str(&header.join("  "));
    out.push('\n');

    for row in rows.rows.iter().take(shown) {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell(v), width = w)
            })
            .collect();
        out.push_str(&line.join("  "));
        out.push('\n');
    }

    if rows.rows.len() > shown {
        out.push_str(&format!(
            "... (showing {} of {} total rows)\n",
            shown,
            rows.rows.len()
        ));
    }
    out
}
