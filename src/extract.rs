//! Heuristic extraction of schema annotations from chat messages.
//!
//! Users teach the assistant about their schema in plain language
//! ("the orders table stores customer purchases"). This module detects
//! those statements and pulls out the entity they describe, without an
//! LLM round-trip. Matching happens on a lowercased token stream;
//! the stored content keeps the user's original casing.

use crate::models::EntityKind;

/// Verbs that introduce a table or database description.
const DESCRIBE_VERBS: &[&str] = &[
    "contains", "stores", "has", "is", "represents", "describes", "means",
];

/// Verbs accepted in the column patterns.
const COLUMN_VERBS: &[&str] = &["stores", "contains", "is", "represents"];

/// An annotation recognized in a chat message, before it is resolved
/// against the metadata graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationCandidate {
    pub entity: EntityKind,
    /// Lowercased identifier. Empty for database-level annotations,
    /// where the caller supplies the configured database name.
    pub entity_name: String,
    pub parent_table: Option<String>,
    /// The descriptive text, original casing preserved.
    pub content: String,
}

/// Cheap pre-filter: does this message read like a schema statement
/// rather than a query? Used to decide whether [`extract`] is worth
/// running before the classifier sees the message.
pub fn looks_like_annotation(message: &str) -> bool {
    let lower = message.to_lowercase();

    let annotation_markers = [
        "the table",
        "the column",
        "the database",
        "this table",
        "this column",
        "this database",
        "table contains",
        "table stores",
        "table represents",
        "table is",
        "column stores",
        "column contains",
        "column is",
        "database stores",
        "database contains",
    ];
    let query_markers = [
        "show", "list", "find", "get", "count", "how many", "what", "which", "select",
    ];

    let has_marker = annotation_markers.iter().any(|m| lower.contains(m));
    let is_query = query_markers.iter().any(|m| lower.contains(m));
    has_marker && !is_query
}

/// A whitespace-delimited word together with its byte offset in the
/// source message, so content can be sliced with casing intact.
struct Word {
    lower: String,
    start: usize,
}

fn tokenize(message: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut offset = 0;
    for raw in message.split_whitespace() {
        let start = message[offset..]
            .find(raw)
            .map(|i| offset + i)
            .unwrap_or(offset);
        offset = start + raw.len();
        words.push(Word {
            lower: raw.to_lowercase(),
            start,
        });
    }
    words
}

/// An identifier word with surrounding quotes and trailing punctuation
/// stripped, or None if what remains is not a bare identifier.
fn identifier(word: &Word) -> Option<String> {
    let trimmed = word
        .lower
        .trim_matches(|c: char| c == '\'' || c == '"' || c == ',' || c == '.' || c == '`');
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_alphanumeric() || c == '_') {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Like [`identifier`] but expecting exactly one interior dot,
/// splitting `table.column`.
fn dotted_identifier(word: &Word) -> Option<(String, String)> {
    let trimmed = word
        .lower
        .trim_matches(|c: char| c == '\'' || c == '"' || c == ',' || c == '`');
    let (table, column) = trimmed.split_once('.')?;
    if table.is_empty()
        || column.is_empty()
        || column.contains('.')
        || !table.chars().all(|c| c.is_alphanumeric() || c == '_')
        || !column.chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((table.to_string(), column.to_string()))
}

/// Recognize an annotation statement in `message`.
///
/// Patterns, tried in order at every token position:
///   1. `the <table>.<column> column <verb> <content>`
///   2. `the <column> column in|of|for [the] <table> table <verb> <content>`
///   3. `the <table> table <verb> <content>`
///   4. `the database <verb> <content>`
///
/// Column patterns are tried before the table pattern so that
/// "the status column in the orders table stores ..." binds to the
/// column rather than to the table mentioned inside it.
pub fn extract(message: &str) -> Option<AnnotationCandidate> {
    let words = tokenize(message);

    for start in 0..words.len() {
        if words[start].lower != "the" && words[start].lower != "this" {
            continue;
        }

        if let Some(candidate) = match_dotted_column(message, &words, start)
            .or_else(|| match_column_in_table(message, &words, start))
            .or_else(|| match_table(message, &words, start))
            .or_else(|| match_database(message, &words, start))
        {
            return Some(candidate);
        }
    }
    None
}

fn content_from(message: &str, words: &[Word], index: usize) -> Option<String> {
    let word = words.get(index)?;
    Some(message[word.start..].trim().to_string())
}

fn match_dotted_column(
    message: &str,
    words: &[Word],
    start: usize,
) -> Option<AnnotationCandidate> {
    let (table, column) = dotted_identifier(words.get(start + 1)?)?;
    if words.get(start + 2)?.lower != "column" {
        return None;
    }
    if !COLUMN_VERBS.contains(&words.get(start + 3)?.lower.as_str()) {
        return None;
    }
    Some(AnnotationCandidate {
        entity: EntityKind::Column,
        entity_name: column,
        parent_table: Some(table),
        content: content_from(message, words, start + 4)?,
    })
}

fn match_column_in_table(
    message: &str,
    words: &[Word],
    start: usize,
) -> Option<AnnotationCandidate> {
    let column = identifier(words.get(start + 1)?)?;
    if words.get(start + 2)?.lower != "column" {
        return None;
    }
    if !matches!(words.get(start + 3)?.lower.as_str(), "in" | "of" | "for") {
        return None;
    }
    // Optional article before the table name.
    let mut i = start + 4;
    if matches!(words.get(i)?.lower.as_str(), "the" | "this") {
        i += 1;
    }
    let table = identifier(words.get(i)?)?;
    if words.get(i + 1)?.lower != "table" {
        return None;
    }
    if !COLUMN_VERBS.contains(&words.get(i + 2)?.lower.as_str()) {
        return None;
    }
    Some(AnnotationCandidate {
        entity: EntityKind::Column,
        entity_name: column,
        parent_table: Some(table),
        content: content_from(message, words, i + 3)?,
    })
}

fn match_table(message: &str, words: &[Word], start: usize) -> Option<AnnotationCandidate> {
    let table = identifier(words.get(start + 1)?)?;
    if words.get(start + 2)?.lower != "table" {
        return None;
    }
    if !DESCRIBE_VERBS.contains(&words.get(start + 3)?.lower.as_str()) {
        return None;
    }
    Some(AnnotationCandidate {
        entity: EntityKind::Table,
        entity_name: table,
        parent_table: None,
        content: content_from(message, words, start + 4)?,
    })
}

fn match_database(message: &str, words: &[Word], start: usize) -> Option<AnnotationCandidate> {
    if words.get(start + 1)?.lower != "database" {
        return None;
    }
    if !DESCRIBE_VERBS.contains(&words.get(start + 2)?.lower.as_str()) {
        return None;
    }
    Some(AnnotationCandidate {
        entity: EntityKind::Database,
        entity_name: String::new(),
        parent_table: None,
        content: content_from(message, words, start + 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_annotation() {
        let c = extract("The orders table stores all customer purchases").unwrap();
        assert_eq!(c.entity, EntityKind::Table);
        assert_eq!(c.entity_name, "orders");
        assert_eq!(c.parent_table, None);
        assert_eq!(c.content, "all customer purchases");
    }

    #[test]
    fn test_quoted_table_name() {
        let c = extract("the 'orders' table contains completed sales").unwrap();
        assert_eq!(c.entity_name, "orders");
        assert_eq!(c.content, "completed sales");
    }

    #[test]
    fn test_dotted_column_annotation() {
        let c = extract("The orders.status column stores Pending or Shipped").unwrap();
        assert_eq!(c.entity, EntityKind::Column);
        assert_eq!(c.entity_name, "status");
        assert_eq!(c.parent_table.as_deref(), Some("orders"));
        // Original casing survives.
        assert_eq!(c.content, "Pending or Shipped");
    }

    #[test]
    fn test_column_in_table_annotation() {
        let c = extract("the status column in the orders table stores workflow codes").unwrap();
        assert_eq!(c.entity, EntityKind::Column);
        assert_eq!(c.entity_name, "status");
        assert_eq!(c.parent_table.as_deref(), Some("orders"));
        assert_eq!(c.content, "workflow codes");
    }

    #[test]
    fn test_column_wins_over_embedded_table_mention() {
        // "the orders table stores" appears inside, but the statement
        // is about the column.
        let c = extract("the status column of orders table is an enum").unwrap();
        assert_eq!(c.entity, EntityKind::Column);
        assert_eq!(c.entity_name, "status");
    }

    #[test]
    fn test_database_annotation() {
        let c = extract("The database stores e-commerce data for the EU region").unwrap();
        assert_eq!(c.entity, EntityKind::Database);
        assert!(c.entity_name.is_empty());
        assert_eq!(c.content, "e-commerce data for the EU region");
    }

    #[test]
    fn test_query_is_not_extracted() {
        assert_eq!(extract("show me all pending orders"), None);
        assert_eq!(extract("how many products are in stock?"), None);
    }

    #[test]
    fn test_missing_content_is_rejected() {
        assert_eq!(extract("the orders table stores"), None);
    }

    #[test]
    fn test_looks_like_annotation_filter() {
        assert!(looks_like_annotation("the orders table stores purchases"));
        assert!(!looks_like_annotation("show me what the orders table stores"));
        assert!(!looks_like_annotation("hello there"));
    }
}
