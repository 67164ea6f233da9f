//! Static validation of candidate SQL before it can reach the executor.
//!
//! The validator is pure and deterministic: no parsing round-trip
//! through the database, no network. Rules are applied in order and the
//! first violation is the reported reason. The policy errs toward
//! rejection: a false positive costs one repair pass, a false negative
//! would let a write statement through.

use tracing::debug;

use crate::error::PipelineError;
use crate::models::SchemaSnapshot;

/// Keywords that must not appear anywhere in a candidate statement.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "CALL",
];

/// The verdict for an accepted statement. Warnings are advisory only;
/// they are folded into the next repair prompt if execution fails, but
/// never affect the verdict itself.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

/// Validate a candidate statement against the read-only policy.
///
/// Rules, in order (first violation wins):
/// 1. the leading keyword must be `SELECT`, or `WITH` introducing a
///    CTE that terminates in a `SELECT`; forbidden DML/DDL keywords
///    anywhere in the statement reject it;
/// 2. exactly one statement — a second `;`-separated clause rejects;
/// 3. injection signatures: comment truncation markers, chained
///    `UNION ... SELECT` result sets, always-true tautologies,
///    `xp_`/`sp_` procedure prefixes, hex literals;
/// 4. best-effort identifier cross-check against the schema, emitting
///    warnings only.
pub fn validate(
    sql: &str,
    schema: Option<&SchemaSnapshot>,
) -> Result<ValidationReport, PipelineError> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(reject("Empty SQL query"));
    }

    let words = keyword_tokens(trimmed);

    // Rule 1: read-only leading keyword.
    match words.first().map(String::as_str) {
        Some("SELECT") => {}
        Some("WITH") => {
            if !words.iter().any(|w| w == "SELECT") {
                return Err(reject("WITH clause must terminate in a SELECT query"));
            }
        }
        Some(other) => {
            return Err(reject(format!(
                "Only SELECT queries are allowed. Found: {}",
                other
            )));
        }
        None => return Err(reject("Empty SQL query")),
    }

    for keyword in FORBIDDEN_KEYWORDS {
        if words.iter().any(|w| w == keyword) {
            return Err(reject(format!(
                "Forbidden operation: {} statements are not allowed. Only SELECT queries are permitted.",
                keyword
            )));
        }
    }

    // Rule 2: single statement. One trailing semicolon is tolerated.
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if body.contains(';') {
        return Err(reject(
            "Multiple SQL statements are not allowed. Only single SELECT queries are permitted.",
        ));
    }

    // Rule 3: injection signatures.
    if let Some(signature) = injection_signature(trimmed) {
        return Err(reject(format!(
            "Security violation: potential SQL injection detected ({})",
            signature
        )));
    }

    // Rule 4: advisory identifier cross-check.
    let warnings = match schema {
        Some(snapshot) => unknown_identifiers(&words, trimmed, snapshot),
        None => Vec::new(),
    };
    if !warnings.is_empty() {
        debug!(?warnings, "validator emitted identifier warnings");
    }

    Ok(ValidationReport { warnings })
}

fn reject(reason: impl Into<String>) -> PipelineError {
    PipelineError::ValidationRejected {
        reason: reason.into(),
    }
}

/// Uppercased identifier-ish tokens, split on everything that cannot be
/// part of a SQL word.
fn keyword_tokens(sql: &str) -> Vec<String> {
    sql.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_uppercase())
        .collect()
}

/// Returns the name of the first matched injection signature.
fn injection_signature(sql: &str) -> Option<&'static str> {
    let upper = sql.to_uppercase();

    if upper.contains("--") {
        return Some("comment marker");
    }
    if upper.contains("/*") || upper.contains("*/") {
        return Some("block comment");
    }
    // Chained result sets smuggling rows from another table.
    let mut saw_union = false;
    for word in upper
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        if word == "UNION" {
            saw_union = true;
        } else if saw_union && word == "SELECT" {
            return Some("union chaining");
        }
    }
    // Tautologies, whitespace-insensitive.
    let squeezed: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
    if squeezed.contains("OR1=1") || squeezed.contains("OR'1'='1'") || squeezed.contains("OR\"1\"=\"1\"")
    {
        return Some("tautology");
    }
    // SQL Server procedure prefixes, at a word start.
    for prefix in ["XP_", "SP_"] {
        if let Some(pos) = upper.find(prefix) {
            let at_word_start = pos == 0
                || !upper[..pos]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_');
            if at_word_start {
                return Some("procedure prefix");
            }
        }
    }
    // Hex-encoded literals.
    let bytes = upper.as_bytes();
    for i in 0..bytes.len().saturating_sub(2) {
        if bytes[i] == b'0'
            && bytes[i + 1] == b'X'
            && bytes[i + 2].is_ascii_hexdigit()
            && (i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_'))
        {
            return Some("hex literal");
        }
    }
    None
}

/// Best-effort cross-check of referenced identifiers against the
/// schema: tables named after FROM/JOIN, and `table.column` pairs.
fn unknown_identifiers(words: &[String], sql: &str, schema: &SchemaSnapshot) -> Vec<String> {
    let mut warnings = Vec::new();

    for (i, word) in words.iter().enumerate() {
        if (word == "FROM" || word == "JOIN") && i + 1 < words.len() {
            let table = &words[i + 1];
            // Skip subqueries and keywords that can follow FROM.
            if table == "SELECT" {
                continue;
            }
            if schema.table(table).is_none() {
                warnings.push(format!("unknown table: {}", table.to_lowercase()));
            }
        }
    }

    // Qualified column references.
    for raw in sql.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.') {
        let Some((table, column)) = raw.split_once('.') else {
            continue;
        };
        if table.is_empty() || column.is_empty() || column.contains('.') {
            continue;
        }
        if let Some(t) = schema.table(table) {
            let known = t
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(column));
            if !known {
                warnings.push(format!(
                    "unknown column: {}.{}",
                    table.to_lowercase(),
                    column.to_lowercase()
                ));
            }
        }
    }

    warnings.dedup();
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Table};

    fn assert_rejected(sql: &str, fragment: &str) {
        match validate(sql, None) {
            Err(PipelineError::ValidationRejected { reason }) => {
                assert!(
                    reason.contains(fragment),
                    "reason {:?} should mention {:?}",
                    reason,
                    fragment
                );
            }
            other => panic!("expected rejection for {:?}, got {:?}", sql, other.is_ok()),
        }
    }

    #[test]
    fn test_clean_select_passes() {
        assert!(validate("SELECT * FROM products WHERE price > 10", None).is_ok());
        assert!(validate("select name, count(*) from orders group by name", None).is_ok());
        assert!(validate("SELECT * FROM orders;", None).is_ok());
    }

    #[test]
    fn test_with_cte_passes() {
        let sql = "WITH recent AS (SELECT * FROM orders) SELECT count(*) FROM recent";
        assert!(validate(sql, None).is_ok());
    }

    #[test]
    fn test_dml_and_ddl_rejected() {
        assert_rejected("DELETE FROM orders", "Only SELECT");
        assert_rejected("UPDATE orders SET status = 'x'", "Only SELECT");
        assert_rejected("DROP TABLE orders", "Only SELECT");
        assert_rejected("INSERT INTO orders VALUES (1)", "Only SELECT");
    }

    #[test]
    fn test_forbidden_keyword_inside_select_rejected() {
        assert_rejected(
            "SELECT * FROM orders WHERE id IN (DELETE FROM orders)",
            "DELETE",
        );
    }

    #[test]
    fn test_stacked_statement_rejected() {
        assert_rejected("SELECT * FROM orders; DROP TABLE orders;", "DROP");
    }

    #[test]
    fn test_multiple_selects_rejected() {
        assert_rejected("SELECT 1; SELECT 2", "Multiple SQL statements");
    }

    #[test]
    fn test_comment_markers_rejected() {
        assert_rejected("SELECT * FROM users -- WHERE admin = 0", "injection");
        assert_rejected("SELECT * FROM users /* hidden */", "injection");
    }

    #[test]
    fn test_tautology_rejected() {
        assert_rejected("SELECT * FROM users WHERE name = '' OR 1=1", "injection");
        assert_rejected("SELECT * FROM users WHERE x = 'a' OR '1' = '1'", "injection");
    }

    #[test]
    fn test_union_chaining_rejected() {
        assert_rejected(
            "SELECT name FROM users UNION SELECT password FROM credentials",
            "injection",
        );
        assert_rejected(
            "SELECT id FROM orders UNION ALL SELECT id FROM archived_orders",
            "injection",
        );
        // A word merely containing "union" is not a signature.
        assert!(validate("SELECT * FROM reunions", None).is_ok());
    }

    #[test]
    fn test_procedure_prefix_and_hex_rejected() {
        assert_rejected("SELECT xp_cmdshell('dir')", "injection");
        assert_rejected("SELECT * FROM t WHERE k = 0x414243", "injection");
    }

    #[test]
    fn test_empty_rejected() {
        assert_rejected("", "Empty");
        assert_rejected("   ", "Empty");
    }

    #[test]
    fn test_with_but_no_select_rejected() {
        assert_rejected("WITH x AS (VALUES (1)) VALUES (2)", "terminate in a SELECT");
    }

    #[test]
    fn test_identifier_warnings_do_not_reject() {
        let schema = SchemaSnapshot {
            database: "shop".to_string(),
            tables: vec![Table {
                name: "orders".to_string(),
                description: None,
                columns: vec![Column {
                    name: "status".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                    default: None,
                    description: None,
                }],
                primary_keys: vec![],
                foreign_keys: vec![],
            }],
        };

        let report = validate("SELECT * FROM shipments", Some(&schema)).unwrap();
        assert_eq!(report.warnings, vec!["unknown table: shipments".to_string()]);

        let report = validate("SELECT orders.color FROM orders", Some(&schema)).unwrap();
        assert_eq!(
            report.warnings,
            vec!["unknown column: orders.color".to_string()]
        );

        let report = validate("SELECT orders.status FROM orders", Some(&schema)).unwrap();
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_hex_like_identifier_not_flagged() {
        // "price0x" does not start a hex literal token.
        assert!(validate("SELECT price0x FROM products", None).is_ok());
    }
}
