//! Schema store: structural index, keyword ranking, and introspection.
//!
//! The ranking here is the single implementation of context retrieval
//! scoring. Both graph backends delegate to [`rank_tables`] so that the
//! persistent and in-memory layers cannot drift apart.
//!
//! # Ranking
//!
//! Per keyword, the strongest signal wins for a table:
//! exact table name (4) > exact column name (3) > name substring (2) >
//! description substring (1). Tables are ordered by their strongest
//! per-keyword tier first, summed score second, so accumulated weak hits
//! never outrank a single exact name match. Tables scoring zero are
//! excluded; full ties keep the original schema ordering (stable sort).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{
    Annotation, Column, EntityKind, ForeignKey, RetrievalContext, RetrievedTable, SchemaSnapshot,
    Table,
};

/// Words too generic to select tables by.
const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "by", "can", "do", "for", "from", "get", "give", "how",
    "in", "is", "it", "many", "me", "much", "my", "of", "on", "or", "per", "please", "show",
    "that", "the", "their", "them", "there", "this", "to", "us", "was", "we", "what", "which",
    "who", "with", "you",
];

/// Extract lowercase keywords from a user question.
///
/// Strips punctuation, drops stopwords and single characters, dedupes
/// while preserving first-occurrence order.
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for raw in question.split_whitespace() {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_lowercase();
        if word.len() < 2 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !keywords.contains(&word) {
            keywords.push(word);
        }
    }
    keywords
}

fn keyword_score(table: &Table, keyword: &str) -> u32 {
    let table_name = table.name.to_lowercase();
    if table_name == keyword || singular(&table_name) == singular(keyword) {
        return 4;
    }
    for col in &table.columns {
        if col.name.to_lowercase() == *keyword {
            return 3;
        }
    }
    if table_name.contains(keyword)
        || table
            .columns
            .iter()
            .any(|c| c.name.to_lowercase().contains(keyword))
    {
        return 2;
    }
    let in_description = |d: &Option<String>| {
        d.as_deref()
            .map(|d| d.to_lowercase().contains(keyword))
            .unwrap_or(false)
    };
    if in_description(&table.description)
        || table.columns.iter().any(|c| in_description(&c.description))
    {
        return 1;
    }
    0
}

/// Naive plural folding so "orders" finds the `order` table and vice versa.
fn singular(word: &str) -> &str {
    word.strip_suffix('s').unwrap_or(word)
}

/// Rank a snapshot's tables against extracted keywords and assemble the
/// retrieval context: top tables with their columns, attached annotations,
/// and the foreign keys among the returned set (join hints).
///
/// Always succeeds; no keyword overlap yields an empty context.
pub fn rank_tables(
    snapshot: &SchemaSnapshot,
    annotations: &[Annotation],
    keywords: &[String],
    max_tables: usize,
) -> RetrievalContext {
    let mut scored: Vec<(u32, u32, &Table)> = snapshot
        .tables
        .iter()
        .filter_map(|table| {
            let mut best: u32 = 0;
            let mut total: u32 = 0;
            for keyword in keywords {
                let score = keyword_score(table, keyword);
                best = best.max(score);
                total += score;
            }
            (total > 0).then_some((best, total, table))
        })
        .collect();

    // Strongest tier wins, summed score breaks ties within a tier, and
    // the stable sort keeps schema order for full ties.
    scored.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
    scored.truncate(max_tables);

    let db_annotations: Vec<&Annotation> = annotations
        .iter()
        .filter(|a| a.entity == EntityKind::Database)
        .collect();

    let tables: Vec<RetrievedTable> = scored
        .iter()
        .map(|(_, _, table)| {
            let table_annotations: Vec<Annotation> = db_annotations
                .iter()
                .map(|a| (*a).clone())
                .chain(
                    annotations
                        .iter()
                        .filter(|a| {
                            a.entity == EntityKind::Table
                                && a.entity_name.eq_ignore_ascii_case(&table.name)
                        })
                        .cloned(),
                )
                .collect();
            let column_annotations: Vec<Annotation> = annotations
                .iter()
                .filter(|a| {
                    a.entity == EntityKind::Column
                        && a.parent_table
                            .as_deref()
                            .map(|t| t.eq_ignore_ascii_case(&table.name))
                            .unwrap_or(false)
                })
                .cloned()
                .collect();
            RetrievedTable {
                table: (*table).clone(),
                annotations: table_annotations,
                column_annotations,
            }
        })
        .collect();

    let returned: Vec<&str> = tables.iter().map(|t| t.table.name.as_str()).collect();
    let foreign_keys: Vec<ForeignKey> = tables
        .iter()
        .flat_map(|t| t.table.foreign_keys.iter())
        .filter(|fk| returned.contains(&fk.to_table.as_str()))
        .cloned()
        .collect();

    RetrievalContext {
        tables,
        foreign_keys,
    }
}

/// Render a retrieval context as the schema section of an LLM prompt.
///
/// Layout follows the original assistant's context format: one block per
/// table with typed columns, keys, and annotation notes inline.
pub fn format_context(context: &RetrievalContext) -> String {
    if context.is_empty() {
        return "No schema information available.".to_string();
    }

    let mut out = String::from("Database Schema:\n\n");
    for retrieved in &context.tables {
        let table = &retrieved.table;
        out.push_str(&format!("Table: {}\n", table.name));
        if let Some(desc) = &table.description {
            out.push_str(&format!("Description: {}\n", desc));
        }
        for ann in &retrieved.annotations {
            out.push_str(&format!("Description: {}\n", ann.content));
        }
        out.push_str("Columns:\n");
        for col in &table.columns {
            let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
            out.push_str(&format!("  - {}: {} {}", col.name, col.data_type, nullable));
            if let Some(default) = &col.default {
                out.push_str(&format!(" DEFAULT {}", default));
            }
            out.push('\n');
            for ann in &retrieved.column_annotations {
                if ann.entity_name.eq_ignore_ascii_case(&col.name) {
                    out.push_str(&format!("    Note: {}\n", ann.content));
                }
            }
        }
        if !table.primary_keys.is_empty() {
            out.push_str(&format!(
                "Primary Keys: {}\n",
                table.primary_keys.join(", ")
            ));
        }
        out.push('\n');
    }

    if !context.foreign_keys.is_empty() {
        out.push_str("Foreign Keys (join hints):\n");
        for fk in &context.foreign_keys {
            out.push_str(&format!(
                "  - {}.{} -> {}.{}\n",
                fk.from_table, fk.from_column, fk.to_table, fk.to_column
            ));
        }
    }
    out
}

/// A source the assistant can introspect a [`SchemaSnapshot`] from.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot>;
}

/// Introspects a SQLite database via `sqlite_master` and pragmas.
pub struct SqliteIntrospector {
    pool: SqlitePool,
    database: String,
}

impl SqliteIntrospector {
    pub fn new(pool: SqlitePool, database: impl Into<String>) -> Self {
        Self {
            pool,
            database: database.into(),
        }
    }
}

#[async_trait]
impl SchemaSource for SqliteIntrospector {
    async fn fetch_schema(&self) -> Result<SchemaSnapshot> {
        let table_rows = sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for row in &table_rows {
            let name: String = row.get("name");
            let quoted = name.replace('"', "\"\"");

            let col_rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", quoted))
                .fetch_all(&self.pool)
                .await?;

            let mut columns = Vec::with_capacity(col_rows.len());
            let mut primary_keys = Vec::new();
            for col in &col_rows {
                let col_name: String = col.get("name");
                let data_type: String = col.get("type");
                let notnull: i64 = col.get("notnull");
                let default: Option<String> = col.try_get("dflt_value").unwrap_or(None);
                let pk: i64 = col.get("pk");
                if pk > 0 {
                    primary_keys.push(col_name.clone());
                }
                columns.push(Column {
                    name: col_name,
                    data_type: if data_type.is_empty() {
                        "any".to_string()
                    } else {
                        data_type
                    },
                    nullable: notnull == 0,
                    default,
                    description: None,
                });
            }

            let fk_rows = sqlx::query(&format!("PRAGMA foreign_key_list(\"{}\")", quoted))
                .fetch_all(&self.pool)
                .await?;

            let mut foreign_keys = Vec::with_capacity(fk_rows.len());
            for fk in &fk_rows {
                let to_table: String = fk.get("table");
                let from_column: String = fk.get("from");
                // `to` is NULL when the FK targets the referenced table's
                // primary key implicitly; resolved in the post-pass below.
                let to_column: Option<String> = fk.try_get("to").unwrap_or(None);
                foreign_keys.push(ForeignKey {
                    from_table: name.clone(),
                    from_column,
                    to_table,
                    to_column: to_column.unwrap_or_default(),
                });
            }

            tables.push(Table {
                name,
                description: None,
                columns,
                primary_keys,
                foreign_keys,
            });
        }

        // Resolve implicit FK targets against the referenced table's PK.
        let pk_by_table: Vec<(String, Option<String>)> = tables
            .iter()
            .map(|t| (t.name.clone(), t.primary_keys.first().cloned()))
            .collect();
        for table in &mut tables {
            for fk in &mut table.foreign_keys {
                if fk.to_column.is_empty() {
                    if let Some((_, Some(pk))) =
                        pk_by_table.iter().find(|(name, _)| *name == fk.to_table)
                    {
                        fk.to_column = pk.clone();
                    }
                }
            }
        }

        let snapshot = SchemaSnapshot {
            database: self.database.clone(),
            tables,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}
