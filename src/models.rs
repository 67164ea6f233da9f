//! Core data models shared across the pipeline.
//!
//! Schema snapshots are immutable once introspected; retrieval contexts are
//! rebuilt from scratch for every turn and never persisted.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a database's structure at introspection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

impl SchemaSnapshot {
    /// Enforce the snapshot invariants: unique table names, and every
    /// foreign key referencing a table/column present in the snapshot.
    pub fn validate(&self) -> Result<()> {
        for (i, table) in self.tables.iter().enumerate() {
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                bail!("duplicate table name in snapshot: {}", table.name);
            }
        }
        for table in &self.tables {
            for fk in &table.foreign_keys {
                let Some(target) = self.tables.iter().find(|t| t.name == fk.to_table) else {
                    bail!(
                        "foreign key {}.{} references unknown table {}",
                        fk.from_table,
                        fk.from_column,
                        fk.to_table
                    );
                };
                if !target.columns.iter().any(|c| c.name == fk.to_column) {
                    bail!(
                        "foreign key {}.{} references unknown column {}.{}",
                        fk.from_table,
                        fk.from_column,
                        fk.to_table,
                        fk.to_column
                    );
                }
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// The kind of schema entity an annotation attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Database,
    Table,
    Column,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Table => "table",
            Self::Column => "column",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "database" => Ok(Self::Database),
            "table" => Ok(Self::Table),
            "column" => Ok(Self::Column),
            other => bail!("unknown entity kind: {}", other),
        }
    }
}

/// A user-authored fact about a schema entity.
///
/// `parent_table` is present iff `entity` is [`EntityKind::Column`]. The
/// store upserts by `(entity, entity_name, parent_table)`: content is
/// overwritten on conflict, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub entity: EntityKind,
    pub entity_name: String,
    pub parent_table: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(
        entity: EntityKind,
        entity_name: impl Into<String>,
        parent_table: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity,
            entity_name: entity_name.into(),
            parent_table,
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Upsert key within one database's graph.
    pub fn key(&self) -> (EntityKind, String, Option<String>) {
        (
            self.entity,
            self.entity_name.clone(),
            self.parent_table.clone(),
        )
    }
}

/// One table selected by context retrieval, with its attached annotations.
#[derive(Debug, Clone)]
pub struct RetrievedTable {
    pub table: Table,
    /// Table-level and database-level annotations relevant to this table.
    pub annotations: Vec<Annotation>,
    /// Column-level annotations, keyed by column name in `annotations`'
    /// `entity_name` field.
    pub column_annotations: Vec<Annotation>,
}

/// Ephemeral, query-scoped context: a ranked subset of the schema plus
/// matching annotations and the foreign keys among the returned tables.
#[derive(Debug, Clone, Default)]
pub struct RetrievalContext {
    pub tables: Vec<RetrievedTable>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Rows returned by a successfully executed statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
