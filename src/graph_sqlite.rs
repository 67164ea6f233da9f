//! SQLite-backed [`MetadataGraph`] backend.
//!
//! The graph is stored as generic `nodes` / `edges` tables plus a flat
//! `annotations` table for upsert-by-key bookkeeping. Node identity is
//! `(kind, database_name, table_name, column_name)` with empty strings
//! standing in for absent components, so rebuilds match-or-create instead
//! of duplicating. One store holds one target database's graph.
//!
//! Retrieval reconstructs a [`SchemaSnapshot`] from the node tables and
//! delegates to the shared ranking in [`crate::schema`], keeping the
//! contract identical to the in-memory backend.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::PipelineError;
use crate::graph::MetadataGraph;
use crate::models::{
    Annotation, Column, EntityKind, ForeignKey, RetrievalContext, SchemaSnapshot, Table,
};
use crate::schema;

pub struct SqliteGraph {
    pool: SqlitePool,
}

impl SqliteGraph {
    /// Open (or create) a graph store at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn node_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn edge_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM edges")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Match-or-create a node, returning its id.
    async fn upsert_node(
        &self,
        kind: &str,
        database: &str,
        table: &str,
        column: &str,
        ord: i64,
        props: &serde_json::Value,
    ) -> Result<String> {
        let id: String = sqlx::query_scalar(
            r#"
            INSERT INTO nodes (id, kind, database_name, table_name, column_name, ord, props_json)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(kind, database_name, table_name, column_name)
            DO UPDATE SET ord = excluded.ord, props_json = excluded.props_json
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(kind)
        .bind(database)
        .bind(table)
        .bind(column)
        .bind(ord)
        .bind(props.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_edge(
        &self,
        kind: &str,
        from_id: &str,
        to_id: &str,
        props: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO edges (kind, from_id, to_id, props_json) VALUES (?, ?, ?, ?)",
        )
        .bind(kind)
        .bind(from_id)
        .bind(to_id)
        .bind(props.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_node(
        &self,
        kind: &str,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM nodes
             WHERE kind = ? AND database_name = ? AND table_name = ? AND column_name = ?",
        )
        .bind(kind)
        .bind(database)
        .bind(table)
        .bind(column)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_node(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM edges WHERE from_id = ? OR to_id = ?")
            .bind(id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove table/column nodes that are no longer in the snapshot,
    /// together with their edges and any annotations describing them.
    async fn prune_stale(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        let mut live: HashSet<(String, String)> = HashSet::new();
        for table in &snapshot.tables {
            live.insert((table.name.clone(), String::new()));
            for col in &table.columns {
                live.insert((table.name.clone(), col.name.clone()));
            }
        }

        let rows = sqlx::query(
            "SELECT id, table_name, column_name FROM nodes
             WHERE database_name = ? AND kind IN ('Table', 'Column')",
        )
        .bind(&snapshot.database)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let table: String = row.get("table_name");
            let column: String = row.get("column_name");
            if !live.contains(&(table.clone(), column.clone())) {
                let id: String = row.get("id");
                debug!(table, column, "pruning stale graph node");
                self.delete_node(&id).await?;
                if column.is_empty() {
                    sqlx::query(
                        "DELETE FROM annotations
                         WHERE database_name = ? AND entity_type = 'table' AND entity_name = ?",
                    )
                    .bind(&snapshot.database)
                    .bind(&table)
                    .execute(&self.pool)
                    .await?;
                    sqlx::query(
                        "DELETE FROM annotations
                         WHERE database_name = ? AND entity_type = 'column' AND parent_table = ?",
                    )
                    .bind(&snapshot.database)
                    .bind(&table)
                    .execute(&self.pool)
                    .await?;
                } else {
                    sqlx::query(
                        "DELETE FROM annotations
                         WHERE database_name = ? AND entity_type = 'column'
                           AND entity_name = ? AND parent_table = ?",
                    )
                    .bind(&snapshot.database)
                    .bind(&column)
                    .bind(&table)
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        // Drop UserAnnotation nodes left without a DESCRIBES edge.
        let orphans = sqlx::query(
            "SELECT id FROM nodes n
             WHERE kind = 'UserAnnotation'
               AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.from_id = n.id)",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in orphans {
            let id: String = row.get("id");
            sqlx::query("DELETE FROM nodes WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn database_name(&self) -> Result<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT database_name FROM nodes WHERE kind = 'Database' LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(name)
    }

    /// Rebuild the structural snapshot from the node/edge tables,
    /// preserving the original schema ordering via the `ord` column.
    async fn load_snapshot(&self) -> Result<Option<SchemaSnapshot>> {
        let Some(database) = self.database_name().await? else {
            return Ok(None);
        };

        let table_rows = sqlx::query(
            "SELECT id, table_name, props_json FROM nodes
             WHERE kind = 'Table' AND database_name = ? ORDER BY ord",
        )
        .bind(&database)
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(table_rows.len());
        for trow in &table_rows {
            let table_id: String = trow.get("id");
            let name: String = trow.get("table_name");
            let props: serde_json::Value =
                serde_json::from_str(trow.get::<String, _>("props_json").as_str())
                    .unwrap_or_default();
            let description = props
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            let col_rows = sqlx::query(
                "SELECT column_name, props_json FROM nodes
                 WHERE kind = 'Column' AND database_name = ? AND table_name = ?
                 ORDER BY ord",
            )
            .bind(&database)
            .bind(&name)
            .fetch_all(&self.pool)
            .await?;

            let columns: Vec<Column> = col_rows
                .iter()
                .map(|crow| {
                    let props: serde_json::Value =
                        serde_json::from_str(crow.get::<String, _>("props_json").as_str())
                            .unwrap_or_default();
                    Column {
                        name: crow.get("column_name"),
                        data_type: props
                            .get("data_type")
                            .and_then(|v| v.as_str())
                            .unwrap_or("any")
                            .to_string(),
                        nullable: props
                            .get("nullable")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(true),
                        default: props
                            .get("default")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                        description: props
                            .get("description")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string()),
                    }
                })
                .collect();

            let pk_rows = sqlx::query(
                "SELECT n.column_name FROM edges e
                 JOIN nodes n ON n.id = e.to_id
                 WHERE e.kind = 'HAS_PRIMARY_KEY' AND e.from_id = ?
                 ORDER BY n.ord",
            )
            .bind(&table_id)
            .fetch_all(&self.pool)
            .await?;
            let primary_keys: Vec<String> =
                pk_rows.iter().map(|r| r.get("column_name")).collect();

            let fk_rows = sqlx::query(
                "SELECT n.table_name AS to_table, e.props_json FROM edges e
                 JOIN nodes n ON n.id = e.to_id
                 WHERE e.kind = 'HAS_FOREIGN_KEY' AND e.from_id = ?",
            )
            .bind(&table_id)
            .fetch_all(&self.pool)
            .await?;
            let foreign_keys: Vec<ForeignKey> = fk_rows
                .iter()
                .map(|r| {
                    let props: serde_json::Value =
                        serde_json::from_str(r.get::<String, _>("props_json").as_str())
                            .unwrap_or_default();
                    ForeignKey {
                        from_table: name.clone(),
                        from_column: props
                            .get("from_column")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        to_table: r.get("to_table"),
                        to_column: props
                            .get("to_column")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    }
                })
                .collect();

            tables.push(Table {
                name,
                description,
                columns,
                primary_keys,
                foreign_keys,
            });
        }

        Ok(Some(SchemaSnapshot { database, tables }))
    }
}

#[async_trait]
impl MetadataGraph for SqliteGraph {
    async fn build_graph(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        snapshot.validate()?;
        let db = &snapshot.database;

        // Key edges are cheap to rebuild and can change without either
        // endpoint changing, so reset them up front.
        sqlx::query(
            "DELETE FROM edges
             WHERE kind IN ('HAS_PRIMARY_KEY', 'HAS_FOREIGN_KEY')
               AND from_id IN (SELECT id FROM nodes WHERE kind = 'Table' AND database_name = ?)",
        )
        .bind(db)
        .execute(&self.pool)
        .await?;

        let db_id = self
            .upsert_node("Database", db, "", "", 0, &serde_json::json!({}))
            .await?;

        for (t_ord, table) in snapshot.tables.iter().enumerate() {
            let table_props = serde_json::json!({ "description": table.description });
            let table_id = self
                .upsert_node("Table", db, &table.name, "", t_ord as i64, &table_props)
                .await?;
            self.upsert_edge("HAS_TABLE", &db_id, &table_id, &serde_json::json!({}))
                .await?;

            for (c_ord, col) in table.columns.iter().enumerate() {
                let col_props = serde_json::json!({
                    "data_type": col.data_type,
                    "nullable": col.nullable,
                    "default": col.default,
                    "description": col.description,
                });
                let col_id = self
                    .upsert_node("Column", db, &table.name, &col.name, c_ord as i64, &col_props)
                    .await?;
                self.upsert_edge("HAS_COLUMN", &table_id, &col_id, &serde_json::json!({}))
                    .await?;
                if table.primary_keys.contains(&col.name) {
                    self.upsert_edge("HAS_PRIMARY_KEY", &table_id, &col_id, &serde_json::json!({}))
                        .await?;
                }
            }
        }

        // Foreign keys in a second pass, once every table node exists.
        for table in &snapshot.tables {
            let from_id = self
                .find_node("Table", db, &table.name, "")
                .await?
                .ok_or_else(|| anyhow::anyhow!("table node missing: {}", table.name))?;
            for fk in &table.foreign_keys {
                let to_id = self
                    .find_node("Table", db, &fk.to_table, "")
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("table node missing: {}", fk.to_table))?;
                let props = serde_json::json!({
                    "from_column": fk.from_column,
                    "to_column": fk.to_column,
                });
                self.upsert_edge("HAS_FOREIGN_KEY", &from_id, &to_id, &props)
                    .await?;
            }
        }

        self.prune_stale(snapshot).await?;
        info!(database = %db, tables = snapshot.tables.len(), "graph store rebuilt");
        Ok(())
    }

    async fn store_annotation(&self, annotation: Annotation) -> Result<()> {
        let Some(database) = self.database_name().await? else {
            return Err(PipelineError::EntityNotFound {
                entity: annotation.entity_name.clone(),
            }
            .into());
        };

        let (target_kind, table, column) = match annotation.entity {
            EntityKind::Database => ("Database", String::new(), String::new()),
            EntityKind::Table => ("Table", annotation.entity_name.clone(), String::new()),
            EntityKind::Column => (
                "Column",
                annotation.parent_table.clone().unwrap_or_default(),
                annotation.entity_name.clone(),
            ),
        };

        let Some(target_id) = self.find_node(target_kind, &database, &table, &column).await? else {
            return Err(PipelineError::EntityNotFound {
                entity: if column.is_empty() {
                    annotation.entity_name.clone()
                } else {
                    format!("{}.{}", table, column)
                },
            }
            .into());
        };

        sqlx::query(
            r#"
            INSERT INTO annotations
                (id, database_name, entity_type, entity_name, parent_table,
                 content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(database_name, entity_type, entity_name, parent_table)
            DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&database)
        .bind(annotation.entity.as_str())
        .bind(&annotation.entity_name)
        .bind(annotation.parent_table.as_deref().unwrap_or(""))
        .bind(&annotation.content)
        .bind(annotation.created_at.timestamp())
        .bind(annotation.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        let ann_props = serde_json::json!({ "entity_type": annotation.entity.as_str() });
        let ann_id = self
            .upsert_node("UserAnnotation", &database, &table, &annotation.entity_name, 0, &ann_props)
            .await?;
        self.upsert_edge("DESCRIBES", &ann_id, &target_id, &serde_json::json!({}))
            .await?;

        debug!(entity = %annotation.entity_name, "annotation stored");
        Ok(())
    }

    async fn retrieve_context(
        &self,
        keywords: &[String],
        max_tables: usize,
    ) -> Result<RetrievalContext> {
        let Some(snapshot) = self.load_snapshot().await? else {
            return Ok(RetrievalContext::default());
        };
        let annotations = self.annotations().await?;
        Ok(schema::rank_tables(
            &snapshot,
            &annotations,
            keywords,
            max_tables,
        ))
    }

    async fn annotations(&self) -> Result<Vec<Annotation>> {
        let rows = sqlx::query(
            "SELECT entity_type, entity_name, parent_table, content, created_at, updated_at
             FROM annotations ORDER BY updated_at DESC, entity_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut annotations = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity: EntityKind = row.get::<String, _>("entity_type").parse()?;
            let parent: String = row.get("parent_table");
            let created: i64 = row.get("created_at");
            let updated: i64 = row.get("updated_at");
            annotations.push(Annotation {
                entity,
                entity_name: row.get("entity_name"),
                parent_table: (!parent.is_empty()).then_some(parent),
                content: row.get("content"),
                created_at: DateTime::<Utc>::from_timestamp(created, 0).unwrap_or_default(),
                updated_at: DateTime::<Utc>::from_timestamp(updated, 0).unwrap_or_default(),
            });
        }
        Ok(annotations)
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('Database', 'Table', 'Column', 'UserAnnotation')),
            database_name TEXT NOT NULL,
            table_name TEXT NOT NULL DEFAULT '',
            column_name TEXT NOT NULL DEFAULT '',
            ord INTEGER NOT NULL DEFAULT 0,
            props_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(kind, database_name, table_name, column_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS edges (
            kind TEXT NOT NULL CHECK (kind IN
                ('HAS_TABLE', 'HAS_COLUMN', 'HAS_PRIMARY_KEY', 'HAS_FOREIGN_KEY', 'DESCRIBES')),
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            props_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(kind, from_id, to_id, props_json),
            FOREIGN KEY (from_id) REFERENCES nodes(id),
            FOREIGN KEY (to_id) REFERENCES nodes(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotations (
            id TEXT PRIMARY KEY,
            database_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_name TEXT NOT NULL,
            parent_table TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(database_name, entity_type, entity_name, parent_table)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_kind ON nodes(kind, database_name)")
        .execute(pool)
        .await?;

    Ok(())
}
