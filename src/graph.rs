//! Metadata graph abstraction.
//!
//! The [`MetadataGraph`] trait is the single surface the orchestrator sees
//! for schema context and annotations. Two backends implement it:
//!
//! - [`SqliteGraph`](crate::graph_sqlite::SqliteGraph) — persistent
//!   node/edge tables; annotations survive restarts.
//! - [`InMemoryGraph`](crate::graph_memory::InMemoryGraph) — transient
//!   structural index with identical retrieval semantics; used as the
//!   degraded mode when the persistent store cannot be opened.
//!
//! Callers must not branch on which backend they hold.
//!
//! # Graph shape
//!
//! Entity kinds are `Database`, `Table`, `Column`, and `UserAnnotation`;
//! relationship kinds are `HAS_TABLE`, `HAS_COLUMN`, `HAS_PRIMARY_KEY`,
//! `HAS_FOREIGN_KEY`, and `DESCRIBES`. Rebuilding from a snapshot is
//! idempotent: nodes match-or-create on `(database, table[, column])`.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

use crate::models::{Annotation, RetrievalContext, SchemaSnapshot};

#[async_trait]
pub trait MetadataGraph: Send + Sync {
    /// Idempotent upsert of database/table/column nodes and structural
    /// edges from a schema snapshot. Safe to call repeatedly with an
    /// unchanged or evolved snapshot.
    async fn build_graph(&self, snapshot: &SchemaSnapshot) -> Result<()>;

    /// Upsert an annotation by `(entity, entity_name, parent_table)` and
    /// attach a `DESCRIBES` edge to the target node.
    ///
    /// Fails with [`PipelineError::EntityNotFound`](crate::error::PipelineError)
    /// when the target table/column is not in the graph.
    async fn store_annotation(&self, annotation: Annotation) -> Result<()>;

    /// Keyword-scored context retrieval: the top `max_tables` tables with
    /// their columns, attached annotations, and foreign-key join hints.
    /// Never fails the pipeline; no overlap yields an empty context.
    async fn retrieve_context(
        &self,
        keywords: &[String],
        max_tables: usize,
    ) -> Result<RetrievalContext>;

    /// All stored annotations, most recently updated first.
    async fn annotations(&self) -> Result<Vec<Annotation>>;
}

/// Open the configured graph backend, falling back to the in-memory
/// index when the persistent store cannot be opened.
///
/// The fallback keeps the retrieval contract intact but does not persist
/// annotations; callers receive the same trait object either way.
pub async fn open_graph(
    backend: &str,
    path: Option<&Path>,
    snapshot: &SchemaSnapshot,
) -> Result<Box<dyn MetadataGraph>> {
    match (backend, path) {
        ("sqlite", Some(path)) => match crate::graph_sqlite::SqliteGraph::open(path).await {
            Ok(graph) => {
                graph.build_graph(snapshot).await?;
                info!(path = %path.display(), "opened persistent metadata graph");
                Ok(Box::new(graph))
            }
            Err(e) => {
                warn!(error = %e, "graph store unreachable, falling back to in-memory index");
                let graph = crate::graph_memory::InMemoryGraph::new();
                graph.build_graph(snapshot).await?;
                Ok(Box::new(graph))
            }
        },
        _ => {
            let graph = crate::graph_memory::InMemoryGraph::new();
            graph.build_graph(snapshot).await?;
            Ok(Box::new(graph))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, Table};

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot {
            database: "shop".to_string(),
            tables: vec![Table {
                name: "orders".to_string(),
                description: Some("customer purchase records".to_string()),
                columns: vec![Column {
                    name: "id".to_string(),
                    data_type: "integer".to_string(),
                    nullable: false,
                    default: None,
                    description: None,
                }],
                primary_keys: vec!["id".to_string()],
                foreign_keys: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn test_unopenable_store_falls_back_to_memory() {
        // A directory is not a valid SQLite database file, so opening
        // the persistent backend fails and the in-memory index takes
        // over with the same retrieval contract.
        let tmp = tempfile::TempDir::new().unwrap();
        let graph = open_graph("sqlite", Some(tmp.path()), &snapshot())
            .await
            .unwrap();

        let ctx = graph
            .retrieve_context(&["orders".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(ctx.tables.len(), 1);
        assert_eq!(ctx.tables[0].table.name, "orders");
        assert!(graph.annotations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_backend_ignores_path() {
        let graph = open_graph("memory", None, &snapshot()).await.unwrap();
        let ctx = graph
            .retrieve_context(&["orders".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(ctx.tables[0].table.name, "orders");
    }
}
