//! In-memory [`MetadataGraph`] backend.
//!
//! Holds the latest schema snapshot plus annotations behind `RwLock`s.
//! Retrieval delegates to the shared ranking in [`crate::schema`], so the
//! contract is byte-for-byte the same as the persistent backend — minus
//! durability.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::graph::MetadataGraph;
use crate::models::{Annotation, EntityKind, RetrievalContext, SchemaSnapshot};
use crate::schema;

#[derive(Default)]
pub struct InMemoryGraph {
    snapshot: RwLock<Option<SchemaSnapshot>>,
    annotations: RwLock<Vec<Annotation>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logical node count: database + tables + columns + annotations.
    pub fn node_count(&self) -> usize {
        let snapshot = self.snapshot.read().unwrap();
        let annotations = self.annotations.read().unwrap();
        match snapshot.as_ref() {
            Some(s) => {
                1 + s.tables.len()
                    + s.tables.iter().map(|t| t.columns.len()).sum::<usize>()
                    + annotations.len()
            }
            None => 0,
        }
    }

    /// Logical edge count: HAS_TABLE + HAS_COLUMN + HAS_PRIMARY_KEY +
    /// HAS_FOREIGN_KEY + DESCRIBES.
    pub fn edge_count(&self) -> usize {
        let snapshot = self.snapshot.read().unwrap();
        let annotations = self.annotations.read().unwrap();
        match snapshot.as_ref() {
            Some(s) => {
                s.tables.len()
                    + s.tables
                        .iter()
                        .map(|t| {
                            t.columns.len() + t.primary_keys.len() + t.foreign_keys.len()
                        })
                        .sum::<usize>()
                    + annotations.len()
            }
            None => 0,
        }
    }

    fn target_exists(snapshot: &SchemaSnapshot, annotation: &Annotation) -> bool {
        match annotation.entity {
            EntityKind::Database => true,
            EntityKind::Table => snapshot.table(&annotation.entity_name).is_some(),
            EntityKind::Column => annotation
                .parent_table
                .as_deref()
                .and_then(|t| snapshot.table(t))
                .map(|t| {
                    t.columns
                        .iter()
                        .any(|c| c.name.eq_ignore_ascii_case(&annotation.entity_name))
                })
                .unwrap_or(false),
        }
    }
}

#[async_trait]
impl MetadataGraph for InMemoryGraph {
    async fn build_graph(&self, snapshot: &SchemaSnapshot) -> Result<()> {
        snapshot.validate()?;
        {
            let mut stored = self.snapshot.write().unwrap();
            *stored = Some(snapshot.clone());
        }
        // Prune annotations whose targets left the schema.
        {
            let mut annotations = self.annotations.write().unwrap();
            annotations.retain(|a| Self::target_exists(snapshot, a));
        }
        info!(
            database = %snapshot.database,
            tables = snapshot.tables.len(),
            "in-memory graph rebuilt"
        );
        Ok(())
    }

    async fn store_annotation(&self, mut annotation: Annotation) -> Result<()> {
        {
            let snapshot = self.snapshot.read().unwrap();
            let Some(snapshot) = snapshot.as_ref() else {
                return Err(PipelineError::EntityNotFound {
                    entity: annotation.entity_name.clone(),
                }
                .into());
            };
            if !Self::target_exists(snapshot, &annotation) {
                return Err(PipelineError::EntityNotFound {
                    entity: match &annotation.parent_table {
                        Some(t) => format!("{}.{}", t, annotation.entity_name),
                        None => annotation.entity_name.clone(),
                    },
                }
                .into());
            }
        }

        let key = annotation.key();
        let mut annotations = self.annotations.write().unwrap();
        if let Some(existing) = annotations.iter_mut().find(|a| a.key() == key) {
            existing.content = std::mem::take(&mut annotation.content);
            existing.updated_at = Utc::now();
            debug!(entity = %existing.entity_name, "annotation updated");
        } else {
            debug!(entity = %annotation.entity_name, "annotation created");
            annotations.push(annotation);
        }
        Ok(())
    }

    async fn retrieve_context(
        &self,
        keywords: &[String],
        max_tables: usize,
    ) -> Result<RetrievalContext> {
        let snapshot = self.snapshot.read().unwrap();
        let Some(snapshot) = snapshot.as_ref() else {
            return Ok(RetrievalContext::default());
        };
        let annotations = self.annotations.read().unwrap();
        Ok(schema::rank_tables(
            snapshot,
            &annotations,
            keywords,
            max_tables,
        ))
    }

    async fn annotations(&self) -> Result<Vec<Annotation>> {
        let mut all = self.annotations.read().unwrap().clone();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}
