//! # dbchat
//!
//! A conversational SQL assistant: natural-language questions in, validated
//! read-only SQL and natural-language answers out.
//!
//! dbchat resolves each user turn through a fixed, conditionally-routed
//! pipeline: classify the question, pull relevant schema context from a
//! graph-backed metadata store, generate a candidate SELECT with a local
//! LLM, statically validate it, execute it, and narrate the result — with
//! a bounded repair loop that feeds validation and execution failures back
//! into generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Classify │──▶│ Retrieve │──▶│ Generate │──▶│ Validate │
//! └────┬─────┘   └──────────┘   └────▲─────┘   └────┬─────┘
//!      │ greeting/general            │ Fix          │ ok
//!      ▼                             │              ▼
//! ┌──────────┐   ┌────────────┐      │         ┌──────────┐
//! │ Respond  │◀──│ Synthesize │◀─────┴─────────│ Execute  │
//! └──────────┘   └────────────┘      (repair)  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dbc init                          # introspect the database, build the graph
//! dbc ask "show me all pending orders"
//! dbc annotate "the status column in the orders table stores pending/shipped/delivered"
//! dbc annotations                   # list stored annotations
//! dbc schema                        # print the indexed schema
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Schema snapshots, annotations, retrieval context, rows |
//! | [`schema`] | Structural schema index, keyword ranking, introspection |
//! | [`graph`] | Metadata graph trait and contract types |
//! | [`graph_memory`] | Transient in-memory graph backend |
//! | [`graph_sqlite`] | Persistent SQLite graph backend |
//! | [`extract`] | Free-text annotation extraction |
//! | [`llm`] | Text-completion provider abstraction |
//! | [`generator`] | SQL candidate generation and repair prompts |
//! | [`guardrail`] | Static SELECT-only / injection validation |
//! | [`executor`] | Query execution against the target database |
//! | [`answer`] | Natural-language answer synthesis |
//! | [`workflow`] | The per-turn orchestrator state machine |

pub mod answer;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod extract;
pub mod generator;
pub mod graph;
pub mod graph_memory;
pub mod graph_sqlite;
pub mod guardrail;
pub mod llm;
pub mod models;
pub mod schema;
pub mod workflow;
