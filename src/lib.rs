//! # viking-core
//!
//! A context database for AI agents: a persistent, hierarchical store of
//! memories, resources, and skills organized as a virtual filesystem, plus a
//! retrieval engine that extracts the most relevant subset for a model's
//! limited context window and a session manager that compresses long dialogues
//! into durable long-term memories.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use viking_core::agfs::{Agfs, AgfsConfig};
//! use viking_core::window::{ContextWindow, WindowConfig};
//! use viking_core::types::{Context, ContextTier};
//!
//! # async fn demo() -> viking_core::error::VikingResult<()> {
//! // A viking:// namespace rooted on disk
//! let fs = Agfs::new(AgfsConfig::default()).await?;
//! fs.write_context(
//!     "viking://resources/docs/api",
//!     "REST API reference",
//!     "Endpoints, auth, and rate limits",
//!     "... full document ...",
//!     true,
//! )
//! .await?;
//!
//! // A token-budgeted working set
//! let window = ContextWindow::new(WindowConfig::default());
//! window.add_context(
//!     Context::new("viking://resources/docs/api")
//!         .with_abstract("REST API reference")
//!         .with_tier(ContextTier::L0),
//! )?;
//! let fitted = window.fit_in_window();
//! # let _ = fitted;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`types`] | `Context` entity, tiers, categories, token counting |
//! | [`agfs`] | Agent Graph Filesystem — `viking://` URIs over a directory tree, with per-directory abstract/overview/content files and relations |
//! | [`window`] | Tiered context (L0/L1/L2) and the hard-budget context window with compression |
//! | [`retrieval`] | Hierarchical score-propagating retrieval, hybrid BM25+vector ranking, hotness, trajectories |
//! | [`llm`] | Provider contract: chat, streaming chat, embeddings |
//! | [`session`] | Session lifecycle, memory extraction, dedup, summarization, compression |
//! | [`storage`] | Record models, filter DSL, JSON-backed store, queue manager |
//! | [`config`] | YAML configuration with `GOVIKING_*` environment overrides |
//! | [`error`] | Error kinds surfaced to callers |

pub mod agfs;
pub mod config;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod session;
pub mod storage;
pub mod types;
pub mod window;

pub use error::{VikingError, VikingResult};
pub use types::*;
