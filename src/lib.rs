//! Semroute - Semantic tool routing microservice
//!
//! This library exposes the routing, caching, and evaluation components,
//! enabling integration tests and the offline evaluation binary.

pub mod backend;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod evals;
pub mod fusion;
pub mod handlers;
pub mod index_snapshot;
pub mod router;
pub mod state;
pub mod types;

// Re-export key types for convenience
pub use backend::{BackendQuery, LocalVectorBackend, RemoteSearchBackend, SearchBackend};
pub use cache::{MemoryVectorStore, SemanticCache, VectorStore};
pub use config::Config;
pub use embedding::{CachingEmbedder, EmbeddingProvider, HttpEmbeddingClient};
pub use error::{AppError, Result};
pub use handlers::{health_handler, ready_handler, route_handler, status_handler};
pub use router::{RouterOptions, ToolRouter};
pub use state::AppState;
pub use types::{CandidateHit, RankedToolList, ToolIdentity, ToolMatch, ToolMetadata};
