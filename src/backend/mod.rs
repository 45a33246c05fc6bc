//! Search backend seam.
//!
//! Each backend is an independently queryable source of candidate tools
//! with its own, non-comparable score scale. The router fans out to every
//! registered backend; registration order is fixed (remote first, then
//! local) because fusion breaks score ties by first-seen source order.

pub mod local;
pub mod remote;

pub use local::LocalVectorBackend;
pub use remote::RemoteSearchBackend;

use crate::error::Result;
use crate::types::CandidateHit;
use async_trait::async_trait;
use std::collections::HashSet;

/// One search request as seen by a backend. The embedding is computed once
/// per route call and shared across sources; text is included for backends
/// that run hybrid (keyword + vector) queries.
pub struct BackendQuery<'a> {
    pub query: &'a str,
    pub embedding: &'a [f32],
    pub top_k: usize,
    /// When present, the backend must restrict candidates to these ids
    /// before scoring. A tool outside the filter never appears, whatever
    /// its score.
    pub allowed_tools: Option<&'a HashSet<String>>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return up to `top_k` ranked candidate hits for the query.
    async fn search(&self, request: &BackendQuery<'_>) -> Result<Vec<CandidateHit>>;
}
