//! Retrieval enrichment
//!
//! The dispatcher asks a [`Retriever`] for the top passages matching the
//! prompt, splices them in front of it, and re-runs inference once.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Retrieval failures; enrichment is skipped when one occurs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("retrieval service unavailable: {0}")]
    Unavailable(String),
}

/// External search collaborator
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `limit` passages relevant to `query`, best first
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, RetrievalError>;
}

/// Retriever that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRetriever;

#[async_trait]
impl Retriever for NoopRetriever {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Enrichment settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Passages requested per enriched request
    pub top_k: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

/// Prompt with numbered passages prepended
#[must_use]
pub fn splice(prompt: &str, passages: &[String]) -> String {
    let mut out = String::from("Use the following context to answer.\n\n");
    for (i, passage) in passages.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, passage.trim()));
    }
    out.push_str("\nQuestion: ");
    out.push_str(prompt);
    out
}
