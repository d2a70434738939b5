//! Language-synthesis client trait

use crate::error::Result;
use async_trait::async_trait;

/// Text completion collaborator used for theme extraction.
///
/// Optional: without one the synthesis engine falls back to keyword clustering.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a single prompt
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Get the client type for debugging/logging
    fn client_type(&self) -> &str;
}
