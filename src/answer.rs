//! Answer-generation collaborator consumed by the chat intake path.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    pub text: String,
    pub retrieved_document_count: usize,
}

/// Produces an answer for a student's question. Failures should surface as
/// `TriageError::UpstreamUnavailable`.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate_answer(&self, question: &str, student_id: &str) -> Result<GeneratedAnswer>;
}
