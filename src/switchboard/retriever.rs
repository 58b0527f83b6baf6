//! Optional retrieval collaborator.
//!
//! An agent may consult a [`Retriever`] before composing its final prompt;
//! the orchestrator is unaware of it. Concrete back-ends (vector stores,
//! knowledge bases) live outside this crate.

use std::error::Error;

use async_trait::async_trait;

/// One retrieved chunk: the text plus back-end specific metadata.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub content: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch the chunks most relevant to `text`.
    async fn retrieve(
        &self,
        text: &str,
    ) -> Result<Vec<RetrievalResult>, Box<dyn Error + Send + Sync>>;

    /// Retrieve and join the non-empty chunk texts with newlines.
    async fn retrieve_and_combine_results(
        &self,
        text: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let results = self.retrieve(text).await?;
        Ok(combine_retrieval_results(&results))
    }

    /// Retrieve and let the back-end generate directly from the results.
    /// Back-ends without a generation path inherit this default, which
    /// returns the combined text as a JSON string.
    async fn retrieve_and_generate(
        &self,
        text: &str,
    ) -> Result<serde_json::Value, Box<dyn Error + Send + Sync>> {
        let combined = self.retrieve_and_combine_results(text).await?;
        Ok(serde_json::Value::String(combined))
    }
}

/// Join the non-empty chunk texts with newlines.
pub fn combine_retrieval_results(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| r.content.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
