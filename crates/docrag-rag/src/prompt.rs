use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use docrag_core::error::{Error, Result};
use docrag_core::traits::{InferenceEngine, VectorIndex};
use docrag_core::types::Chunk;

use crate::render::{fill_template, render_context};

/// One generated answer together with the context it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QaRecord {
    pub response: String,
    pub context: String,
    pub metadata: String,
}

pub struct RagService {
    engine: Arc<dyn InferenceEngine>,
    top_k: usize,
}

impl RagService {
    pub fn new(engine: Arc<dyn InferenceEngine>, top_k: usize) -> Self {
        Self { engine, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Blocking single-shot generation.
    pub fn call_llm(&self, prompt: &str) -> Result<String> {
        self.engine.generate(prompt).map_err(|e| Error::Inference(e.to_string()))
    }

    /// Render `group` into `|context|` of `template` and generate.
    pub fn doc_prompt(&self, group: &[Chunk], template: &str) -> Result<QaRecord> {
        let rendered = render_context(group);
        let response = self.call_llm(&fill_template(template, None, &rendered.context))?;
        Ok(QaRecord { response, context: rendered.context, metadata: rendered.metadata })
    }

    /// Answer each question from its top-`k` retrieved chunks, in order.
    ///
    /// Generation runs on the blocking pool so the async caller is not stalled.
    pub async fn answer_questions(
        &self,
        index: &dyn VectorIndex,
        questions: &[String],
        template: &str,
        k: Option<usize>,
    ) -> Result<Vec<QaRecord>> {
        let k = k.unwrap_or(self.top_k);
        let mut answers = Vec::with_capacity(questions.len());
        for question in questions {
            let retrieved = index.similarity_search(question, k).await?;
            debug!(question = %question, retrieved = retrieved.len(), "retrieved context");
            let rendered = render_context(&retrieved);
            let prompt = fill_template(template, Some(question), &rendered.context);

            let engine = Arc::clone(&self.engine);
            let response = tokio::task::spawn_blocking(move || engine.generate(&prompt))
                .await
                .map_err(|e| Error::Inference(format!("inference task failed: {e}")))?
                .map_err(|e| Error::Inference(e.to_string()))?;
            answers.push(QaRecord { response, context: rendered.context, metadata: rendered.metadata });
        }
        info!(questions = questions.len(), k, "answered questions");
        Ok(answers)
    }
}
