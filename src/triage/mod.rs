//! Triage core: everything a turn needs, built once at startup.

pub mod compose;
pub mod dispatch;
pub mod labels;
pub mod report;
pub mod routing;
pub mod utterance;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::knowledge::KnowledgeStore;
use crate::knowledge::embedding::EmbeddingProvider;
use crate::llm::providers;
use crate::tools::Tool;
use crate::tools::image_classifier::ImageClassifier;
use crate::tools::retriever::Retriever;
use crate::tools::text_classifier::TextClassifier;
use dispatch::Dispatcher;
use labels::LabelSet;

/// Returned for blank input with no image.
pub const EMPTY_INPUT_RESPONSE: &str =
    "Please describe your symptoms in a few words, or attach a photo, so I can help.";

/// Returned when any diagnostic tool failed. The model is not called.
pub const DEGRADED_RESPONSE: &str = "[SYMPTOMS] Your symptoms could not be fully analyzed right now. [/SYMPTOMS]\n\
[FIRST AID] Rest, drink plenty of fluids and keep track of your temperature and any new symptoms. [/FIRST AID]\n\
[RECOMMENDATION] Please consult a doctor if symptoms persist more than 3 days, or sooner if they get worse. [/RECOMMENDATION]";

/// Returned when the model call itself failed.
pub const LAST_RESORT_RESPONSE: &str = "I'm unable to complete an assessment right now. \
Please see a doctor for an in-person evaluation of your symptoms.";

/// Shared read-only state for all channels.
pub struct TriageContext {
    pub labels: Arc<LabelSet>,
    pub knowledge: Arc<KnowledgeStore>,
    pub dispatcher: Dispatcher,
}

impl TriageContext {
    /// Build labels, clients, the knowledge store and the dispatcher.
    pub fn build(config: &Config) -> Result<Self, AppError> {
        let labels = Arc::new(LabelSet::load(&config.triage.labels_path));
        if labels.is_fallback() {
            warn!("classifier labels fall back to the built-in list");
        }

        let embedder = EmbeddingProvider::build(&config.knowledge.embedding, config.embedding_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?;
        let knowledge = Arc::new(KnowledgeStore::open(&config.knowledge, embedder)?);

        let text = TextClassifier::new(
            &config.tools.text_classifier,
            config.classifier_api_key.clone(),
            labels.clone(),
        )
        .map_err(|e| AppError::Config(format!("text classifier: {e}")))?;
        let image = ImageClassifier::new(
            &config.tools.image_classifier,
            config.tools.image_fetch_timeout_seconds,
            config.classifier_api_key.clone(),
            labels.clone(),
        )
        .map_err(|e| AppError::Config(format!("image classifier: {e}")))?;
        let retriever = Retriever::new(knowledge.clone());

        let llm = providers::build(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?;
        info!(provider = llm.name(), "llm provider ready");

        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(text), Arc::new(image), Arc::new(retriever)];
        let dispatcher = Dispatcher::new(tools, llm, &config.triage);

        Ok(Self { labels, knowledge, dispatcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_replies_recommend_clinical_care() {
        assert!(DEGRADED_RESPONSE.contains("consult a doctor if symptoms persist more than 3 days"));
        assert!(LAST_RESORT_RESPONSE.contains("see a doctor"));
        assert!(!EMPTY_INPUT_RESPONSE.is_empty());
    }

    #[tokio::test]
    async fn build_from_defaults_wires_all_tools() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::test_default(dir.path());
        let ctx = TriageContext::build(&config).unwrap();
        assert_eq!(ctx.dispatcher.tool_kinds().len(), 3);
        assert_eq!(ctx.dispatcher.llm().name(), "dummy");
        assert!(ctx.knowledge.db_path().starts_with(dir.path()));
    }
}
