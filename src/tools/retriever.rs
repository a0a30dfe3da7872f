//! Knowledge retriever tool: background passages for the utterance.

use std::sync::Arc;

use tracing::info;

use crate::knowledge::embedding::EmbeddingError;
use crate::knowledge::{KnowledgeError, KnowledgeStore};
use crate::tools::{Capability, Tool, ToolFailure, ToolFuture, ToolKind, ToolOutput};
use crate::triage::utterance::Utterance;

#[derive(Debug, Clone)]
pub struct Retriever {
    store: Arc<KnowledgeStore>,
}

impl Retriever {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

impl Tool for Retriever {
    fn kind(&self) -> ToolKind {
        ToolKind::Retriever
    }

    fn capability(&self) -> Capability {
        Capability::Background
    }

    fn invoke<'a>(&'a self, utterance: &'a Utterance) -> ToolFuture<'a> {
        Box::pin(async move {
            let passages = self.store.search(utterance.text()).await.map_err(to_failure)?;
            info!(passages = passages.len(), "retrieved background passages");
            Ok(ToolOutput::Passages { passages })
        })
    }
}

fn to_failure(e: KnowledgeError) -> ToolFailure {
    match e {
        KnowledgeError::Embedding(EmbeddingError::Timeout) => ToolFailure::Transport("embedding request timed out".into()),
        KnowledgeError::Embedding(EmbeddingError::Malformed(m)) => ToolFailure::Malformed(m),
        KnowledgeError::Embedding(other) => ToolFailure::Transport(other.to_string()),
        KnowledgeError::Store(m) => ToolFailure::Unavailable(format!("knowledge store: {m}")),
    }
}
