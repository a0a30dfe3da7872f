//! Remote text-symptom classifier client.
//!
//! Sends `{"inputs": "<symptom text>"}` and accepts any of:
//!
//! ```text
//! {"label": "fever_malaria", "confidence": 0.78}      (or "score")
//! {"index": 0, "confidence": 0.78}
//! [{"label": "LABEL_0", "score": 0.78}, ...]          (Hugging Face style)
//! [[{"label": "LABEL_0", "score": 0.78}, ...]]
//! ```
//!
//! Index and `LABEL_n` answers are resolved through the [`LabelSet`].

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::config::BackendConfig;
use crate::tools::{
    Capability, Classification, HttpBackend, Tool, ToolFailure, ToolFuture, ToolKind, ToolOutput,
    check_confidence, number_field,
};
use crate::triage::labels::LabelSet;
use crate::triage::utterance::Utterance;

/// How many runner-up labels to keep from ranked answers.
const MAX_ALTERNATIVES: usize = 2;

#[derive(Debug, Clone)]
pub struct TextClassifier {
    backend: HttpBackend,
    labels: Arc<LabelSet>,
}

impl TextClassifier {
    pub fn new(
        config: &BackendConfig,
        api_key: Option<String>,
        labels: Arc<LabelSet>,
    ) -> Result<Self, ToolFailure> {
        let backend = HttpBackend::new(config.url.clone(), config.timeout_seconds, api_key)?;
        Ok(Self { backend, labels })
    }

    pub async fn classify(&self, text: &str) -> Result<Classification, ToolFailure> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ToolFailure::Unavailable("no symptom text to classify".into()));
        }
        let reply = self.backend.post_json(&json!({ "inputs": text })).await?;
        let classification = parse_classification(&reply, &self.labels)?;
        info!(
            url = %self.backend.url(),
            label = %classification.label,
            confidence = classification.confidence,
            "text classified"
        );
        Ok(classification)
    }
}

impl Tool for TextClassifier {
    fn kind(&self) -> ToolKind {
        ToolKind::TextClassifier
    }

    fn capability(&self) -> Capability {
        Capability::SymptomText
    }

    fn invoke<'a>(&'a self, utterance: &'a Utterance) -> ToolFuture<'a> {
        Box::pin(async move {
            self.classify(utterance.text())
                .await
                .map(ToolOutput::Classification)
        })
    }
}

/// Interpret a classifier reply.
pub fn parse_classification(value: &Value, labels: &LabelSet) -> Result<Classification, ToolFailure> {
    match value {
        Value::Object(obj) => {
            let label = if let Some(raw) = obj.get("label").and_then(Value::as_str) {
                resolve(raw, labels)?
            } else if let Some(idx) = obj.get("index").and_then(Value::as_u64) {
                labels
                    .get(idx as usize)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ToolFailure::Malformed(format!(
                            "class index {idx} outside label set of {}",
                            labels.len()
                        ))
                    })?
            } else {
                return Err(ToolFailure::Malformed("reply has neither label nor index".into()));
            };
            let confidence = number_field(obj, &["confidence", "score"])
                .ok_or_else(|| ToolFailure::Malformed("reply has no confidence".into()))?;
            Ok(Classification {
                label,
                confidence: check_confidence(confidence)?,
                alternatives: Vec::new(),
            })
        }
        Value::Array(items) => {
            // Hugging Face pipelines wrap the ranking in an outer list per input.
            let items = match items.first() {
                Some(Value::Array(inner)) => inner,
                _ => items,
            };
            let mut ranked = items
                .iter()
                .map(|item| {
                    let obj = item
                        .as_object()
                        .ok_or_else(|| ToolFailure::Malformed("ranking entry is not an object".into()))?;
                    let raw = obj
                        .get("label")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ToolFailure::Malformed("ranking entry has no label".into()))?;
                    let score = number_field(obj, &["score", "confidence"])
                        .ok_or_else(|| ToolFailure::Malformed("ranking entry has no score".into()))?;
                    Ok((resolve(raw, labels)?, check_confidence(score)?))
                })
                .collect::<Result<Vec<_>, ToolFailure>>()?;
            if ranked.is_empty() {
                return Err(ToolFailure::Malformed("empty ranking".into()));
            }
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            let (label, confidence) = ranked.remove(0);
            ranked.truncate(MAX_ALTERNATIVES);
            Ok(Classification { label, confidence, alternatives: ranked })
        }
        _ => Err(ToolFailure::Malformed("expected a JSON object or list".into())),
    }
}

fn resolve(raw: &str, labels: &LabelSet) -> Result<String, ToolFailure> {
    labels
        .resolve(raw)
        .ok_or_else(|| ToolFailure::Malformed(format!("unknown label '{raw}'")))
}
