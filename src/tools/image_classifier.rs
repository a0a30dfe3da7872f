//! Remote image-symptom classifier client.
//!
//! The image is read from disk, downloaded, or taken inline, then sent base64
//! encoded as `{"image": "<b64>", "description": "<text>"}`. Accepted replies:
//!
//! ```text
//! {"diagnosis": "eczema", "confidence": 0.91}          (confidence optional)
//! {"predictions": [{"label": "eczema", "score": 0.91}, {"index": 2, "score": 0.05}]}
//! [{"label": "eczema", "score": 0.91}, ...]
//! ```

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::tools::{
    Capability, HttpBackend, ImageFinding, Tool, ToolFailure, ToolFuture, ToolKind, ToolOutput,
    Urgency, check_confidence, check_status, map_send_error, number_field,
};
use crate::triage::labels::LabelSet;
use crate::triage::utterance::{ImageRef, Utterance};

/// Ranked findings kept from a predictions list.
const TOP_FINDINGS: usize = 3;

#[derive(Debug, Clone)]
pub struct ImageClassifier {
    backend: HttpBackend,
    fetch_client: Client,
    fetch_timeout_seconds: u64,
    labels: Arc<LabelSet>,
}

impl ImageClassifier {
    pub fn new(
        config: &BackendConfig,
        fetch_timeout_seconds: u64,
        api_key: Option<String>,
        labels: Arc<LabelSet>,
    ) -> Result<Self, ToolFailure> {
        let backend = HttpBackend::new(config.url.clone(), config.timeout_seconds, api_key)?;
        let fetch_client = Client::builder()
            .timeout(Duration::from_secs(fetch_timeout_seconds))
            .build()
            .map_err(|e| ToolFailure::Unavailable(format!("failed to build fetch client: {e}")))?;
        Ok(Self { backend, fetch_client, fetch_timeout_seconds, labels })
    }

    /// Produce the base64 payload for `image`.
    pub async fn load_image(&self, image: &ImageRef) -> Result<String, ToolFailure> {
        let bytes = match image {
            ImageRef::Path(path) => tokio::fs::read(path).await.map_err(|e| {
                ToolFailure::Unavailable(format!("cannot read image {}: {e}", path.display()))
            })?,
            ImageRef::Url(url) => {
                let response = self
                    .fetch_client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| map_send_error(e, self.fetch_timeout_seconds))?;
                let response = check_status(response).await?;
                response
                    .bytes()
                    .await
                    .map_err(|e| map_send_error(e, self.fetch_timeout_seconds))?
                    .to_vec()
            }
            ImageRef::Inline(encoded) => {
                let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
                    ToolFailure::Unavailable(format!("inline image is not valid base64: {e}"))
                })?;
                if decoded.is_empty() {
                    return Err(ToolFailure::Unavailable("image is empty".into()));
                }
                return Ok(encoded.trim().to_string());
            }
        };
        if bytes.is_empty() {
            return Err(ToolFailure::Unavailable("image is empty".into()));
        }
        debug!(bytes = bytes.len(), "image loaded");
        Ok(STANDARD.encode(bytes))
    }

    pub async fn analyze(&self, image: &ImageRef, description: &str) -> Result<ImageFinding, ToolFailure> {
        let encoded = self.load_image(image).await?;
        let reply = self
            .backend
            .post_json(&json!({ "image": encoded, "description": description.trim() }))
            .await?;
        let finding = parse_image_reply(&reply, &self.labels)?;
        info!(
            url = %self.backend.url(),
            primary = %finding.primary,
            confidence = ?finding.confidence,
            urgency = ?finding.urgency,
            "image classified"
        );
        Ok(finding)
    }
}

impl Tool for ImageClassifier {
    fn kind(&self) -> ToolKind {
        ToolKind::ImageClassifier
    }

    fn capability(&self) -> Capability {
        Capability::SymptomImage
    }

    fn invoke<'a>(&'a self, utterance: &'a Utterance) -> ToolFuture<'a> {
        Box::pin(async move {
            let image = utterance
                .image()
                .ok_or_else(|| ToolFailure::Unavailable("no image attached".into()))?;
            self.analyze(image, utterance.text())
                .await
                .map(ToolOutput::ImageFinding)
        })
    }
}

/// Interpret an image classifier reply.
pub fn parse_image_reply(value: &Value, labels: &LabelSet) -> Result<ImageFinding, ToolFailure> {
    match value {
        Value::Object(obj) if obj.contains_key("diagnosis") => {
            let diagnosis = obj
                .get("diagnosis")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .ok_or_else(|| ToolFailure::Malformed("empty diagnosis".into()))?;
            let confidence = number_field(obj, &["confidence", "score"])
                .map(check_confidence)
                .transpose()?;
            Ok(ImageFinding {
                primary: diagnosis.to_string(),
                confidence,
                findings: Vec::new(),
                urgency: confidence.map(Urgency::from_confidence).unwrap_or(Urgency::Low),
            })
        }
        Value::Object(obj) => match obj.get("predictions") {
            Some(Value::Array(items)) => ranked_finding(items, labels),
            _ => Err(ToolFailure::Malformed("reply has neither diagnosis nor predictions".into())),
        },
        Value::Array(items) => ranked_finding(items, labels),
        _ => Err(ToolFailure::Malformed("expected a JSON object or list".into())),
    }
}

fn ranked_finding(items: &[Value], labels: &LabelSet) -> Result<ImageFinding, ToolFailure> {
    let mut ranked = items
        .iter()
        .map(|item| {
            let obj = item
                .as_object()
                .ok_or_else(|| ToolFailure::Malformed("prediction is not an object".into()))?;
            Ok((prediction_label(obj, labels)?, prediction_score(obj)?))
        })
        .collect::<Result<Vec<_>, ToolFailure>>()?;
    if ranked.is_empty() {
        return Err(ToolFailure::Malformed("empty predictions".into()));
    }
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(TOP_FINDINGS);
    let (primary, confidence) = ranked[0].clone();
    Ok(ImageFinding {
        primary,
        confidence: Some(confidence),
        findings: ranked,
        urgency: Urgency::from_confidence(confidence),
    })
}

fn prediction_label(obj: &Map<String, Value>, labels: &LabelSet) -> Result<String, ToolFailure> {
    if let Some(raw) = obj.get("label").and_then(Value::as_str) {
        return labels
            .resolve(raw)
            .ok_or_else(|| ToolFailure::Malformed(format!("unknown label '{raw}'")));
    }
    let idx = obj
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| ToolFailure::Malformed("prediction has neither label nor index".into()))?;
    labels
        .get(idx as usize)
        .map(str::to_string)
        .ok_or_else(|| ToolFailure::Malformed(format!("class index {idx} outside label set")))
}

fn prediction_score(obj: &Map<String, Value>) -> Result<f32, ToolFailure> {
    let score = number_field(obj, &["score", "confidence"])
        .ok_or_else(|| ToolFailure::Malformed("prediction has no score".into()))?;
    check_confidence(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::from_json(r#"{"class_names": ["acne", "eczema", "psoriasis", "ringworm"]}"#).unwrap()
    }

    fn classifier() -> ImageClassifier {
        let cfg = BackendConfig { url: "http://127.0.0.1:9/classify".into(), timeout_seconds: 1 };
        ImageClassifier::new(&cfg, 1, None, Arc::new(labels())).unwrap()
    }

    #[test]
    fn free_text_diagnosis_with_confidence() {
        let f = parse_image_reply(&json!({"diagnosis": "Contact dermatitis", "confidence": 0.65}), &labels()).unwrap();
        assert_eq!(f.primary, "Contact dermatitis");
        assert_eq!(f.urgency, Urgency::Medium);
        assert!(f.findings.is_empty());
    }

    #[test]
    fn diagnosis_without_confidence_is_low_urgency() {
        let f = parse_image_reply(&json!({"diagnosis": "unclear lesion"}), &labels()).unwrap();
        assert_eq!(f.confidence, None);
        assert_eq!(f.urgency, Urgency::Low);
    }

    #[test]
    fn predictions_keep_top_three_sorted() {
        let reply = json!({"predictions": [
            {"index": 0, "score": 0.02},
            {"label": "eczema", "score": 0.85},
            {"index": 2, "score": 0.08},
            {"label": "LABEL_3", "score": 0.05}
        ]});
        let f = parse_image_reply(&reply, &labels()).unwrap();
        assert_eq!(f.primary, "eczema");
        assert_eq!(f.urgency, Urgency::High);
        let names: Vec<_> = f.findings.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(names, ["eczema", "psoriasis", "ringworm"]);
    }

    #[test]
    fn bad_replies_are_malformed() {
        for reply in [json!({"diagnosis": "  "}), json!({"predictions": []}), json!({"other": 1}), json!(7)] {
            assert!(matches!(parse_image_reply(&reply, &labels()), Err(ToolFailure::Malformed(_))));
        }
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let err = classifier()
            .load_image(&ImageRef::Path("/nonexistent/rash.png".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolFailure::Unavailable(_)));
    }

    #[tokio::test]
    async fn local_file_is_base64_encoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rash.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();
        let encoded = classifier().load_image(&ImageRef::Path(path)).await.unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn invalid_inline_base64_is_unavailable() {
        let err = classifier()
            .load_image(&ImageRef::Inline("@@not base64@@".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolFailure::Unavailable(_)));
    }

    #[tokio::test]
    async fn invoke_without_image_is_unavailable() {
        let u = Utterance::new("itchy rash on my arm");
        let err = classifier().invoke(&u).await.unwrap_err();
        assert!(matches!(err, ToolFailure::Unavailable(_)));
    }
}
