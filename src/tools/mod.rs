//! Diagnostic tools consulted during a turn.
//!
//! Each tool is a stateless request/response wrapper behind the [`Tool`]
//! trait and declares the [`Capability`] it serves. The dispatcher decides
//! which capabilities a turn needs and invokes the matching tools in
//! [`ToolKind::ORDER`]. Outcomes are collected as [`ToolRecord`]s that live
//! for one turn only.

pub mod image_classifier;
pub mod retriever;
pub mod text_classifier;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::knowledge::Passage;
use crate::triage::labels::humanize;
use crate::triage::utterance::Utterance;

// ── Identity ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    TextClassifier,
    ImageClassifier,
    Retriever,
}

impl ToolKind {
    /// Fixed invocation order within a turn.
    pub const ORDER: [ToolKind; 3] =
        [ToolKind::TextClassifier, ToolKind::ImageClassifier, ToolKind::Retriever];

    /// The capability this kind of tool serves.
    pub fn capability(self) -> Capability {
        match self {
            ToolKind::TextClassifier => Capability::SymptomText,
            ToolKind::ImageClassifier => Capability::SymptomImage,
            ToolKind::Retriever => Capability::Background,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::TextClassifier => "text_classifier",
            ToolKind::ImageClassifier => "image_classifier",
            ToolKind::Retriever => "retriever",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tool is able to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Symptoms described in words.
    SymptomText,
    /// Symptoms shown in an attached image.
    SymptomImage,
    /// Reference passages from the knowledge index.
    Background,
}

// ── Outputs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Condition name as resolved through the label set (not humanized).
    pub label: String,
    pub confidence: f32,
    /// Runner-up labels, best first.
    pub alternatives: Vec<(String, f32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence > 0.8 {
            Urgency::High
        } else if confidence > 0.6 {
            Urgency::Medium
        } else {
            Urgency::Low
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            Urgency::High => "It is suggested to consult a doctor at the earliest for appropriate treatment.",
            Urgency::Medium => "Ask for more information and correlate with the reported symptoms.",
            Urgency::Low => "The image could not be analyzed confidently, so clinical review is suggested.",
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Urgency::High => "HIGH",
            Urgency::Medium => "MEDIUM",
            Urgency::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFinding {
    pub primary: String,
    pub confidence: Option<f32>,
    /// Up to three ranked findings, best first. Empty for free-text answers.
    pub findings: Vec<(String, f32)>,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Classification(Classification),
    ImageFinding(ImageFinding),
    Passages { passages: Vec<Passage> },
}

impl ToolOutput {
    /// Plain-text rendering embedded in the model prompt.
    pub fn render(&self) -> String {
        match self {
            ToolOutput::Classification(c) => {
                let mut out = format!(
                    "Primary diagnosis: {} (Confidence: {:.2}%)",
                    humanize(&c.label),
                    c.confidence * 100.0
                );
                if !c.alternatives.is_empty() {
                    let alts = c
                        .alternatives
                        .iter()
                        .map(|(label, score)| format!("{} ({:.2}%)", humanize(label), score * 100.0))
                        .collect::<Vec<_>>()
                        .join(", ");
                    out.push_str(&format!("\nOther candidates: {alts}"));
                }
                out
            }
            ToolOutput::ImageFinding(f) => {
                let mut out = String::from("[SYMPTOM IMAGE ANALYSIS]\n");
                match f.confidence {
                    Some(c) => out.push_str(&format!(
                        " - Primary Analysis: {}: {:.1}%\n",
                        humanize(&f.primary),
                        c * 100.0
                    )),
                    None => out.push_str(&format!(" - Primary Analysis: {}\n", f.primary.trim())),
                }
                if !f.findings.is_empty() {
                    out.push_str(" - Top Findings:\n");
                    for (i, (label, score)) in f.findings.iter().enumerate() {
                        out.push_str(&format!("{}. {}: {:.1}%\n", i + 1, humanize(label), score * 100.0));
                    }
                }
                out.push_str(&format!("Urgency: [{}] - {}", f.urgency.tag(), f.urgency.advice()));
                out
            }
            ToolOutput::Passages { passages } if passages.is_empty() => {
                "No reference passages matched this description closely enough.".to_string()
            }
            ToolOutput::Passages { passages } => {
                let mut out = String::from("Reference passages:");
                for (i, p) in passages.iter().enumerate() {
                    out.push_str(&format!(
                        "\n[{}] ({}, similarity {:.2}) {}",
                        i + 1,
                        p.source,
                        p.score,
                        p.content.trim()
                    ));
                }
                out
            }
        }
    }

    /// Condition names this output asserts, for high-risk matching.
    pub fn condition_labels(&self) -> Vec<&str> {
        match self {
            ToolOutput::Classification(c) => vec![c.label.as_str()],
            ToolOutput::ImageFinding(f) => std::iter::once(f.primary.as_str())
                .chain(f.findings.iter().map(|(l, _)| l.as_str()))
                .collect(),
            ToolOutput::Passages { .. } => Vec::new(),
        }
    }
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolFailure {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// The outcome of one tool invocation within one turn.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    pub tool: ToolKind,
    pub outcome: Result<ToolOutput, ToolFailure>,
}

impl ToolRecord {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }
}

// ── Tool trait ────────────────────────────────────────────────────────────────

/// A boxed future returned by [`Tool::invoke`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolFailure>> + Send + 'a>>;

pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn capability(&self) -> Capability {
        self.kind().capability()
    }

    fn invoke<'a>(&'a self, utterance: &'a Utterance) -> ToolFuture<'a>;
}

// ── Shared HTTP plumbing ──────────────────────────────────────────────────────

/// JSON-over-HTTP endpoint shared by the classifier clients.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    url: String,
    api_key: Option<String>,
    timeout_seconds: u64,
}

impl HttpBackend {
    pub fn new(url: String, timeout_seconds: u64, api_key: Option<String>) -> Result<Self, ToolFailure> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ToolFailure::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url, api_key, timeout_seconds })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `body` and return the parsed JSON reply.
    pub async fn post_json<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, ToolFailure> {
        let mut req = self.client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_seconds))?;
        let response = check_status(response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| map_send_error(e, self.timeout_seconds))?;
        debug!(url = %self.url, bytes = text.len(), "backend replied");
        parse_body(&text)
    }
}

pub(crate) fn map_send_error(e: reqwest::Error, timeout_seconds: u64) -> ToolFailure {
    if e.is_timeout() {
        ToolFailure::Timeout(timeout_seconds)
    } else {
        ToolFailure::Transport(e.to_string())
    }
}

/// Return the response when its status is 2xx, otherwise a `Status` failure
/// carrying the first part of the body.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ToolFailure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let body: String = body.chars().take(200).collect();
    warn!(%status, body = %body, "backend returned HTTP error");
    Err(ToolFailure::Status { status: status.as_u16(), body })
}

pub(crate) fn parse_body(text: &str) -> Result<Value, ToolFailure> {
    if text.trim().is_empty() {
        return Err(ToolFailure::Malformed("empty response body".into()));
    }
    serde_json::from_str(text).map_err(|e| ToolFailure::Malformed(format!("invalid JSON: {e}")))
}

/// Read a score-like number from the first present key.
pub(crate) fn number_field(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<f32> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_f64))
        .map(|v| v as f32)
}

/// Confidences must be probabilities.
pub(crate) fn check_confidence(value: f32) -> Result<f32, ToolFailure> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ToolFailure::Malformed(format!("confidence {value} is outside [0, 1]")))
    }
}
