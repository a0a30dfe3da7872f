//! Turn dispatch against scripted tools and the dummy model.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use triage_bot::config::{self, TriageConfig};
use triage_bot::knowledge::Passage;
use triage_bot::llm::LlmProvider;
use triage_bot::llm::providers::dummy::DummyProvider;
use triage_bot::tools::{Classification, Tool, ToolFailure, ToolFuture, ToolKind, ToolOutput};
use triage_bot::triage::dispatch::{Dispatcher, ReplySource};
use triage_bot::triage::labels::LabelSet;
use triage_bot::triage::utterance::{Exchange, ImageRef, Utterance};
use triage_bot::triage::{DEGRADED_RESPONSE, EMPTY_INPUT_RESPONSE, LAST_RESORT_RESPONSE};

const REPORT_REPLY: &str = r#"```json
{
  "symptoms": ["fever", "chills"],
  "primary_diagnosis": "Viral fever",
  "confidence": 0.62,
  "differentials": ["Influenza"],
  "first_aid": "Rest and drink plenty of fluids.",
  "recommendation": "See a doctor if the fever lasts more than 3 days.",
  "emergency": false
}
```"#;

/// A tool that replays a fixed outcome and counts its calls.
struct ScriptedTool {
    kind: ToolKind,
    outcome: Result<ToolOutput, ToolFailure>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTool {
    fn new(kind: ToolKind, outcome: Result<ToolOutput, ToolFailure>) -> Self {
        Self {
            kind,
            outcome,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn stalled(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Tool for ScriptedTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn invoke<'a>(&'a self, utterance: &'a Utterance) -> ToolFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(utterance.text().to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone()
        })
    }
}

fn classification(label: &str, confidence: f32) -> Result<ToolOutput, ToolFailure> {
    Ok(ToolOutput::Classification(Classification {
        label: label.into(),
        confidence,
        alternatives: vec![],
    }))
}

fn one_passage() -> Result<ToolOutput, ToolFailure> {
    Ok(ToolOutput::Passages {
        passages: vec![Passage {
            source: "fever_conditions.md".into(),
            content: "Malaria causes fever with chills and sweating that come in cycles.".into(),
            score: 0.83,
        }],
    })
}

fn triage_config() -> TriageConfig {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut cfg = config::load_from(&root.join("config/default.toml"), Some("/tmp/triage-dispatch-test"), None)
        .unwrap()
        .triage;
    cfg.prompts_dir = PathBuf::from(root).join("config/prompts");
    cfg.tool_timeout_seconds = 1;
    cfg
}

struct Harness {
    dispatcher: Dispatcher,
    llm: DummyProvider,
    text: Arc<AtomicUsize>,
    image: Arc<AtomicUsize>,
    retriever: Arc<AtomicUsize>,
}

fn harness(text: ScriptedTool, image: ScriptedTool, retriever: ScriptedTool, llm: DummyProvider) -> Harness {
    let counters = (text.calls.clone(), image.calls.clone(), retriever.calls.clone());
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(retriever), Arc::new(image), Arc::new(text)];
    let dispatcher = Dispatcher::new(tools, LlmProvider::Dummy(llm.clone()), &triage_config());
    Harness { dispatcher, llm, text: counters.0, image: counters.1, retriever: counters.2 }
}

fn default_harness(llm: DummyProvider) -> Harness {
    harness(
        ScriptedTool::new(ToolKind::TextClassifier, classification("malaria", 0.78)),
        ScriptedTool::new(
            ToolKind::ImageClassifier,
            Err(ToolFailure::Unavailable("image tool should not run".into())),
        ),
        ScriptedTool::new(ToolKind::Retriever, one_passage()),
        llm,
    )
}

#[tokio::test]
async fn symptom_text_runs_text_classifier_and_retriever_only() {
    let h = default_harness(DummyProvider::canned(REPORT_REPLY));
    let reply = h.dispatcher.handle_turn(&Utterance::new("I have a bad cough"), &[]).await;

    assert_eq!(h.text.load(Ordering::SeqCst), 1);
    assert_eq!(h.retriever.load(Ordering::SeqCst), 1);
    assert_eq!(h.image.load(Ordering::SeqCst), 0);
    assert_eq!(reply.tools, vec![ToolKind::TextClassifier, ToolKind::Retriever]);
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn fever_and_chills_produces_a_report() {
    let h = default_harness(DummyProvider::canned(REPORT_REPLY));
    let reply = h.dispatcher.handle_turn(&Utterance::new("I have fever and chills"), &[]).await;

    assert!(!reply.text.trim().is_empty());
    assert_eq!(reply.source, ReplySource::Model);
    assert!(reply.text.starts_with("[SYMPTOMS] fever, chills [/SYMPTOMS]"));
    // The classifier reported malaria, which is on the high-risk list.
    assert!(reply.emergency);
    assert!(reply.text.contains("[EMERGENCY] Possible malaria"));
    let report = reply.report.unwrap();
    assert_eq!(report.primary_diagnosis, "Viral fever");
    assert!(report.escalation.is_some());
}

#[tokio::test]
async fn prompt_holds_results_in_order_before_utterance() {
    let h = default_harness(DummyProvider::canned(REPORT_REPLY));
    h.dispatcher.handle_turn(&Utterance::new("I have fever and chills"), &[]).await;

    let prompt = h.llm.last_prompt().unwrap();
    let classified = prompt.find("Primary diagnosis: Malaria (Confidence: 78.00%)").unwrap();
    let passage = prompt.find("Malaria causes fever with chills").unwrap();
    let utterance = prompt.rfind("I have fever and chills").unwrap();
    assert!(classified < passage);
    assert!(passage < utterance);
    assert!(prompt.contains("image_classifier: no image attached"));
}

#[tokio::test]
async fn text_classifier_failure_degrades_without_model() {
    let h = harness(
        ScriptedTool::new(
            ToolKind::TextClassifier,
            Err(ToolFailure::Transport("connection refused".into())),
        ),
        ScriptedTool::new(ToolKind::ImageClassifier, classification("eczema", 0.9)),
        ScriptedTool::new(ToolKind::Retriever, one_passage()),
        DummyProvider::canned(REPORT_REPLY),
    );
    let reply = h.dispatcher.handle_turn(&Utterance::new("fever since yesterday"), &[]).await;

    assert_eq!(reply.text, DEGRADED_RESPONSE);
    assert_eq!(reply.source, ReplySource::Degraded);
    assert_eq!(h.llm.calls(), 0);
    // Later tools still ran.
    assert_eq!(h.retriever.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retriever_timeout_returns_fixed_fallback() {
    let h = harness(
        ScriptedTool::new(ToolKind::TextClassifier, classification("typhoid", 0.7)),
        ScriptedTool::new(ToolKind::ImageClassifier, classification("eczema", 0.9)),
        ScriptedTool::new(ToolKind::Retriever, one_passage()).stalled(Duration::from_secs(60)),
        DummyProvider::canned(REPORT_REPLY),
    );
    let reply = h.dispatcher.handle_turn(&Utterance::new("I have fever and chills"), &[]).await;

    assert_eq!(reply.text, DEGRADED_RESPONSE);
    assert!(reply.text.contains("consult a doctor if symptoms persist more than 3 days"));
    assert_eq!(h.text.load(Ordering::SeqCst), 1);
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn blank_input_invokes_nothing() {
    let h = default_harness(DummyProvider::canned(REPORT_REPLY));
    for input in ["", "   ", "\n\t", "[VOICE]  "] {
        let reply = h.dispatcher.handle_turn(&Utterance::new(input), &[]).await;
        assert_eq!(reply.text, EMPTY_INPUT_RESPONSE);
        assert_eq!(reply.source, ReplySource::Rejected);
        assert!(reply.tools.is_empty());
    }
    assert_eq!(h.text.load(Ordering::SeqCst), 0);
    assert_eq!(h.retriever.load(Ordering::SeqCst), 0);
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn model_failure_returns_last_resort() {
    let h = default_harness(DummyProvider::failing());
    let reply = h.dispatcher.handle_turn(&Utterance::new("headache and fever"), &[]).await;
    assert_eq!(reply.text, LAST_RESORT_RESPONSE);
    assert_eq!(reply.source, ReplySource::LastResort);
    // The classifier's malaria label still marks the turn as urgent.
    assert!(reply.emergency);
}

#[tokio::test]
async fn unstructured_reply_passes_through_with_escalation() {
    let h = default_harness(DummyProvider::canned("  You may have malaria. Please get tested.  "));
    let reply = h.dispatcher.handle_turn(&Utterance::new("fever and chills"), &[]).await;
    assert_eq!(reply.source, ReplySource::ModelUnstructured);
    assert!(reply.text.starts_with("You may have malaria. Please get tested."));
    assert!(reply.text.ends_with("[/EMERGENCY]"));
    assert!(reply.report.is_none());
}

#[tokio::test]
async fn low_risk_report_is_not_escalated() {
    let h = harness(
        ScriptedTool::new(ToolKind::TextClassifier, classification("common_cold", 0.55)),
        ScriptedTool::new(ToolKind::ImageClassifier, classification("eczema", 0.9)),
        ScriptedTool::new(ToolKind::Retriever, Ok(ToolOutput::Passages { passages: vec![] })),
        DummyProvider::canned(REPORT_REPLY),
    );
    let reply = h.dispatcher.handle_turn(&Utterance::new("runny nose and cough"), &[]).await;
    assert_eq!(reply.source, ReplySource::Model);
    assert!(!reply.emergency);
    assert!(!reply.text.contains("[EMERGENCY]"));
}

#[tokio::test]
async fn shipped_tuberculosis_label_is_escalated() {
    let labels = LabelSet::try_load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("config/labels.json")).unwrap();
    let label = labels.resolve("LABEL_5").unwrap();
    assert_eq!(label, "tb");

    let h = harness(
        ScriptedTool::new(ToolKind::TextClassifier, classification(&label, 0.71)),
        ScriptedTool::new(ToolKind::ImageClassifier, classification("eczema", 0.9)),
        ScriptedTool::new(ToolKind::Retriever, Ok(ToolOutput::Passages { passages: vec![] })),
        DummyProvider::canned("You may have a chest infection."),
    );
    let reply = h.dispatcher.handle_turn(&Utterance::new("cough for three weeks with night sweats"), &[]).await;
    assert_eq!(reply.source, ReplySource::ModelUnstructured);
    assert!(reply.emergency);
    assert!(reply.text.contains("[EMERGENCY]"));
}

#[tokio::test]
async fn image_turn_runs_image_classifier() {
    let h = harness(
        ScriptedTool::new(ToolKind::TextClassifier, classification("malaria", 0.78)),
        ScriptedTool::new(ToolKind::ImageClassifier, classification("eczema", 0.9)),
        ScriptedTool::new(ToolKind::Retriever, one_passage()),
        DummyProvider::canned(REPORT_REPLY),
    );
    let utterance = Utterance::new("itchy rash on my arm").with_image(ImageRef::parse("https://x.test/arm.jpg"));
    let reply = h.dispatcher.handle_turn(&utterance, &[]).await;

    assert_eq!(h.image.load(Ordering::SeqCst), 1);
    // Only visual keywords and an image: the text classifier is skipped.
    assert_eq!(h.text.load(Ordering::SeqCst), 0);
    assert_eq!(reply.tools, vec![ToolKind::ImageClassifier, ToolKind::Retriever]);
    let prompt = h.llm.last_prompt().unwrap();
    assert!(prompt.contains("text_classifier: no text symptoms described"));
}

#[tokio::test]
async fn missing_required_tool_degrades() {
    let text = ScriptedTool::new(ToolKind::TextClassifier, classification("malaria", 0.78));
    let llm = DummyProvider::canned(REPORT_REPLY);
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(text)];
    let dispatcher = Dispatcher::new(tools, LlmProvider::Dummy(llm.clone()), &triage_config());

    let reply = dispatcher.handle_turn(&Utterance::new("fever"), &[]).await;
    assert_eq!(reply.source, ReplySource::Degraded);
    assert_eq!(reply.tools, vec![ToolKind::TextClassifier, ToolKind::Retriever]);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn voice_turn_and_history_reach_the_prompt() {
    let h = default_harness(DummyProvider::canned(REPORT_REPLY));
    let history = vec![Exchange {
        user: "I feel weak".into(),
        assistant: "How long have you felt this way?".into(),
    }];
    h.dispatcher.handle_turn(&Utterance::new("[VOICE] fever for three days"), &history).await;

    let prompt = h.llm.last_prompt().unwrap();
    assert!(prompt.contains("Patient: I feel weak"));
    assert!(prompt.contains("transcribed from voice"));
    assert!(!prompt.contains("[VOICE]"));
}
