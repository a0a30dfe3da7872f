//! Turn context and prompt composition.

use std::path::Path;

use crate::prompt::PromptBuilder;
use crate::tools::{ToolKind, ToolRecord};
use crate::triage::utterance::{Exchange, Utterance};

const DEFAULT_PERSONA: &str = "You are a careful healthcare triage assistant. You never replace a doctor.";
const DEFAULT_INSTRUCTIONS: &str = "Use the diagnostic tool results below to assess the patient.\n\n{{context}}";
const DEFAULT_HISTORY: &str = "Recent conversation:\n{{history}}";
const DEFAULT_UTTERANCE: &str = "Patient message{{input_mode}}:\n{{utterance}}";

/// Everything gathered for one turn before the model is called.
#[derive(Debug, Clone, Default)]
pub struct ComposedContext {
    /// Records in invocation order.
    pub records: Vec<ToolRecord>,
    pub skipped: Vec<(ToolKind, String)>,
}

impl ComposedContext {
    pub fn invoked(&self) -> Vec<ToolKind> {
        self.records.iter().map(|r| r.tool).collect()
    }

    pub fn has_failure(&self) -> bool {
        self.records.iter().any(ToolRecord::is_failure)
    }

    /// Successful outputs rendered in invocation order, one section per tool.
    pub fn render(&self) -> String {
        let sections: Vec<String> = self
            .records
            .iter()
            .filter_map(|r| {
                r.outcome
                    .as_ref()
                    .ok()
                    .map(|out| format!("### {}\n{}", r.tool, out.render()))
            })
            .collect();
        if sections.is_empty() {
            "No diagnostic tools produced results for this message.".to_string()
        } else {
            sections.join("\n\n")
        }
    }
}

/// The two messages sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Assemble the prompt: persona as the system message; instructions with the
/// tool context, output format, few-shot examples, skipped tools, the last
/// `history_turns` exchanges and finally the utterance as the user message.
pub fn compose_prompt(
    prompts_dir: &Path,
    context: &ComposedContext,
    utterance: &Utterance,
    history: &[Exchange],
    history_turns: usize,
) -> Prompt {
    let system = PromptBuilder::new(prompts_dir)
        .layer_or("persona.md", DEFAULT_PERSONA)
        .build();

    let skipped: Vec<(String, String)> = context
        .skipped
        .iter()
        .map(|(tool, reason)| (tool.to_string(), reason.clone()))
        .collect();

    let recent = &history[history.len().saturating_sub(history_turns)..];
    let mut builder = PromptBuilder::new(prompts_dir)
        .layer_or("instructions.md", DEFAULT_INSTRUCTIONS)
        .layer("output_format.md")
        .layer("few_shot.md")
        .with_skipped(&skipped);
    if !recent.is_empty() {
        let rendered = recent
            .iter()
            .map(|ex| format!("Patient: {}\nAssistant: {}", ex.user.trim(), ex.assistant.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        builder = builder.layer_or("history.md", DEFAULT_HISTORY).var("history", rendered);
    }
    let input_mode = if utterance.is_voice() {
        " (transcribed from voice, may contain recognition errors)"
    } else {
        ""
    };
    let text = if utterance.text().is_empty() {
        "(no text, image only)"
    } else {
        utterance.text()
    };

    let user = builder
        .layer_or("utterance.md", DEFAULT_UTTERANCE)
        .var("context", context.render())
        .var("input_mode", input_mode)
        .var("utterance", text)
        .build();

    Prompt { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Classification, ToolFailure, ToolOutput};
    use std::path::PathBuf;

    fn prompts_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
    }

    fn classified(label: &str) -> ToolRecord {
        ToolRecord {
            tool: ToolKind::TextClassifier,
            outcome: Ok(ToolOutput::Classification(Classification {
                label: label.into(),
                confidence: 0.78,
                alternatives: vec![],
            })),
        }
    }

    #[test]
    fn context_renders_successes_in_order() {
        let ctx = ComposedContext {
            records: vec![
                classified("malaria"),
                ToolRecord { tool: ToolKind::Retriever, outcome: Ok(ToolOutput::Passages { passages: vec![] }) },
            ],
            skipped: vec![],
        };
        let text = ctx.render();
        let a = text.find("### text_classifier").unwrap();
        let b = text.find("### retriever").unwrap();
        assert!(a < b);
        assert!(!ctx.has_failure());
    }

    #[test]
    fn failures_are_detected() {
        let ctx = ComposedContext {
            records: vec![ToolRecord { tool: ToolKind::Retriever, outcome: Err(ToolFailure::Timeout(30)) }],
            skipped: vec![],
        };
        assert!(ctx.has_failure());
        assert_eq!(ctx.invoked(), vec![ToolKind::Retriever]);
    }

    #[test]
    fn utterance_comes_last_and_history_is_capped() {
        let ctx = ComposedContext { records: vec![classified("malaria")], skipped: vec![] };
        let history: Vec<Exchange> = (0..5)
            .map(|i| Exchange { user: format!("old question {i}"), assistant: format!("old answer {i}") })
            .collect();
        let prompt = compose_prompt(&prompts_dir(), &ctx, &Utterance::new("I have fever and chills"), &history, 2);

        assert!(!prompt.user.contains("old question 2"));
        assert!(prompt.user.contains("old question 3"));
        assert!(prompt.user.contains("old question 4"));
        let ctx_pos = prompt.user.find("Primary diagnosis: Malaria").unwrap();
        let hist_pos = prompt.user.find("old question 4").unwrap();
        let utt_pos = prompt.user.rfind("I have fever and chills").unwrap();
        assert!(ctx_pos < hist_pos && hist_pos < utt_pos);
        assert!(!prompt.system.is_empty());
    }

    #[test]
    fn skipped_tools_and_voice_flag_are_mentioned() {
        let ctx = ComposedContext {
            records: vec![],
            skipped: vec![(ToolKind::ImageClassifier, "no image attached".into())],
        };
        let prompt = compose_prompt(&prompts_dir(), &ctx, &Utterance::new("[VOICE] rash on arm"), &[], 6);
        assert!(prompt.user.contains("image_classifier: no image attached"));
        assert!(prompt.user.contains("transcribed from voice"));
        assert!(!prompt.user.contains("{{"));
    }

    #[test]
    fn defaults_apply_without_prompt_files() {
        let ctx = ComposedContext { records: vec![classified("dengue")], skipped: vec![] };
        let prompt = compose_prompt(Path::new("/nonexistent"), &ctx, &Utterance::new("fever"), &[], 6);
        assert_eq!(prompt.system, DEFAULT_PERSONA);
        assert!(prompt.user.ends_with("Patient message:\nfever"));
        assert!(prompt.user.contains("Primary diagnosis: Dengue"));
    }
}
