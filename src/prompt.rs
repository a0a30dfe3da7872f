//! Layered prompt builder.
//!
//! Triage prompts are assembled from plain-text fragments stored under
//! `config/prompts/`. Each layer is appended in order; missing files are
//! skipped so layers can be optional.
//!
//! ## Layer ordering
//!
//! ```text
//! persona.md        system message (who the assistant is)
//! instructions.md   task instructions, {{context}} placeholder
//! output_format.md  JSON report schema the model must follow
//! few_shot.md       worked examples
//! not_consulted.md  {{skipped}} placeholder, tools not run this turn
//! history.md        {{history}} placeholder
//! utterance.md      {{utterance}} placeholder, always last
//! ```
//!
//! Variable substitution uses `{{key}}` syntax and is applied once at
//! [`build()`](PromptBuilder::build) time, after all layers are joined.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

const SEPARATOR: &str = "\n\n";

/// Fluent builder that assembles a layered prompt from template files.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append a layer by loading `filename` from the prompts directory.
    /// Skips the layer when the file does not exist.
    pub fn layer(self, filename: &str) -> Self {
        self.layer_or(filename, "")
    }

    /// Like [`layer`](Self::layer), but appends `fallback` when the file is
    /// missing. Used for layers whose placeholders must always be present.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                tracing::debug!("prompt: layer '{}' not found, using fallback", path.display());
                fallback.to_string()
            }
        };
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Load `not_consulted.md` and substitute `{{skipped}}` with one
    /// `- tool: reason` line per skipped tool. Adds nothing when no tool was
    /// skipped.
    pub fn with_skipped(self, skipped: &[(String, String)]) -> Self {
        if skipped.is_empty() {
            return self;
        }
        let lines = skipped
            .iter()
            .map(|(tool, reason)| format!("- {tool}: {reason}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.layer_or(
            "not_consulted.md",
            "The following tools were not consulted for this message:\n{{skipped}}",
        )
        .var("skipped", lines)
    }

    /// Directly append a text fragment.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Register a single `{{key}}` → `value` substitution.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Assemble all layers, join with blank lines, and apply substitution.
    ///
    /// Substitution is a single left-to-right pass over the joined template,
    /// so text inserted from a variable is never itself expanded. A user who
    /// types `{{context}}` gets those literal characters back.
    pub fn build(self) -> String {
        let template = self.parts.join(SEPARATOR);
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let key = &after[..end];
                    match self.vars.get(key) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push_str("{{");
                            out.push_str(key);
                            out.push_str("}}");
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
    }

    #[test]
    fn builder_assembles_layers_in_order() {
        let result = PromptBuilder::new(prompts_dir())
            .layer("instructions.md")
            .layer("output_format.md")
            .build();
        let instr = result.find("{{context}}").expect("instructions layer present");
        let format = result.find("primary_diagnosis").expect("output format layer present");
        assert!(instr < format);
    }

    #[test]
    fn builder_skips_missing_file() {
        let result = PromptBuilder::new(prompts_dir())
            .layer("nonexistent_file_xyz.md")
            .append("hello")
            .build();
        assert_eq!(result, "hello");
    }

    #[test]
    fn fallback_used_when_layer_missing() {
        let result = PromptBuilder::new("/nonexistent")
            .layer_or("utterance.md", "Patient: {{utterance}}")
            .var("utterance", "sore throat")
            .build();
        assert_eq!(result, "Patient: sore throat");
    }

    #[test]
    fn builder_substitutes_variable() {
        let result = PromptBuilder::new(prompts_dir())
            .append("Items: {{items}}")
            .var("items", "item1\nitem2")
            .build();
        assert!(result.contains("item1\nitem2"));
        assert!(!result.contains("{{items}}"));
    }

    #[test]
    fn substituted_text_is_not_reexpanded() {
        let result = PromptBuilder::new("/nonexistent")
            .append("A={{a}} B={{b}}")
            .var("a", "{{b}}")
            .var("b", "bee")
            .build();
        assert_eq!(result, "A={{b}} B=bee");
    }

    #[test]
    fn unknown_placeholder_left_intact() {
        let result = PromptBuilder::new("/nonexistent").append("x {{missing}} y {{").build();
        assert_eq!(result, "x {{missing}} y {{");
    }

    #[test]
    fn skipped_tools_rendered_one_per_line() {
        let skipped = vec![
            ("image_classifier".to_string(), "no image attached".to_string()),
            ("text_classifier".to_string(), "no symptom keywords".to_string()),
        ];
        let result = PromptBuilder::new(prompts_dir()).with_skipped(&skipped).build();
        assert!(result.contains("- image_classifier: no image attached"));
        assert!(result.contains("- text_classifier: no symptom keywords"));
        assert!(!result.contains("{{skipped}}"));
    }

    #[test]
    fn no_skipped_tools_adds_nothing() {
        let result = PromptBuilder::new(prompts_dir()).with_skipped(&[]).build();
        assert!(result.is_empty());
    }
}
