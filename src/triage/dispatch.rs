//! Turn dispatcher: route, gather tool results, compose, call the model.
//!
//! [`Dispatcher::handle_turn`] never fails. Every failure along the way is
//! turned into one of the fixed replies in [`crate::triage`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TriageConfig;
use crate::llm::{LlmProvider, ProviderError};
use crate::tools::{Tool, ToolFailure, ToolKind, ToolRecord};
use crate::triage::compose::{ComposedContext, compose_prompt};
use crate::triage::report::{Escalation, TriageReport, escalation_notice, escalation_section, parse_report};
use crate::triage::routing::IntentClassifier;
use crate::triage::utterance::{Exchange, Utterance};
use crate::triage::{DEGRADED_RESPONSE, EMPTY_INPUT_RESPONSE, LAST_RESORT_RESPONSE};

/// Which path produced the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// Model reply that validated as a report.
    Model,
    /// Model reply passed through as text.
    ModelUnstructured,
    /// A tool failed; the model was not called.
    Degraded,
    /// The model call failed.
    LastResort,
    /// Empty input.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub text: String,
    pub source: ReplySource,
    pub tools: Vec<ToolKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TriageReport>,
    pub emergency: bool,
}

pub struct Dispatcher {
    tools: Vec<Arc<dyn Tool>>,
    llm: LlmProvider,
    intents: IntentClassifier,
    escalation: Escalation,
    prompts_dir: PathBuf,
    history_turns: usize,
    tool_timeout_seconds: u64,
}

impl Dispatcher {
    /// `tools` may be given in any order; they always run in
    /// [`ToolKind::ORDER`]. Only the first tool of each kind is used.
    pub fn new(tools: Vec<Arc<dyn Tool>>, llm: LlmProvider, config: &TriageConfig) -> Self {
        Self {
            tools,
            llm,
            intents: IntentClassifier::new(&config.routing),
            escalation: Escalation::new(&config.high_risk_conditions),
            prompts_dir: config.prompts_dir.clone(),
            history_turns: config.history_turns,
            tool_timeout_seconds: config.tool_timeout_seconds,
        }
    }

    pub fn llm(&self) -> &LlmProvider {
        &self.llm
    }

    /// How many prior exchanges reach the prompt.
    pub fn history_turns(&self) -> usize {
        self.history_turns
    }

    pub fn tool_kinds(&self) -> Vec<ToolKind> {
        ToolKind::ORDER
            .into_iter()
            .filter(|k| self.tools.iter().any(|t| t.kind() == *k))
            .collect()
    }

    pub async fn handle_turn(&self, utterance: &Utterance, history: &[Exchange]) -> TurnReply {
        let turn_id = uuid::Uuid::now_v7();

        if utterance.is_empty() {
            info!(%turn_id, "rejecting empty input");
            return TurnReply {
                text: EMPTY_INPUT_RESPONSE.to_string(),
                source: ReplySource::Rejected,
                tools: Vec::new(),
                report: None,
                emergency: false,
            };
        }

        let context = self.gather(turn_id, utterance).await;
        let tools = context.invoked();
        let tool_risk = self.escalation.find(
            context
                .records
                .iter()
                .filter_map(|r| r.outcome.as_ref().ok())
                .flat_map(|out| out.condition_labels()),
        );

        if context.has_failure() {
            warn!(%turn_id, tools = ?tools, "tool failure, returning degraded reply");
            return TurnReply {
                text: DEGRADED_RESPONSE.to_string(),
                source: ReplySource::Degraded,
                tools,
                report: None,
                emergency: tool_risk.is_some(),
            };
        }

        let prompt = compose_prompt(&self.prompts_dir, &context, utterance, history, self.history_turns);
        debug!(%turn_id, prompt_len = prompt.user.len(), "prompt composed");

        let response = match self.llm.complete(&prompt.user, Some(&prompt.system)).await {
            Ok(r) if !r.text.trim().is_empty() => r,
            Ok(_) => {
                warn!(%turn_id, "model returned empty text");
                return self.last_resort(tools, tool_risk.is_some());
            }
            Err(ProviderError::Timeout(seconds)) => {
                warn!(%turn_id, seconds, "model call timed out");
                return self.last_resort(tools, tool_risk.is_some());
            }
            Err(e) => {
                warn!(%turn_id, error = %e, "model call failed");
                return self.last_resort(tools, tool_risk.is_some());
            }
        };
        if let Some(usage) = response.usage {
            debug!(%turn_id, input_tokens = usage.input_tokens, output_tokens = usage.output_tokens, "model usage");
        }

        let (mut text, source, mut report) = match parse_report(&response.text) {
            Ok(report) => (String::new(), ReplySource::Model, Some(report)),
            Err(e) => {
                info!(%turn_id, reason = %e, "model reply is unstructured, passing through");
                (response.text.trim().to_string(), ReplySource::ModelUnstructured, None)
            }
        };

        let risk = tool_risk.or_else(|| {
            report.as_ref().and_then(|r| {
                self.escalation.find(
                    std::iter::once(r.primary_diagnosis.as_str())
                        .chain(r.differentials.iter().map(String::as_str)),
                )
            })
        });

        let mut emergency = report.as_ref().is_some_and(|r| r.emergency);
        if let Some(condition) = &risk {
            emergency = true;
            info!(%turn_id, condition = %condition, "high-risk condition, escalating");
        }

        if let Some(r) = report.as_mut() {
            if let Some(condition) = &risk {
                r.emergency = true;
                r.escalation = Some(escalation_notice(condition));
            }
            text = r.render();
        } else if let Some(condition) = &risk {
            text.push_str("\n\n");
            text.push_str(&escalation_section(condition));
        }

        info!(%turn_id, source = ?source, emergency, tools = ?tools, "turn complete");
        TurnReply { text, source, tools, report, emergency }
    }

    /// Run each tool whose capability the turn needs, in order. Failures
    /// are recorded and do not stop later tools.
    async fn gather(&self, turn_id: uuid::Uuid, utterance: &Utterance) -> ComposedContext {
        let intent = self.intents.classify(utterance);
        let plan = self.intents.plan(&intent);
        debug!(%turn_id, ?intent, "intent classified");

        let mut context = ComposedContext::default();
        for kind in ToolKind::ORDER {
            let Some(tool) = self.tools.iter().find(|t| t.kind() == kind) else {
                // A required capability with no tool behind it is a missing dependency.
                if plan.requires(kind.capability()) {
                    warn!(%turn_id, tool = %kind, "required tool is not configured");
                    context.records.push(ToolRecord {
                        tool: kind,
                        outcome: Err(ToolFailure::Unavailable(format!("{kind} is not configured"))),
                    });
                }
                continue;
            };

            let capability = tool.capability();
            if !plan.requires(capability) {
                let reason = plan.skip_reason(capability).unwrap_or("not needed for this message");
                info!(%turn_id, tool = %kind, reason, "tool skipped");
                context.skipped.push((kind, reason.to_string()));
                continue;
            }

            let outcome = match tokio::time::timeout(
                Duration::from_secs(self.tool_timeout_seconds),
                tool.invoke(utterance),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolFailure::Timeout(self.tool_timeout_seconds)),
            };
            match &outcome {
                Ok(_) => info!(%turn_id, tool = %kind, "tool succeeded"),
                Err(e) => warn!(%turn_id, tool = %kind, error = %e, "tool failed"),
            }
            context.records.push(ToolRecord { tool: kind, outcome });
        }
        context
    }

    fn last_resort(&self, tools: Vec<ToolKind>, emergency: bool) -> TurnReply {
        TurnReply {
            text: LAST_RESORT_RESPONSE.to_string(),
            source: ReplySource::LastResort,
            tools,
            report: None,
            emergency,
        }
    }
}
