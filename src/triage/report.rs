//! Structured triage result parsed from the model reply.
//!
//! The model is asked for one JSON object. [`parse_report`] tolerates code
//! fences and prose around it, then validates the fields. A valid report is
//! rendered to the section-tag format used for text-to-speech narration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::triage::routing::matches_at_word_start;

#[derive(Debug, Error, PartialEq)]
pub enum ReportError {
    #[error("no JSON object in model reply")]
    NoJson,
    #[error("report JSON did not parse: {0}")]
    Parse(String),
    #[error("report failed validation: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageReport {
    #[serde(deserialize_with = "one_or_many")]
    pub symptoms: Vec<String>,
    pub primary_diagnosis: String,
    pub confidence: f32,
    #[serde(default, deserialize_with = "one_or_many")]
    pub differentials: Vec<String>,
    pub first_aid: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub emergency: bool,
    /// Set by the dispatcher when a high-risk condition forced escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<String>,
}

impl TriageReport {
    /// Render to tagged sections.
    pub fn render(&self) -> String {
        let mut sections = vec![
            tagged("SYMPTOMS", &self.symptoms.join(", ")),
            tagged(
                "PRIMARY DIAGNOSIS",
                &format!("{} (Confidence: {:.0}%)", self.primary_diagnosis, self.confidence * 100.0),
            ),
        ];
        if !self.differentials.is_empty() {
            sections.push(tagged("DIFFERENTIAL DIAGNOSIS", &self.differentials.join(", ")));
        }
        sections.push(tagged("FIRST AID", &self.first_aid));
        if !self.recommendation.trim().is_empty() {
            sections.push(tagged("RECOMMENDATION", &self.recommendation));
        }
        if self.emergency {
            let reason = self
                .escalation
                .as_deref()
                .unwrap_or("Seek medical care immediately.");
            sections.push(tagged("EMERGENCY", reason));
        }
        sections.join("\n")
    }

    fn validate(mut self) -> Result<Self, ReportError> {
        self.symptoms = clean_list(self.symptoms);
        self.differentials = clean_list(self.differentials);
        self.primary_diagnosis = self.primary_diagnosis.trim().to_string();
        self.first_aid = self.first_aid.trim().to_string();
        self.recommendation = self.recommendation.trim().to_string();
        self.escalation = None;

        if self.symptoms.is_empty() {
            return Err(ReportError::Invalid("symptoms is empty".into()));
        }
        if self.primary_diagnosis.is_empty() {
            return Err(ReportError::Invalid("primary_diagnosis is empty".into()));
        }
        if self.first_aid.is_empty() {
            return Err(ReportError::Invalid("first_aid is empty".into()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ReportError::Invalid(format!(
                "confidence {} is outside [0, 1]",
                self.confidence
            )));
        }
        Ok(self)
    }
}

fn tagged(tag: &str, body: &str) -> String {
    format!("[{tag}] {} [/{tag}]", body.trim())
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    })
}

/// Extract, parse and validate the report in `reply`.
pub fn parse_report(reply: &str) -> Result<TriageReport, ReportError> {
    let json = extract_json(reply).ok_or(ReportError::NoJson)?;
    let report: TriageReport =
        serde_json::from_str(json).map_err(|e| ReportError::Parse(e.to_string()))?;
    report.validate()
}

/// The JSON object inside `reply`: a fenced block's body when present,
/// otherwise the span from the first `{` to the last `}`.
fn extract_json(reply: &str) -> Option<&str> {
    let body = match reply.find("```") {
        Some(start) => {
            let after = &reply[start + 3..];
            let after = after.strip_prefix("json").unwrap_or(after);
            match after.find("```") {
                Some(end) => &after[..end],
                None => after,
            }
        }
        None => reply,
    };
    let open = body.find('{')?;
    let close = body.rfind('}')?;
    (open < close).then(|| &body[open..=close])
}

/// Deterministic high-risk matching, independent of what the model wrote.
#[derive(Debug, Clone)]
pub struct Escalation {
    conditions: Vec<String>,
}

impl Escalation {
    pub fn new(conditions: &[String]) -> Self {
        Self {
            conditions: conditions
                .iter()
                .map(|c| normalize_condition(c))
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    /// The first configured condition found in any candidate name.
    pub fn find<'a, I>(&self, candidates: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let candidates: Vec<String> = candidates.into_iter().map(normalize_condition).collect();
        self.conditions
            .iter()
            .find(|cond| candidates.iter().any(|cand| matches_at_word_start(cand, cond)))
            .cloned()
    }
}

fn normalize_condition(s: &str) -> String {
    s.replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Notice appended to any reply that was escalated.
pub fn escalation_notice(condition: &str) -> String {
    format!(
        "Possible {condition} is a high-risk condition. Please seek in-person medical care promptly, \
         and go to the nearest emergency department if symptoms are severe or getting worse."
    )
}

/// The escalation notice as a standalone `[EMERGENCY]` section, for replies
/// that did not validate as a report.
pub fn escalation_section(condition: &str) -> String {
    tagged("EMERGENCY", &escalation_notice(condition))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "symptoms": ["fever", "chills"],
        "primary_diagnosis": "Malaria",
        "confidence": 0.78,
        "differentials": ["Dengue", " "],
        "first_aid": "Rest and drink fluids.",
        "recommendation": "Get a blood smear test.",
        "emergency": false
    }"#;

    #[test]
    fn parses_bare_json() {
        let r = parse_report(VALID).unwrap();
        assert_eq!(r.symptoms, vec!["fever", "chills"]);
        assert_eq!(r.differentials, vec!["Dengue"]);
    }

    #[test]
    fn tolerates_fences_and_prose() {
        let reply = format!("Here is my assessment:\n```json\n{VALID}\n```\nTake care!");
        assert_eq!(parse_report(&reply).unwrap().primary_diagnosis, "Malaria");
    }

    #[test]
    fn symptoms_as_comma_string() {
        let reply = VALID.replace(r#"["fever", "chills"]"#, r#""fever, chills""#);
        assert_eq!(parse_report(&reply).unwrap().symptoms, vec!["fever", "chills"]);
    }

    #[test]
    fn validation_failures() {
        assert_eq!(parse_report("no json here"), Err(ReportError::NoJson));
        assert!(matches!(parse_report("{\"symptoms\": 3}"), Err(ReportError::Parse(_))));
        let bad_conf = VALID.replace("0.78", "78");
        assert!(matches!(parse_report(&bad_conf), Err(ReportError::Invalid(_))));
        let no_first_aid = VALID.replace("Rest and drink fluids.", " ");
        assert!(matches!(parse_report(&no_first_aid), Err(ReportError::Invalid(_))));
    }

    #[test]
    fn model_supplied_escalation_is_discarded() {
        let reply = VALID.replace("\"emergency\": false", "\"emergency\": false, \"escalation\": \"x\"");
        assert_eq!(parse_report(&reply).unwrap().escalation, None);
    }

    #[test]
    fn render_uses_section_tags() {
        let text = parse_report(VALID).unwrap().render();
        assert!(text.starts_with("[SYMPTOMS] fever, chills [/SYMPTOMS]"));
        assert!(text.contains("[PRIMARY DIAGNOSIS] Malaria (Confidence: 78%) [/PRIMARY DIAGNOSIS]"));
        assert!(text.contains("[FIRST AID] Rest and drink fluids. [/FIRST AID]"));
        assert!(!text.contains("[EMERGENCY]"));
    }

    #[test]
    fn escalated_report_renders_one_emergency_section() {
        let mut r = parse_report(VALID).unwrap();
        r.emergency = true;
        r.escalation = Some(escalation_notice("malaria"));
        let text = r.render();
        assert_eq!(text.matches("[EMERGENCY]").count(), 1);
        assert!(text.ends_with("[/EMERGENCY]"));
        assert!(escalation_section("dengue").starts_with("[EMERGENCY] Possible dengue"));
    }

    #[test]
    fn escalation_matches_labels_and_phrases() {
        let e = Escalation::new(&["malaria".into(), "heart attack".into(), "tuberculosis".into()]);
        assert_eq!(e.find(["fever_malaria"]), Some("malaria".into()));
        assert_eq!(e.find(["Possible Heart  Attack"]), Some("heart attack".into()));
        assert_eq!(e.find(["common cold", "eczema"]), None);
        assert_eq!(e.find(["pulmonary tuberculosis"]), Some("tuberculosis".into()));
    }
}
