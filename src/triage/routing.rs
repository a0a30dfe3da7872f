//! Intent classification and capability routing.
//!
//! The utterance is matched against two keyword lexicons. The resulting
//! [`RoutePlan`] says which [`Capability`]s the turn needs, and why each
//! unneeded one is skipped.

use crate::config::RoutingConfig;
use crate::tools::Capability;
use crate::triage::utterance::Utterance;

/// Keyword hits found in one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Intent {
    pub symptom_keywords: Vec<String>,
    pub visual_keywords: Vec<String>,
    pub has_text: bool,
    pub has_image: bool,
}

/// Capabilities a turn needs, plus the reasons for the ones it doesn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    required: Vec<Capability>,
    skipped: Vec<(Capability, String)>,
}

impl RoutePlan {
    pub fn requires(&self, capability: Capability) -> bool {
        self.required.contains(&capability)
    }

    pub fn skip_reason(&self, capability: Capability) -> Option<&str> {
        self.skipped
            .iter()
            .find(|(c, _)| *c == capability)
            .map(|(_, reason)| reason.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    text_keywords: Vec<String>,
    visual_keywords: Vec<String>,
    route_unmatched_to_text: bool,
}

impl IntentClassifier {
    pub fn new(config: &RoutingConfig) -> Self {
        let normalize = |words: &[String]| {
            words
                .iter()
                .map(|w| normalize_text(w))
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            text_keywords: normalize(&config.text_keywords),
            visual_keywords: normalize(&config.visual_keywords),
            route_unmatched_to_text: config.route_unmatched_to_text,
        }
    }

    pub fn classify(&self, utterance: &Utterance) -> Intent {
        let text = normalize_text(utterance.text());
        let hits = |lexicon: &[String]| {
            lexicon
                .iter()
                .filter(|k| matches_at_word_start(&text, k))
                .cloned()
                .collect::<Vec<_>>()
        };
        Intent {
            symptom_keywords: hits(&self.text_keywords),
            visual_keywords: hits(&self.visual_keywords),
            has_text: !text.is_empty(),
            has_image: utterance.image().is_some(),
        }
    }

    pub fn plan(&self, intent: &Intent) -> RoutePlan {
        let mut required = vec![Capability::Background];
        let mut skipped = Vec::new();

        if intent.has_image {
            required.push(Capability::SymptomImage);
        } else if !intent.visual_keywords.is_empty() {
            skipped.push((
                Capability::SymptomImage,
                "visual symptoms described but no image attached".to_string(),
            ));
        } else {
            skipped.push((Capability::SymptomImage, "no image attached".to_string()));
        }

        let text_needed = !intent.symptom_keywords.is_empty()
            || (self.route_unmatched_to_text && intent.has_text && !intent.has_image);
        if text_needed {
            required.push(Capability::SymptomText);
        } else {
            let reason = if !intent.has_text {
                "no symptom text provided"
            } else if intent.has_image {
                "no text symptoms described; the attached image is analyzed instead"
            } else {
                "no recognised symptom keywords"
            };
            skipped.push((Capability::SymptomText, reason.to_string()));
        }

        RoutePlan { required, skipped }
    }
}

/// Lowercase and collapse runs of whitespace to one space.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// True when `needle` occurs in `haystack` starting at a word boundary.
pub(crate) fn matches_at_word_start(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}
