//! Class-index → condition-name mapping.
//!
//! Classifier backends may answer with a bare class index or a generic
//! `LABEL_n` name. The [`LabelSet`] turns those into condition names. It is
//! loaded once at startup and never fails: a missing or malformed file
//! yields the built-in fallback list with a warning.

use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

/// Labels used when `labels.json` is missing or unreadable.
pub const FALLBACK_LABELS: [&str; 6] =
    ["fever_malaria", "dengue", "covid", "typhoid", "pneumonia", "tb"];

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("cannot read labels file: {0}")]
    Io(#[from] std::io::Error),
    #[error("labels file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported labels layout: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
    fallback: bool,
}

impl LabelSet {
    /// Load from `path`, falling back to [`FALLBACK_LABELS`] on any error.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(set) => {
                info!(path = %path.display(), labels = set.len(), "label set loaded");
                set
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using fallback labels");
                Self::fallback()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, LabelError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse one of the accepted layouts:
    ///
    /// - `{"class_names": [..]}`
    /// - `{"id2label": {"0": .., "1": ..}, "num_labels": n}`
    /// - a plain list of names
    /// - an object of `index → name` pairs
    pub fn from_json(raw: &str) -> Result<Self, LabelError> {
        let value: Value = serde_json::from_str(raw)?;
        let labels = match &value {
            Value::Object(map) if map.contains_key("class_names") => {
                string_list(&map["class_names"], "class_names")?
            }
            Value::Object(map) if map.contains_key("id2label") => {
                let id2label = map["id2label"]
                    .as_object()
                    .ok_or_else(|| LabelError::Shape("id2label must be an object".into()))?;
                let count = match map.get("num_labels") {
                    Some(n) => n
                        .as_u64()
                        .ok_or_else(|| LabelError::Shape("num_labels must be an integer".into()))?
                        as usize,
                    None => id2label.len(),
                };
                (0..count)
                    .map(|i| {
                        id2label
                            .get(&i.to_string())
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .ok_or_else(|| LabelError::Shape(format!("id2label is missing index {i}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            Value::Array(_) => string_list(&value, "top-level list")?,
            Value::Object(map) => {
                let mut indexed = map
                    .iter()
                    .map(|(k, v)| {
                        let idx = k.parse::<usize>().map_err(|_| {
                            LabelError::Shape(format!("object key '{k}' is not a class index"))
                        })?;
                        let name = v.as_str().ok_or_else(|| {
                            LabelError::Shape(format!("label for index {k} is not a string"))
                        })?;
                        Ok((idx, name.to_string()))
                    })
                    .collect::<Result<Vec<_>, LabelError>>()?;
                indexed.sort_by_key(|(idx, _)| *idx);
                indexed.into_iter().map(|(_, name)| name).collect()
            }
            _ => return Err(LabelError::Shape("expected a JSON list or object".into())),
        };

        if labels.is_empty() {
            return Err(LabelError::Shape("no labels defined".into()));
        }
        Ok(Self { labels, fallback: false })
    }

    pub fn fallback() -> Self {
        Self {
            labels: FALLBACK_LABELS.iter().map(|s| s.to_string()).collect(),
            fallback: true,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Map a backend label to a condition name. `LABEL_n` and bare digits are
    /// looked up by index; anything else is returned as-is.
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let index = trimmed
            .strip_prefix("LABEL_")
            .unwrap_or(trimmed)
            .parse::<usize>()
            .ok();
        match index {
            Some(i) => self.get(i).map(str::to_string),
            None if trimmed.is_empty() => None,
            None => Some(trimmed.to_string()),
        }
    }
}

fn string_list(value: &Value, what: &str) -> Result<Vec<String>, LabelError> {
    value
        .as_array()
        .ok_or_else(|| LabelError::Shape(format!("{what} must be a list")))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| LabelError::Shape(format!("{what} contains a non-string entry")))
        })
        .collect()
}

/// `fever_malaria` → `Fever Malaria`. Each letter that follows a non-letter
/// is upper-cased and every other letter lower-cased.
pub fn humanize(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut prev_alpha = false;
    for ch in label.trim().chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn class_names_layout() {
        let set = LabelSet::from_json(r#"{"class_names": ["acne", "eczema"], "num_labels": 2}"#).unwrap();
        assert_eq!(set.get(1), Some("eczema"));
        assert!(!set.is_fallback());
    }

    #[test]
    fn id2label_layout_orders_by_index() {
        let set = LabelSet::from_json(
            r#"{"id2label": {"1": "dengue", "0": "fever_malaria", "2": "covid"}, "num_labels": 3}"#,
        )
        .unwrap();
        assert_eq!(set.get(0), Some("fever_malaria"));
        assert_eq!(set.get(2), Some("covid"));
    }

    #[test]
    fn id2label_missing_index_rejected() {
        let err = LabelSet::from_json(r#"{"id2label": {"0": "a"}, "num_labels": 2}"#).unwrap_err();
        assert!(matches!(err, LabelError::Shape(_)));
    }

    #[test]
    fn plain_list_and_indexed_object() {
        let list = LabelSet::from_json(r#"["a", "b"]"#).unwrap();
        assert_eq!(list.len(), 2);
        let obj = LabelSet::from_json(r#"{"10": "k", "2": "c"}"#).unwrap();
        assert_eq!(obj.get(0), Some("c"));
        assert_eq!(obj.get(1), Some("k"));
    }

    #[test]
    fn missing_file_uses_fallback() {
        let set = LabelSet::load(Path::new("/nonexistent/labels.json"));
        assert!(set.is_fallback());
        assert_eq!(set.get(0), Some("fever_malaria"));
        assert_eq!(set.len(), FALLBACK_LABELS.len());
    }

    #[test]
    fn malformed_file_uses_fallback() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{not json").unwrap();
        let set = LabelSet::load(f.path());
        assert!(set.is_fallback());
    }

    #[test]
    fn empty_list_is_an_error() {
        assert!(LabelSet::from_json("[]").is_err());
    }

    #[test]
    fn resolve_generic_and_named_labels() {
        let set = LabelSet::fallback();
        assert_eq!(set.resolve("LABEL_1").as_deref(), Some("dengue"));
        assert_eq!(set.resolve("3").as_deref(), Some("typhoid"));
        assert_eq!(set.resolve("measles").as_deref(), Some("measles"));
        assert_eq!(set.resolve("LABEL_99"), None);
        assert_eq!(set.resolve("  "), None);
    }

    #[test]
    fn humanize_matches_title_case() {
        assert_eq!(humanize("fever_malaria"), "Fever Malaria");
        assert_eq!(humanize("tb"), "Tb");
        assert_eq!(humanize("COVID"), "Covid");
        assert_eq!(humanize("Malaria"), "Malaria");
        assert_eq!(humanize("type_2_diabetes"), "Type 2 Diabetes");
    }
}
