//! One turn of user input and the conversation history around it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const VOICE_MARKER: &str = "[VOICE]";

/// Where the attached image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Path(PathBuf),
    Url(String),
    /// Base64 payload, without any `data:` prefix.
    Inline(String),
}

impl ImageRef {
    /// `http(s)://` → URL, `data:...;base64,` → inline, anything else → path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            ImageRef::Url(raw.to_string())
        } else if let Some(rest) = raw.strip_prefix("data:") {
            let payload = rest.split_once(',').map(|(_, p)| p).unwrap_or(rest);
            ImageRef::Inline(payload.to_string())
        } else {
            ImageRef::Path(PathBuf::from(raw))
        }
    }

    /// Inline base64, tolerating a `data:` URL prefix.
    pub fn inline(encoded: &str) -> Self {
        match Self::parse(encoded) {
            inline @ ImageRef::Inline(_) => inline,
            _ => ImageRef::Inline(encoded.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    voice: bool,
    image: Option<ImageRef>,
}

impl Utterance {
    /// Build from raw input. A leading `[VOICE]` marker (any case) sets the
    /// voice flag and is stripped.
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim_start();
        let marker_len = VOICE_MARKER.len();
        let voice = trimmed
            .get(..marker_len)
            .is_some_and(|head| head.eq_ignore_ascii_case(VOICE_MARKER));
        let text = if voice { &trimmed[marker_len..] } else { raw };
        Self { text: text.trim().to_string(), voice, image: None }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_voice(mut self, voice: bool) -> Self {
        self.voice = self.voice || voice;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_voice(&self) -> bool {
        self.voice
    }

    pub fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }

    /// Blank text and no image.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.image.is_none()
    }
}

/// One prior user/assistant pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}
