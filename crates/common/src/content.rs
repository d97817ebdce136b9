// Typed view of a node's stored content.
//
// Content is persisted as text. Markdown nodes hold `{"markdown", "images"}`
// and whiteboard nodes hold `{"raw", "image"}`; unknown keys ride along in
// `extra` so a round trip through this type never drops data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::images::{extract_images, restore_images, EmbeddedImage};
use crate::types::NodeKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarkdownContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<EmbeddedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WhiteboardContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Legacy rendered preview as a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Markdown(MarkdownContent),
    Whiteboard(WhiteboardContent),
}

/// Result of preparing markdown for an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentMarkdownView {
    pub text: String,
    /// `images[N]` is the image behind `[image:N]` in `text`.
    pub images: Vec<EmbeddedImage>,
    /// True when new images were lifted out and the stored images list grew.
    pub changed: bool,
}

impl NodeContent {
    /// Decode stored text leniently. Non-JSON text becomes the body itself.
    pub fn from_stored(kind: NodeKind, stored: &str) -> Self {
        Self::from_value(kind, value_from_stored_text(stored))
    }

    pub fn from_value(kind: NodeKind, value: Value) -> Self {
        match kind {
            NodeKind::Markdown => Self::Markdown(match value {
                Value::String(markdown) => {
                    MarkdownContent { markdown: Some(markdown), ..MarkdownContent::default() }
                }
                Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| {
                    MarkdownContent { extra: object_or_empty(value), ..MarkdownContent::default() }
                }),
                Value::Null => MarkdownContent::default(),
                other => MarkdownContent { text: Some(other.to_string()), ..Default::default() },
            }),
            NodeKind::Whiteboard => Self::Whiteboard(match value {
                Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| {
                    WhiteboardContent { extra: object_or_empty(value), ..Default::default() }
                }),
                Value::Null => WhiteboardContent::default(),
                other => WhiteboardContent { raw: Some(other), ..Default::default() },
            }),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Markdown(_) => NodeKind::Markdown,
            Self::Whiteboard(_) => NodeKind::Whiteboard,
        }
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            Self::Markdown(content) => serde_json::to_value(content),
            Self::Whiteboard(content) => serde_json::to_value(content),
        };
        encoded.unwrap_or(Value::Null)
    }

    pub fn to_stored(&self) -> String {
        self.to_value().to_string()
    }

    /// Build content from agent-supplied text.
    ///
    /// Markdown placeholders are resolved with the numbering an agent saw when
    /// reading `previous`. Recorded images are retained in full. Whiteboard
    /// text must be JSON.
    pub fn from_agent_text(
        kind: NodeKind,
        text: &str,
        previous: Option<&NodeContent>,
    ) -> Result<Self, serde_json::Error> {
        match kind {
            NodeKind::Markdown => {
                let (numbered, images) = match previous {
                    Some(Self::Markdown(content)) => {
                        let numbered = content.agent_numbering();
                        let mut images = content.images.clone();
                        record_new(&mut images, &numbered);
                        (numbered, images)
                    }
                    _ => (Vec::new(), Vec::new()),
                };
                Ok(Self::Markdown(MarkdownContent {
                    markdown: Some(restore_images(text, &numbered)),
                    images,
                    ..MarkdownContent::default()
                }))
            }
            NodeKind::Whiteboard => {
                let raw: Value = serde_json::from_str(text)?;
                Ok(Self::Whiteboard(WhiteboardContent { raw: Some(raw), ..Default::default() }))
            }
        }
    }
}

impl MarkdownContent {
    /// Strip embedded images for an agent and record them in `images`.
    ///
    /// Placeholders are numbered in reading order. Images not seen before are
    /// appended to the recorded list. The stored markdown keeps its inline tags.
    pub fn agent_view(&mut self) -> Option<AgentMarkdownView> {
        let extracted = extract_images(self.markdown.as_deref()?);
        let changed = record_new(&mut self.images, &extracted.images);

        Some(AgentMarkdownView { text: extracted.markdown, images: extracted.images, changed })
    }

    /// The list an agent's `[image:N]` refers to: embedded images in reading
    /// order, then recorded images the markdown no longer embeds.
    fn agent_numbering(&self) -> Vec<EmbeddedImage> {
        let mut numbered = match self.markdown.as_deref() {
            Some(markdown) => extract_images(markdown).images,
            None => Vec::new(),
        };
        record_new(&mut numbered, &self.images);
        numbered
    }
}

/// Append the images of `found` missing from `recorded`. True if any were.
fn record_new(recorded: &mut Vec<EmbeddedImage>, found: &[EmbeddedImage]) -> bool {
    let before = recorded.len();
    for image in found {
        if !recorded.contains(image) {
            recorded.push(image.clone());
        }
    }
    recorded.len() != before
}

fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Parse stored text as JSON, falling back to a plain string.
pub fn value_from_stored_text(stored: &str) -> Value {
    serde_json::from_str(stored).unwrap_or_else(|_| Value::String(stored.to_string()))
}

/// Inverse of [`value_from_stored_text`]: strings are stored verbatim.
pub fn stored_text_from_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
