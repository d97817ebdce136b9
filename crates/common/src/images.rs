// Embedded image codec for markdown exchanged with agents.
//
// Inline `![caption](data:image/<mime>;base64,<data> "title")` tags are
// swapped for `[image:N]` placeholders on the way out and restored from the
// recorded image list on the way back in.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// An image lifted out of markdown. `mime_type` is the subtype only (`png`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub caption: String,
    pub mime_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl EmbeddedImage {
    /// Full mime type as used by protocol image blocks.
    pub fn media_type(&self) -> String {
        format!("image/{}", self.mime_type)
    }

    /// Canonical markdown tag for this image.
    pub fn to_markdown(&self) -> String {
        match &self.title {
            Some(title) => format!(
                "![{}](data:image/{};base64,{} \"{}\")",
                self.caption, self.mime_type, self.data, title
            ),
            None => format!("![{}](data:image/{};base64,{})", self.caption, self.mime_type, self.data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMarkdown {
    pub markdown: String,
    pub images: Vec<EmbeddedImage>,
}

fn image_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"!\[([^\]]*)\]\(data:image/([^;\s)]+);base64,([A-Za-z0-9+/=]+)(?:\s+"([^"]*)")?\)"#,
        )
        .expect("embedded image pattern should compile")
    })
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[image:(\d+)\]").expect("image placeholder pattern should compile")
    })
}

pub fn placeholder(index: usize) -> String {
    format!("[image:{index}]")
}

/// Replace every embedded image with a numbered placeholder, left to right.
pub fn extract_images(markdown: &str) -> ExtractedMarkdown {
    let mut images = Vec::new();
    let markdown = replace_images_with(markdown, |image| {
        images.push(image);
        images.len() - 1
    });

    ExtractedMarkdown { markdown, images }
}

/// Replace each embedded image with `[image:N]`, where `assign` picks `N`.
pub fn replace_images_with<F>(markdown: &str, mut assign: F) -> String
where
    F: FnMut(EmbeddedImage) -> usize,
{
    image_tag_pattern()
        .replace_all(markdown, |caps: &Captures<'_>| {
            let index = assign(EmbeddedImage {
                caption: caps[1].to_string(),
                mime_type: caps[2].to_string(),
                data: caps[3].to_string(),
                title: caps.get(4).map(|m| m.as_str().to_string()),
            });
            placeholder(index)
        })
        .into_owned()
}

/// Substitute placeholders with their image tags. Unknown indices stay as-is.
pub fn restore_images(markdown: &str, images: &[EmbeddedImage]) -> String {
    placeholder_pattern()
        .replace_all(markdown, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|index| images.get(index))
                .map(EmbeddedImage::to_markdown)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

pub fn contains_embedded_images(markdown: &str) -> bool {
    image_tag_pattern().is_match(markdown)
}
