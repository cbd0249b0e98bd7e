//! Document elements and their processed (embedding-bearing) counterparts.
//!
//! Originals are stored with the tagged payload `{"type": ..., "content": ...}`; processed
//! records add a `reference` back-pointer to the original's identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of extracted document content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Narrative text block.
    Text,
    /// Table rendered as text.
    Table,
    /// Base64-encoded image bytes.
    Image,
}

impl ElementKind {
    /// Lowercase label used in payloads and the registry.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElementKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "image" => Ok(Self::Image),
            _ => Err(()),
        }
    }
}

/// A unit of document content, tagged by kind. Immutable once stored.
///
/// `id` is the extraction id before storage and the store id after resolution; it is never
/// part of the stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Element {
    /// Extracted text block.
    Text {
        /// Element identifier, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Text payload.
        content: String,
    },
    /// Table rendered as text.
    Table {
        /// Element identifier, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Table text.
        content: String,
    },
    /// Image bytes.
    Image {
        /// Element identifier, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Base64-encoded image.
        content: String,
    },
}

impl Element {
    /// Build an element of `kind`.
    pub fn new(kind: ElementKind, id: Option<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        match kind {
            ElementKind::Text => Self::Text { id, content },
            ElementKind::Table => Self::Table { id, content },
            ElementKind::Image => Self::Image { id, content },
        }
    }

    /// Kind discriminant.
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::Text { .. } => ElementKind::Text,
            Self::Table { .. } => ElementKind::Table,
            Self::Image { .. } => ElementKind::Image,
        }
    }

    /// Identifier, if one is attached.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Text { id, .. } | Self::Table { id, .. } | Self::Image { id, .. } => {
                id.as_deref()
            }
        }
    }

    /// Raw payload regardless of kind.
    pub fn content(&self) -> &str {
        match self {
            Self::Text { content, .. }
            | Self::Table { content, .. }
            | Self::Image { content, .. } => content,
        }
    }

    /// Same element carrying `id`.
    pub fn with_id(self, id: Option<String>) -> Self {
        let kind = self.kind();
        Self::new(kind, id, self.into_content())
    }

    /// Payload form persisted in the originals collection (no id).
    pub fn to_stored(&self) -> Self {
        Self::new(self.kind(), None, self.content())
    }

    fn into_content(self) -> String {
        match self {
            Self::Text { content, .. }
            | Self::Table { content, .. }
            | Self::Image { content, .. } => content,
        }
    }
}

/// Summarized/normalized counterpart of an [`Element`], stored in the vectorized collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    /// Kind of the originating element.
    #[serde(rename = "type")]
    pub kind: ElementKind,
    /// Summary, caption, or raw text that gets embedded.
    pub content: String,
    /// Identifier of the original in the paired originals collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl ProcessedDocument {
    /// Processed document that has not been linked to its original yet.
    pub fn new(kind: ElementKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            reference: None,
        }
    }

    /// Copy of this document pointing at `reference`.
    pub fn with_reference(&self, reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..self.clone()
        }
    }
}

/// Anything the vector store client can persist.
pub trait StoreDocument: Serialize + Sync {
    /// Text handed to the embedder when the target collection is vectorized.
    fn embedding_text(&self) -> Option<&str>;
}

impl StoreDocument for ProcessedDocument {
    fn embedding_text(&self) -> Option<&str> {
        Some(&self.content)
    }
}

impl StoreDocument for Element {
    fn embedding_text(&self) -> Option<&str> {
        match self {
            Self::Text { content, .. } | Self::Table { content, .. } => Some(content),
            Self::Image { .. } => None,
        }
    }
}

impl StoreDocument for serde_json::Value {
    fn embedding_text(&self) -> Option<&str> {
        self.get("content").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stored_element_is_type_and_content_only() {
        let element = Element::new(ElementKind::Table, Some("t-1".into()), "a | b");
        let value = serde_json::to_value(element.to_stored()).expect("json");
        assert_eq!(value, json!({ "type": "table", "content": "a | b" }));
    }

    #[test]
    fn element_round_trips_with_optional_id() {
        let element = Element::new(ElementKind::Image, Some("img-1".into()), "aGVsbG8=");
        let value = serde_json::to_value(&element).expect("json");
        assert_eq!(value["id"], "img-1");
        assert_eq!(value["type"], "image");
        let parsed: Element = serde_json::from_value(value).expect("element");
        assert_eq!(parsed, element);

        let bare: Element =
            serde_json::from_value(json!({ "type": "text", "content": "hi" })).expect("element");
        assert_eq!(bare.id(), None);
        assert_eq!(bare.kind(), ElementKind::Text);
        assert_eq!(bare.with_id(Some("x".into())).id(), Some("x"));
    }

    #[test]
    fn processed_document_omits_missing_reference() {
        let doc = ProcessedDocument::new(ElementKind::Text, "summary");
        let value = serde_json::to_value(&doc).expect("json");
        assert!(value.get("reference").is_none());

        let linked = doc.with_reference("abc");
        let value = serde_json::to_value(&linked).expect("json");
        assert_eq!(value["reference"], "abc");
        assert_eq!(value["type"], "text");
    }

    #[test]
    fn images_are_not_embeddable() {
        let image = Element::new(ElementKind::Image, None, "x");
        let text = Element::new(ElementKind::Text, None, "x");
        assert_eq!(image.embedding_text(), None);
        assert_eq!(text.embedding_text(), Some("x"));
    }
}
