use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary lifecycle stage of a document.
///
/// Three ingestion lineages share these states: uploads and bookmarks both
/// pass through `Markdowned`/`Chunked`, and every lineage converges on
/// `Embedded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Init,
    Uploaded,
    Bookmarked,
    SavedChat,
    Markdowned,
    Chunked,
    QaExtracted,
    Embedded,
}

impl DocumentState {
    pub const ALL: [DocumentState; 8] = [
        DocumentState::Init,
        DocumentState::Uploaded,
        DocumentState::Bookmarked,
        DocumentState::SavedChat,
        DocumentState::Markdowned,
        DocumentState::Chunked,
        DocumentState::QaExtracted,
        DocumentState::Embedded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Init => "init",
            DocumentState::Uploaded => "uploaded",
            DocumentState::Bookmarked => "bookmarked",
            DocumentState::SavedChat => "saved_chat",
            DocumentState::Markdowned => "markdowned",
            DocumentState::Chunked => "chunked",
            DocumentState::QaExtracted => "qa_extracted",
            DocumentState::Embedded => "embedded",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained progress marker within a primary state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubState {
    #[default]
    None,
    Processing,
    Completed,
    Failed,
}

impl SubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubState::None => "none",
            SubState::Processing => "processing",
            SubState::Completed => "completed",
            SubState::Failed => "failed",
        }
    }
}

impl fmt::Display for SubState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived artifact kinds tracked by the resource ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Markdown,
    Chunks,
    QaPairs,
    Embeddings,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Markdown => "markdown",
            ResourceKind::Chunks => "chunks",
            ResourceKind::QaPairs => "qa_pairs",
            ResourceKind::Embeddings => "embeddings",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion lineage a document entered the pipeline through.
///
/// Declaration order is the disambiguation priority when a lineage hint
/// cannot settle which sequence owns a shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    Document,
    Bookmark,
    Chat,
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lineage::Document => "document",
            Lineage::Bookmark => "bookmark",
            Lineage::Chat => "chat",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serde_uses_snake_case_tokens() {
        let json = serde_json::to_string(&DocumentState::SavedChat).unwrap();
        assert_eq!(json, "\"saved_chat\"");
        let back: DocumentState = serde_json::from_str("\"qa_extracted\"").unwrap();
        assert_eq!(back, DocumentState::QaExtracted);
    }

    #[test]
    fn display_matches_wire_name() {
        for state in DocumentState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn sub_state_defaults_to_none() {
        assert_eq!(SubState::default(), SubState::None);
    }
}
