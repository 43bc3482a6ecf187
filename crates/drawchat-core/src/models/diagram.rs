//! Diagram version model

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a diagram snapshot was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VersionLabel {
    /// Diagram state captured right before a user message is sent
    BeforeSend,
    /// Full redraw produced by the `display_diagram` tool
    DisplayDiagram,
    /// Incremental change produced by the `edit_diagram` tool
    EditDiagram,
    /// Component insertion produced by the `display_components` tool
    DisplayComponents,
    /// Snapshot imported from pre-conversation flat storage
    Migrated,
    /// Any label this build does not know about
    Other(String),
}

impl VersionLabel {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::BeforeSend => "before-send",
            Self::DisplayDiagram => "display_diagram",
            Self::EditDiagram => "edit_diagram",
            Self::DisplayComponents => "display_components",
            Self::Migrated => "migrated",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for VersionLabel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "before-send" => Self::BeforeSend,
            "display_diagram" => Self::DisplayDiagram,
            "edit_diagram" => Self::EditDiagram,
            "display_components" => Self::DisplayComponents,
            "migrated" => Self::Migrated,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for VersionLabel {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<VersionLabel> for String {
    fn from(value: VersionLabel) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for VersionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One snapshot in a conversation's diagram history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramVersion {
    pub xml: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub label: VersionLabel,
}

impl DiagramVersion {
    pub fn new(xml: impl Into<String>, label: VersionLabel, created_at: i64) -> Self {
        Self {
            xml: xml.into(),
            created_at,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_wire_names() {
        assert_eq!(VersionLabel::BeforeSend.as_str(), "before-send");
        assert_eq!(
            VersionLabel::from("display_components"),
            VersionLabel::DisplayComponents
        );
        assert_eq!(
            VersionLabel::from("restore"),
            VersionLabel::Other("restore".to_string())
        );
    }

    #[test]
    fn test_version_serializes_label_as_string() {
        let version = DiagramVersion::new("<x/>", VersionLabel::EditDiagram, 42);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(
            json,
            r#"{"xml":"<x/>","createdAt":42,"label":"edit_diagram"}"#
        );
        let parsed: DiagramVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, version);
    }
}
