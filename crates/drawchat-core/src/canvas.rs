//! Diagram canvas primitives consumed by the conversation service.

use crate::error::Result;

/// Surface that renders diagram xml.
#[allow(async_fn_in_trait)]
pub trait DiagramCanvas {
    /// Render `xml`. Returns a validation message when the diagram is rejected.
    fn apply_diagram(&mut self, xml: &str) -> Option<String>;

    /// Read back the diagram currently shown.
    async fn export_diagram(&self) -> Result<String>;
}

/// Headless canvas that keeps the last applied xml.
///
/// Used by the CLI and tests where no editor is attached. Xml that does not
/// look like a draw.io model is rejected the way an editor would.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullCanvas {
    xml: String,
}

impl NullCanvas {
    pub fn new(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }

    pub fn xml(&self) -> &str {
        &self.xml
    }
}

impl DiagramCanvas for NullCanvas {
    fn apply_diagram(&mut self, xml: &str) -> Option<String> {
        let trimmed = xml.trim();
        if !trimmed.is_empty() && !(trimmed.starts_with('<') && trimmed.ends_with('>')) {
            return Some("diagram is not well-formed xml".to_string());
        }
        self.xml = xml.to_string();
        None
    }

    async fn export_diagram(&self) -> Result<String> {
        Ok(self.xml.clone())
    }
}
