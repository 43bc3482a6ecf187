//! Conversation export helpers shared by clients.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::{ConversationMeta, ConversationPayload, MessageRole};

/// Export output format shared by all clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: i64,
}

/// Serializable conversation used in JSON and Markdown exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConversation {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub messages: Vec<ExportMessage>,
    /// Diagram currently shown
    pub xml: String,
    pub diagram_versions: usize,
}

#[must_use]
pub fn conversation_to_export_item(
    meta: &ConversationMeta,
    payload: &ConversationPayload,
) -> ExportConversation {
    ExportConversation {
        id: meta.id.to_string(),
        title: meta.display_title(Some(payload)),
        created_at: meta.created_at,
        updated_at: meta.updated_at,
        messages: payload
            .messages
            .iter()
            .map(|message| ExportMessage {
                role: message.role,
                content: message.content.clone(),
                created_at: message.created_at,
            })
            .collect(),
        xml: payload.xml.clone(),
        diagram_versions: payload.diagram_versions.len(),
    }
}

pub fn render_json_export(
    conversations: &[(ConversationMeta, ConversationPayload)],
) -> serde_json::Result<String> {
    let items = conversations
        .iter()
        .map(|(meta, payload)| conversation_to_export_item(meta, payload))
        .collect::<Vec<_>>();
    serde_json::to_string_pretty(&items)
}

/// Render transcripts with frontmatter and the final diagram in a fenced block.
#[must_use]
pub fn render_markdown_export(conversations: &[(ConversationMeta, ConversationPayload)]) -> String {
    let mut output = String::new();

    for (index, (meta, payload)) in conversations.iter().enumerate() {
        if index > 0 {
            output.push('\n');
        }

        let item = conversation_to_export_item(meta, payload);
        let _ = writeln!(output, "---");
        let _ = writeln!(output, "id: {}", item.id);
        let _ = writeln!(output, "created_at: {}", item.created_at);
        let _ = writeln!(output, "updated_at: {}", item.updated_at);
        let _ = writeln!(output, "diagram_versions: {}", item.diagram_versions);
        let _ = writeln!(output, "---");
        let _ = writeln!(output);
        let _ = writeln!(output, "# {}", item.title);

        for message in &item.messages {
            let speaker = match message.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
                MessageRole::System => "System",
            };
            let _ = writeln!(output);
            let _ = writeln!(output, "**{speaker}:** {}", message.content.trim());
        }

        if !item.xml.trim().is_empty() {
            let _ = writeln!(output);
            let _ = writeln!(output, "```xml");
            let _ = writeln!(output, "{}", item.xml.trim());
            let _ = writeln!(output, "```");
        }
    }

    output
}

/// Render conversations based on selected export format.
pub fn render_conversations_export(
    conversations: &[(ConversationMeta, ConversationPayload)],
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(conversations),
        ExportFormat::Markdown => Ok(render_markdown_export(conversations)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("drawchat-export-{timestamp_ms}.{}", format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationId, DiagramVersion, Message, VersionLabel};

    fn sample() -> (ConversationMeta, ConversationPayload) {
        let meta = ConversationMeta {
            id: "cccccccc-cccc-7ccc-8ccc-111111111111".parse().unwrap(),
            created_at: 123,
            updated_at: 456,
            title: None,
        };
        let mut payload = ConversationPayload::default();
        payload.messages.push(Message::user("Draw a login flow", 1));
        payload.messages.push(Message::assistant("Here it is.", 2));
        payload.diagram_versions.push(DiagramVersion::new(
            "<mxGraphModel/>",
            VersionLabel::DisplayDiagram,
            2,
        ));
        payload.diagram_version_cursor = 0;
        payload.xml = "<mxGraphModel/>".to_string();
        (meta, payload)
    }

    #[test]
    fn export_item_uses_derived_title() {
        let (meta, payload) = sample();
        let item = conversation_to_export_item(&meta, &payload);
        assert_eq!(item.title, "Draw a login flow");
        assert_eq!(item.messages.len(), 2);
        assert_eq!(item.diagram_versions, 1);
    }

    #[test]
    fn render_markdown_export_includes_transcript_and_diagram() {
        let rendered = render_markdown_export(&[sample()]);
        assert!(rendered.contains("id: cccccccc-cccc-7ccc-8ccc-111111111111"));
        assert!(rendered.contains("updated_at: 456"));
        assert!(rendered.contains("# Draw a login flow"));
        assert!(rendered.contains("**User:** Draw a login flow"));
        assert!(rendered.contains("**Assistant:** Here it is."));
        assert!(rendered.contains("```xml\n<mxGraphModel/>\n```"));
    }

    #[test]
    fn render_json_export_is_camel_case() {
        let mut second = sample();
        second.0.id = ConversationId::new();
        let rendered = render_conversations_export(&[sample(), second], ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert_eq!(value[0]["updatedAt"], 456);
        assert_eq!(value[0]["messages"][0]["role"], "user");
    }

    #[test]
    fn suggested_export_file_name_uses_format_extension() {
        assert_eq!(
            suggested_export_file_name(ExportFormat::Json, 123),
            "drawchat-export-123.json"
        );
        assert_eq!(
            suggested_export_file_name(ExportFormat::Markdown, 456),
            "drawchat-export-456.md"
        );
    }
}
