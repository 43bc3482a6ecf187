use std::path::Path;

use drawchat_core::canvas::NullCanvas;
use drawchat_core::models::VersionLabel;

use crate::commands::common::{
    resolve_conversation, resolve_diagram_xml, resolve_message_content, CliContext,
};
use crate::error::CliError;

pub async fn run_send(
    content_parts: &[String],
    id: Option<&str>,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let content = resolve_message_content(content_parts)?;
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(id, &service).await?;

    // The diagram on screen is whatever the payload last rendered.
    let payload = service.load_payload(&meta.id).await?;
    let canvas = NullCanvas::new(payload.xml);
    let index = service
        .send_user_message(&meta.id, &content, &canvas)
        .await?;

    println!("{}  message {index}", meta.id);
    Ok(())
}

pub async fn run_draw(
    file: Option<&Path>,
    id: Option<&str>,
    label: &str,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let xml = resolve_diagram_xml(file)?;
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(id, &service).await?;

    let index = service
        .record_diagram(&meta.id, &xml, VersionLabel::from(label))
        .await?;
    println!("{}  version {}", meta.id, index + 1);
    Ok(())
}
