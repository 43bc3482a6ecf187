use drawchat_core::canvas::NullCanvas;
use drawchat_core::models::DiagramVersion;

use crate::commands::common::{format_sync_timestamp, resolve_conversation, CliContext};
use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStep {
    Undo,
    Redo,
}

pub async fn run_step(step: HistoryStep, id: Option<&str>, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(id, &service).await?;
    let payload = service.load_payload(&meta.id).await?;
    let mut canvas = NullCanvas::new(payload.xml);

    let version = match step {
        HistoryStep::Undo => service.undo(&meta.id, &mut canvas).await?,
        HistoryStep::Redo => service.redo(&meta.id, &mut canvas).await?,
    };

    match version {
        Some(version) => print_version(&version),
        None if step == HistoryStep::Undo => println!("Already at the oldest diagram version."),
        None => println!("Already at the newest diagram version."),
    }
    Ok(())
}

pub async fn run_rewind(
    message_index: usize,
    id: Option<&str>,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(id, &service).await?;
    let payload = service.load_payload(&meta.id).await?;
    let mut canvas = NullCanvas::new(payload.xml);

    let xml = service
        .rewind_to_message(&meta.id, message_index, &mut canvas)
        .await?;
    println!("{}  rewound to message {message_index}", meta.id);
    if !xml.trim().is_empty() {
        println!("{}", xml.trim());
    }
    Ok(())
}

fn print_version(version: &DiagramVersion) {
    println!("{}  {}", version.label, format_sync_timestamp(version.created_at));
    println!("{}", version.xml.trim());
}
