use drawchat_core::export::conversation_to_export_item;

use crate::commands::common::{format_transcript, resolve_conversation, CliContext};
use crate::error::CliError;

pub async fn run_show(id: Option<&str>, as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(id, &service).await?;
    let payload = service.load_payload(&meta.id).await?;

    if as_json {
        let item = conversation_to_export_item(&meta, &payload);
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        for line in format_transcript(&meta, &payload) {
            println!("{line}");
        }
    }
    Ok(())
}
