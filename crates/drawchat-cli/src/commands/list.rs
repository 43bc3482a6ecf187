use crate::commands::common::{
    format_conversation_lines, summary_to_list_item, CliContext, ConversationListItem,
};
use crate::error::CliError;

pub async fn run_list(limit: usize, as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let mut summaries = service.list_conversations().await?;
    summaries.truncate(limit);

    if as_json {
        let json_items = summaries
            .iter()
            .map(summary_to_list_item)
            .collect::<Vec<ConversationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No conversations yet. Start one with `drawchat new`.");
        return Ok(());
    }

    let current = service.current_conversation_id().await?;
    for line in format_conversation_lines(&summaries, current.as_ref()) {
        println!("{line}");
    }
    Ok(())
}
