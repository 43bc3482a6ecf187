use crate::commands::common::{normalize_content, resolve_conversation, CliContext};
use crate::error::CliError;

pub async fn run_rename(id: &str, title_parts: &[String], ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(Some(id), &service).await?;
    let title = normalize_content(&title_parts.join(" "));

    let renamed = service
        .rename_conversation(&meta.id, title.as_deref())
        .await?;
    println!("{}  {}", renamed.id, renamed.display_title(None));
    Ok(())
}
