use crate::commands::common::{resolve_conversation, CliContext};
use crate::error::CliError;

pub async fn run_delete(id: &str, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(Some(id), &service).await?;

    let outcome = service.delete_conversation(&meta.id).await?;
    println!("{}", outcome.deleted);
    if outcome.synthesized {
        println!("Started a new conversation {}", outcome.current);
    }
    Ok(())
}
