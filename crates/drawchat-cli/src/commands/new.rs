use crate::commands::common::{resolve_conversation, CliContext};
use crate::error::CliError;

pub async fn run_new(ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = service.create_conversation().await?;
    println!("{}", meta.id);
    Ok(())
}

pub async fn run_switch(id: &str, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let meta = resolve_conversation(Some(id), &service).await?;
    let payload = service.switch_conversation(&meta.id).await?;
    println!("{}  {}", meta.id, meta.display_title(Some(&payload)));
    Ok(())
}
