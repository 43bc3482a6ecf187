use crate::cli::CacheCommands;
use crate::commands::common::{resolve_conversation, short_id, CliContext};
use crate::error::CliError;

pub async fn run_cache(command: CacheCommands, ctx: &CliContext) -> Result<(), CliError> {
    match command {
        CacheCommands::Stats { json } => run_stats(json, ctx).await,
        CacheCommands::Cleanup => run_cleanup(ctx).await,
        CacheCommands::DeleteOldest => run_delete_oldest(ctx).await,
    }
}

async fn run_stats(as_json: bool, ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let stats = service.cache_stats().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Cached conversations: {}/{}", stats.cached, stats.quota);
    println!("Usage: {:.1}%", stats.usage_percentage);
    println!("Stale: {}", stats.stale_count);
    println!("Backed by remote: {}", stats.remote_backed);
    Ok(())
}

async fn run_cleanup(ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let report = service.cleanup_cache().await?;

    if report.total_removed == 0 {
        println!("Cache is within quota; nothing removed.");
    } else {
        println!(
            "Removed {} cached conversations ({} stale, {} over quota).",
            report.total_removed, report.stale_removed, report.quota_removed
        );
    }
    Ok(())
}

async fn run_delete_oldest(ctx: &CliContext) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    // Make sure a current conversation exists so it is never the one removed.
    resolve_conversation(None, &service).await?;

    match service.delete_oldest_conversation().await? {
        Some(outcome) => println!("Deleted {}", short_id(&outcome.deleted)),
        None => println!("Nothing to delete."),
    }
    Ok(())
}
