use drawchat_core::store::MigrationResult;

use crate::commands::common::CliContext;
use crate::error::CliError;

pub async fn run_migrate(ctx: &CliContext) -> Result<(), CliError> {
    // Opening the service already imports legacy data; run again to report.
    let service = ctx.open_service().await?;
    match service.migrate_legacy().await? {
        MigrationResult::NotNeeded => println!("No legacy data to migrate."),
        MigrationResult::DiscardedEmpty => println!("Removed empty legacy data."),
        MigrationResult::Migrated {
            id,
            messages,
            versions,
        } => println!("Migrated legacy chat into {id} ({messages} messages, {versions} diagram versions)."),
    }
    Ok(())
}
