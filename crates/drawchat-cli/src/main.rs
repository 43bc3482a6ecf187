//! drawchat CLI - conversations and diagram history from the terminal
//!
//! Drives the same local store and sync engine the editor uses.

mod cli;
mod commands;
mod config_profiles;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::export::run_export;
use crate::commands::history::{run_rewind, run_step, HistoryStep};
use crate::commands::list::run_list;
use crate::commands::message::{run_draw, run_send};
use crate::commands::migrate::run_migrate;
use crate::commands::new::{run_new, run_switch};
use crate::commands::rename::run_rename;
use crate::commands::show::run_show;
use crate::commands::sync::run_sync_command;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "drawchat=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CliContext::resolve(cli.db_path, cli.config, cli.profile.clone());

    match cli.command {
        Some(Commands::New) => run_new(&ctx).await?,
        Some(Commands::List { limit, json }) => run_list(limit, json, &ctx).await?,
        Some(Commands::Show { id, json }) => run_show(id.as_deref(), json, &ctx).await?,
        Some(Commands::Switch { id }) => run_switch(&id, &ctx).await?,
        Some(Commands::Send { content, id }) => run_send(&content, id.as_deref(), &ctx).await?,
        Some(Commands::Draw { file, id, label }) => {
            run_draw(file.as_deref(), id.as_deref(), &label, &ctx).await?;
        }
        Some(Commands::Rename { id, title }) => run_rename(&id, &title, &ctx).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &ctx).await?,
        Some(Commands::Undo { id }) => run_step(HistoryStep::Undo, id.as_deref(), &ctx).await?,
        Some(Commands::Redo { id }) => run_step(HistoryStep::Redo, id.as_deref(), &ctx).await?,
        Some(Commands::Rewind { message_index, id }) => {
            run_rewind(message_index, id.as_deref(), &ctx).await?;
        }
        Some(Commands::Cache { command }) => run_cache(command, &ctx).await?,
        Some(Commands::Sync { command }) => run_sync_command(command, &ctx).await?,
        Some(Commands::Export { format, output }) => {
            run_export(format, output.as_deref(), &ctx).await?;
        }
        Some(Commands::Migrate) => run_migrate(&ctx).await?,
        Some(Commands::Config { command }) => run_config(command, cli.profile.as_deref())?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
