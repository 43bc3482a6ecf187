use std::sync::Arc;

use drawchat_core::clock::SystemClock;
use drawchat_core::services::ConversationService;
use drawchat_core::sync::{
    AuthStatus, HttpRemoteStore, PullOutcome, PushOutcome, SyncEngine, SyncHealth, SyncRunner,
    SyncSignal,
};
use drawchat_core::ConversationId;
use tokio::sync::mpsc;

use crate::cli::SyncCommands;
use crate::commands::common::{
    format_sync_conflict_lines, format_sync_timestamp, resolve_conversation, short_id,
    sync_conflict_to_item, CliContext, SyncConflictItem,
};
use crate::config_profiles::SyncCredentials;
use crate::error::CliError;

pub async fn run_sync_command(
    command: Option<SyncCommands>,
    ctx: &CliContext,
) -> Result<(), CliError> {
    match command {
        None => run_sync(ctx).await,
        Some(SyncCommands::Watch) => run_sync_watch(ctx).await,
        Some(SyncCommands::Restore { id }) => run_sync_restore(&id, ctx).await,
        Some(SyncCommands::Conflicts { limit, json }) => run_sync_conflicts(limit, json, ctx).await,
    }
}

/// Push pending local changes, then pull everything the remote has.
pub async fn run_sync(ctx: &CliContext) -> Result<(), CliError> {
    let (service, credentials) = open_sync_service(ctx).await?;
    let engine = build_engine(&service, &credentials)?;
    engine
        .set_auth(AuthStatus::authenticated(credentials.user_id.clone()))
        .await;

    let pending: Vec<ConversationId> = {
        let store = service.store_handle();
        let store = store.lock().await;
        store.read_pending_pushes()?.into_iter().collect()
    };
    if !pending.is_empty() {
        let outcome = engine.push_now(&pending).await?;
        println!("{}", describe_push(outcome));
    }

    match engine.bootstrap().await? {
        Some(outcome) => println!("{}", describe_pull(&outcome)),
        None => println!("Pull skipped"),
    }

    let health = engine.health().await;
    for line in format_health_lines(&health) {
        println!("{line}");
    }
    if health.is_healthy() {
        Ok(())
    } else {
        Err(CliError::SyncFailed(health.last_error.unwrap_or_default()))
    }
}

/// Keep syncing in the foreground until Ctrl-C.
pub async fn run_sync_watch(ctx: &CliContext) -> Result<(), CliError> {
    let (service, credentials) = open_sync_service(ctx).await?;
    let engine = Arc::new(build_engine(&service, &credentials)?);
    let (sender, receiver) = mpsc::unbounded_channel();
    let runner = SyncRunner::new(
        engine.clone(),
        receiver,
        service.config().sync.tick_interval(),
    );
    let handle = tokio::spawn(runner.run());

    for signal in [
        SyncSignal::AuthChanged(AuthStatus::authenticated(credentials.user_id.clone())),
        SyncSignal::Online,
    ] {
        send_signal(&sender, signal);
    }
    println!(
        "Syncing {} as {}. Press Ctrl-C to stop.",
        credentials.endpoint, credentials.user_id
    );

    tokio::signal::ctrl_c().await?;
    send_signal(&sender, SyncSignal::Shutdown);
    if let Err(error) = handle.await {
        tracing::warn!("Sync runner task failed: {error}");
    }

    for line in format_health_lines(&engine.health().await) {
        println!("{line}");
    }
    Ok(())
}

/// Re-read the remote from the start until the conversation's payload is back.
pub async fn run_sync_restore(id: &str, ctx: &CliContext) -> Result<(), CliError> {
    let (service, credentials) = open_sync_service(ctx).await?;
    let meta = resolve_conversation(Some(id), &service).await?;
    if service.load_payload(&meta.id).await.is_ok() {
        println!("Conversation {} is already cached", short_id(&meta.id));
        return Ok(());
    }

    let engine = build_engine(&service, &credentials)?;
    engine
        .set_auth(AuthStatus::authenticated(credentials.user_id.clone()))
        .await;
    engine.request_rehydrate(meta.id).await;

    loop {
        let outcome = engine.pull().await?;
        println!("{}", describe_pull(&outcome));
        let PullOutcome::Applied(report) = outcome else {
            break;
        };
        if service.load_payload(&meta.id).await.is_ok() {
            println!("Restored conversation {}", short_id(&meta.id));
            return Ok(());
        }
        if !report.has_more {
            break;
        }
    }

    Err(CliError::SyncFailed(format!(
        "conversation {} could not be restored from the remote",
        meta.id
    )))
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    ctx: &CliContext,
) -> Result<(), CliError> {
    let service = ctx.open_service().await?;
    let conflicts = service.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

async fn open_sync_service(
    ctx: &CliContext,
) -> Result<(ConversationService, SyncCredentials), CliError> {
    let config = ctx.store_config()?;
    let credentials = ctx
        .sync_credentials(&config)?
        .ok_or(CliError::SyncNotConfigured)?;
    let service = ctx.open_service().await?;
    Ok((service, credentials))
}

fn build_engine(
    service: &ConversationService,
    credentials: &SyncCredentials,
) -> Result<SyncEngine<HttpRemoteStore>, CliError> {
    let remote = HttpRemoteStore::new(
        credentials.endpoint.clone(),
        credentials.access_token.clone(),
    )?;
    Ok(SyncEngine::new(
        service.store_handle(),
        remote,
        service.config(),
        Arc::new(SystemClock),
    ))
}

fn send_signal(sender: &mpsc::UnboundedSender<SyncSignal>, signal: SyncSignal) {
    if sender.send(signal).is_err() {
        tracing::debug!("Sync runner is gone; dropping signal");
    }
}

pub fn describe_push(outcome: PushOutcome) -> String {
    match outcome {
        PushOutcome::Nothing => "Nothing to push".to_string(),
        PushOutcome::Deferred => "Push deferred".to_string(),
        PushOutcome::Pushed { count } => format!("Pushed {count} conversations"),
        PushOutcome::Failed => "Push failed; changes stay pending".to_string(),
    }
}

pub fn describe_pull(outcome: &PullOutcome) -> String {
    match outcome {
        PullOutcome::Skipped => "Pull skipped".to_string(),
        PullOutcome::AlreadyRunning => "Pull already running".to_string(),
        PullOutcome::Failed => "Pull failed".to_string(),
        PullOutcome::Applied(report) => {
            let mut line = format!(
                "Pulled: {} applied, {} deleted, {} conflicts",
                report.applied, report.deleted, report.conflicts
            );
            if report.skipped > 0 {
                line.push_str(&format!(", {} skipped", report.skipped));
            }
            if let Some(current) = report.current_changed {
                line.push_str(&format!("; current conversation is now {current}"));
            }
            line
        }
    }
}

pub fn format_health_lines(health: &SyncHealth) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(ok_at) = health.last_ok_at {
        lines.push(format!("Last successful sync: {}", format_sync_timestamp(ok_at)));
    }
    if let (Some(error_at), Some(error)) = (health.last_error_at, health.last_error.as_deref()) {
        lines.push(format!(
            "Last sync error at {}: {error}",
            format_sync_timestamp(error_at)
        ));
    }
    lines
}
