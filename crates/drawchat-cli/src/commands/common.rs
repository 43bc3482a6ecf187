use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use drawchat_core::clock::SystemClock;
use drawchat_core::config::StoreConfig;
use drawchat_core::models::{ConversationPayload, MessageRole, SyncConflict};
use drawchat_core::services::{ConversationService, ConversationSummary};
use drawchat_core::sync::AuthStatus;
use drawchat_core::util::truncate_with_ellipsis;
use drawchat_core::{ConversationId, ConversationMeta};
use serde::Serialize;

use crate::config_profiles::{config_dir, CliProfilesConfig, SyncCredentials, ACCESS_TOKEN_ENV};
use crate::error::CliError;

const STORE_CONFIG_FILE_NAME: &str = "config.json";

/// Paths and profile selected on the command line.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub db_path: PathBuf,
    pub store_config_path: PathBuf,
    pub profile: Option<String>,
}

impl CliContext {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_config_path: Option<PathBuf>,
        profile: Option<String>,
    ) -> Self {
        Self {
            db_path: resolve_db_path(cli_db_path),
            store_config_path: resolve_store_config_path(cli_config_path),
            profile,
        }
    }

    pub fn store_config(&self) -> Result<StoreConfig, CliError> {
        Ok(StoreConfig::load_from_path(&self.store_config_path)
            .map_err(CliError::Config)?
            .apply_env())
    }

    /// Credentials from the active profile and `DRAWCHAT_ACCESS_TOKEN`.
    pub fn sync_credentials(&self, config: &StoreConfig) -> Result<Option<SyncCredentials>, CliError> {
        let profiles = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = profiles.resolve_profile_name(self.profile.as_deref());
        let Some(profile) = profiles.profile(&profile_name) else {
            return Ok(None);
        };
        Ok(profile.credentials(config.sync.endpoint(), env::var(ACCESS_TOKEN_ENV).ok()))
    }

    /// Open the conversation service, authenticated when credentials exist.
    pub async fn open_service(&self) -> Result<ConversationService, CliError> {
        let config = self.store_config()?;
        let credentials = self.sync_credentials(&config)?;
        let service = ConversationService::open_path(&self.db_path, config, Arc::new(SystemClock))?;
        if let Some(credentials) = credentials {
            service
                .set_auth(AuthStatus::authenticated(credentials.user_id))
                .await;
        }
        Ok(service)
    }
}

#[derive(Debug, Serialize)]
pub struct ConversationListItem {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub cached: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub conversation_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

/// Resolve a full id or unique prefix; the current conversation when `None`.
pub async fn resolve_conversation(
    query: Option<&str>,
    service: &ConversationService,
) -> Result<ConversationMeta, CliError> {
    let Some(query) = query else {
        return Ok(service.current_conversation().await?);
    };
    let query = normalize_conversation_identifier(query)?;

    if let Ok(id) = query.parse::<ConversationId>() {
        if let Some(meta) = service.get_meta(&id).await? {
            return Ok(meta);
        }
    }

    let mut matching = service
        .list_conversations()
        .await?
        .into_iter()
        .filter(|summary| summary.meta.id.to_string().starts_with(&query))
        .map(|summary| summary.meta)
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::ConversationNotFound(query)),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|meta| short_id(&meta.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousConversationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &ConversationId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_conversation_lines(
    summaries: &[ConversationSummary],
    current: Option<&ConversationId>,
) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    summaries
        .iter()
        .map(|summary| {
            let marker = if current == Some(&summary.meta.id) { "*" } else { " " };
            let title = truncate_with_ellipsis(&summary.title, 40);
            let relative_time = format_relative_time(summary.meta.updated_at, now_ms);
            let cached = if summary.cached { "" } else { "  (remote only)" };
            format!(
                "{marker} {:<13}  {title:<40}  {:>3} msgs  {relative_time}{cached}",
                short_id(&summary.meta.id),
                summary.message_count
            )
        })
        .collect()
}

pub fn summary_to_list_item(summary: &ConversationSummary) -> ConversationListItem {
    let now_ms = Utc::now().timestamp_millis();
    ConversationListItem {
        id: summary.meta.id.to_string(),
        title: summary.title.clone(),
        message_count: summary.message_count,
        cached: summary.cached,
        created_at: summary.meta.created_at,
        updated_at: summary.meta.updated_at,
        relative_time: format_relative_time(summary.meta.updated_at, now_ms),
    }
}

/// Plain-text transcript followed by the diagram at the cursor.
pub fn format_transcript(meta: &ConversationMeta, payload: &ConversationPayload) -> Vec<String> {
    let mut lines = vec![
        format!("{}  {}", meta.id, meta.display_title(Some(payload))),
        format!(
            "updated {}  diagram version {}/{}",
            format_sync_timestamp(meta.updated_at),
            payload.cursor_index().map_or(0, |index| index + 1),
            payload.diagram_versions.len()
        ),
        String::new(),
    ];

    for (index, message) in payload.messages.iter().enumerate() {
        let speaker = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        lines.push(format!("[{index}] {speaker}: {}", message.content));
        for invocation in &message.tool_invocations {
            match &invocation.error {
                Some(error) => lines.push(format!("      tool {} failed: {error}", invocation.name)),
                None => lines.push(format!("      tool {}", invocation.name)),
            }
        }
    }

    if !payload.xml.trim().is_empty() {
        lines.push(String::new());
        lines.push(payload.xml.trim().to_string());
    }
    lines
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        conversation_id: conflict.conversation_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  conversation={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.conversation_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_conversation_identifier(id: &str) -> Result<String, CliError> {
    normalize_content(id).ok_or(CliError::EmptyConversationId)
}

/// Message text from arguments, falling back to piped stdin.
pub fn resolve_message_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }
    read_piped_stdin()?.ok_or(CliError::EmptyContent)
}

/// Diagram XML from a file, falling back to piped stdin.
pub fn resolve_diagram_xml(file: Option<&Path>) -> Result<String, CliError> {
    let xml = match file {
        Some(path) => normalize_content(&std::fs::read_to_string(path)?),
        None => read_piped_stdin()?,
    };
    xml.ok_or(CliError::EmptyDiagram)
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("DRAWCHAT_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("drawchat")
        .join("drawchat.db")
}

pub fn resolve_store_config_path(cli_config_path: Option<PathBuf>) -> PathBuf {
    cli_config_path
        .or_else(|| env::var_os("DRAWCHAT_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| config_dir().join(STORE_CONFIG_FILE_NAME))
}
