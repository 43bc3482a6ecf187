use std::path::Path;
use std::sync::Arc;

use drawchat_core::clock::ManualClock;
use drawchat_core::config::StoreConfig;
use drawchat_core::models::{ConversationPayload, Message, SyncConflict};
use drawchat_core::services::{ConversationService, ConversationSummary};
use drawchat_core::sync::{ApplyReport, PullOutcome, PushOutcome, SyncHealth};
use drawchat_core::{ConversationId, ConversationMeta};
use pretty_assertions::assert_eq;

use crate::cli::{CompletionShell, ExportFormat};
use crate::commands::common::{
    format_conversation_lines, format_relative_time, format_sync_conflict_lines,
    format_sync_timestamp, format_transcript, normalize_content,
    normalize_conversation_identifier, resolve_conversation, short_id, CliContext,
};
use crate::commands::completions::run_completions;
use crate::commands::config::{missing_profile_fields, validate_profile};
use crate::commands::delete::run_delete;
use crate::commands::export::run_export;
use crate::commands::history::{run_rewind, run_step, HistoryStep};
use crate::commands::message::{run_draw, run_send};
use crate::commands::new::run_new;
use crate::commands::sync::{
    describe_pull, describe_push, format_health_lines, run_sync, run_sync_restore,
};
use crate::config_profiles::CliProfile;
use crate::error::CliError;

const ID_A: &str = "aaaaaaaa-aaaa-7aaa-8aaa-111111111111";
const ID_B: &str = "aaaaaaaa-aaaa-7aaa-8aaa-222222222222";

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn normalize_conversation_identifier_rejects_empty() {
    assert!(matches!(
        normalize_conversation_identifier(" \n "),
        Err(CliError::EmptyConversationId)
    ));
    assert_eq!(
        normalize_conversation_identifier("  abc123  ").unwrap(),
        "abc123".to_string()
    );
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn format_sync_timestamp_returns_utc_label() {
    assert_eq!(format_sync_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn format_sync_conflict_lines_include_key_fields() {
    let conflicts = vec![SyncConflict {
        id: 1,
        conversation_id: ID_A.to_string(),
        local_updated_at: 200,
        incoming_updated_at: 100,
        resolved_at: 300,
        strategy: "lww".to_string(),
    }];

    let rendered = format_sync_conflict_lines(&conflicts);
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].contains("lww"));
    assert!(rendered[0].contains(&format!("conversation={ID_A}")));
    assert!(rendered[0].contains("local=200"));
    assert!(rendered[0].contains("incoming=100"));
}

#[test]
fn conversation_lines_mark_current_and_remote_only() {
    let id_a: ConversationId = ID_A.parse().unwrap();
    let id_b: ConversationId = ID_B.parse().unwrap();
    let summaries = vec![
        ConversationSummary {
            meta: ConversationMeta::new(id_a, 0),
            title: "Network diagram".to_string(),
            message_count: 3,
            cached: true,
        },
        ConversationSummary {
            meta: ConversationMeta::new(id_b, 0),
            title: "Old chat".to_string(),
            message_count: 0,
            cached: false,
        },
    ];

    let lines = format_conversation_lines(&summaries, Some(&id_a));
    assert!(lines[0].starts_with("* aaaaaaaa-aaaa"));
    assert!(lines[0].contains("Network diagram"));
    assert!(lines[0].contains("3 msgs"));
    assert!(lines[1].starts_with("  "));
    assert!(lines[1].ends_with("(remote only)"));
    assert_eq!(short_id(&id_a), "aaaaaaaa-aaaa");
}

#[test]
fn transcript_lists_messages_and_diagram() {
    let meta = ConversationMeta::new(ID_A.parse().unwrap(), 0);
    let payload = ConversationPayload {
        messages: vec![
            Message::user("Draw a login flow", 1),
            Message::assistant("Here it is", 2),
        ],
        xml: "<mxGraphModel/>".to_string(),
        ..ConversationPayload::default()
    };

    let lines = format_transcript(&meta, &payload);
    assert!(lines[0].contains("Draw a login flow"));
    assert!(lines.contains(&"[0] user: Draw a login flow".to_string()));
    assert!(lines.contains(&"[1] assistant: Here it is".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("<mxGraphModel/>"));
}

#[test]
fn profile_validation_reports_missing_fields() {
    let profile = CliProfile {
        endpoint: Some("api.example.com".to_string()),
        user_id: None,
    };
    assert!(matches!(validate_profile(&profile), Err(CliError::Config(_))));
    assert_eq!(missing_profile_fields(&profile), vec!["user_id"]);

    let profile = CliProfile {
        endpoint: Some("https://api.example.com".to_string()),
        user_id: Some("user-1".to_string()),
    };
    assert!(validate_profile(&profile).is_ok());
    assert!(missing_profile_fields(&profile).is_empty());
}

#[test]
fn sync_outcomes_render_readably() {
    assert_eq!(describe_push(PushOutcome::Pushed { count: 2 }), "Pushed 2 conversations");
    assert_eq!(describe_push(PushOutcome::Deferred), "Push deferred");

    let report = ApplyReport {
        applied: 3,
        deleted: 1,
        conflicts: 0,
        skipped: 2,
        ..ApplyReport::default()
    };
    assert_eq!(
        describe_pull(&PullOutcome::Applied(report)),
        "Pulled: 3 applied, 1 deleted, 0 conflicts, 2 skipped"
    );

    let health = SyncHealth {
        last_ok_at: Some(0),
        last_error_at: None,
        last_error: None,
    };
    assert_eq!(
        format_health_lines(&health),
        vec!["Last successful sync: 1970-01-01 00:00:00 UTC".to_string()]
    );
}

#[tokio::test]
async fn resolve_conversation_supports_exact_and_prefix_id() {
    let service = seeded_service().await;

    let by_exact = resolve_conversation(Some(ID_A), &service).await.unwrap();
    assert_eq!(by_exact.id.to_string(), ID_A);

    let by_prefix = resolve_conversation(Some("aaaaaaaa-aaaa-7aaa-8aaa-2"), &service)
        .await
        .unwrap();
    assert_eq!(by_prefix.id.to_string(), ID_B);
}

#[tokio::test]
async fn resolve_conversation_rejects_ambiguous_and_missing() {
    let service = seeded_service().await;

    let error = resolve_conversation(Some("aaaaaaaa-aaaa"), &service)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::AmbiguousConversationId(_)));

    let error = resolve_conversation(Some("does-not-exist"), &service)
        .await
        .unwrap_err();
    assert!(matches!(error, CliError::ConversationNotFound(_)));
}

#[tokio::test]
async fn send_draw_and_undo_update_the_stored_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());

    run_new(&ctx).await.unwrap();
    run_send(&["Draw".to_string(), "a box".to_string()], None, &ctx)
        .await
        .unwrap();

    let first = dir.path().join("first.xml");
    std::fs::write(&first, "<mxGraphModel><root/></mxGraphModel>").unwrap();
    let second = dir.path().join("second.xml");
    std::fs::write(&second, "<mxGraphModel><root><cell/></root></mxGraphModel>").unwrap();
    run_draw(Some(&first), None, "display_diagram", &ctx)
        .await
        .unwrap();
    run_draw(Some(&second), None, "edit_diagram", &ctx)
        .await
        .unwrap();

    run_step(HistoryStep::Undo, None, &ctx).await.unwrap();

    let service = ctx.open_service().await.unwrap();
    let meta = service.current_conversation().await.unwrap();
    let payload = service.load_payload(&meta.id).await.unwrap();
    assert_eq!(payload.messages.len(), 1);
    assert_eq!(payload.messages[0].content, "Draw a box");
    assert_eq!(payload.xml, "<mxGraphModel><root/></mxGraphModel>");
    assert_eq!(payload.diagram_versions.len(), 3);
    drop(service);

    run_step(HistoryStep::Redo, None, &ctx).await.unwrap();
    run_rewind(0, None, &ctx).await.unwrap();

    let service = ctx.open_service().await.unwrap();
    let payload = service.load_payload(&meta.id).await.unwrap();
    assert_eq!(payload.messages.len(), 1);
    assert_eq!(payload.xml, "");
    assert_eq!(payload.diagram_versions.len(), 1);
}

#[tokio::test]
async fn run_delete_removes_conversation_by_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());

    run_new(&ctx).await.unwrap();
    let service = ctx.open_service().await.unwrap();
    let meta = service.current_conversation().await.unwrap();
    drop(service);

    run_delete(&meta.id.to_string()[..20], &ctx).await.unwrap();

    let service = ctx.open_service().await.unwrap();
    assert!(service.get_meta(&meta.id).await.unwrap().is_none());
    let current = service.current_conversation_id().await.unwrap();
    assert!(current.is_some_and(|id| id != meta.id));
}

#[tokio::test]
async fn run_sync_requires_sync_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = test_context(dir.path());
    ctx.profile = Some("drawchat-test-unconfigured-profile".to_string());

    let error = run_sync(&ctx).await.unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));

    let error = run_sync_restore(ID_A, &ctx).await.unwrap_err();
    assert!(matches!(error, CliError::SyncNotConfigured));
}

#[tokio::test]
async fn run_export_writes_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    run_new(&ctx).await.unwrap();
    run_send(&["Export me".to_string()], None, &ctx).await.unwrap();

    let output_path = dir.path().join("export.json");
    run_export(ExportFormat::Json, Some(&output_path), &ctx)
        .await
        .unwrap();

    let exported = std::fs::read_to_string(&output_path).unwrap();
    assert!(exported.contains("\"content\": \"Export me\""));
    assert!(exported.contains("\"title\": \"Export me\""));
}

#[tokio::test]
async fn run_export_into_directory_uses_suggested_name() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_context(dir.path());
    run_new(&ctx).await.unwrap();

    let out_dir = dir.path().join("exports");
    std::fs::create_dir_all(&out_dir).unwrap();
    run_export(ExportFormat::Markdown, Some(&out_dir), &ctx)
        .await
        .unwrap();

    let written = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(written.len(), 1);
    assert!(written[0].starts_with("drawchat-export-"));
    assert!(written[0].ends_with(".md"));
}

#[test]
fn run_completions_writes_bash_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("drawchat.bash");

    run_completions(CompletionShell::Bash, Some(&output_path)).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_drawchat()"));
    assert!(script.contains("complete -F _drawchat"));
}

fn test_context(dir: &Path) -> CliContext {
    CliContext::resolve(
        Some(dir.join("drawchat.db")),
        Some(dir.join("config.json")),
        Some("drawchat-test-profile".to_string()),
    )
}

async fn seeded_service() -> ConversationService {
    let service = ConversationService::open_in_memory(
        StoreConfig::default(),
        Arc::new(ManualClock::new(1_000)),
    )
    .unwrap();
    {
        let store = service.store_handle();
        let store = store.lock().await;
        for (raw, updated_at) in [(ID_A, 1_000), (ID_B, 2_000)] {
            let meta = ConversationMeta::new(raw.parse().unwrap(), updated_at);
            store
                .write_conversation(&meta, &ConversationPayload::default())
                .unwrap();
        }
    }
    service
}
