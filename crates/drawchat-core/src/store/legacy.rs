//! One-time import of pre-conversation flat storage.
//!
//! Older builds kept a single chat under flat keys (`legacy.messages`,
//! `legacy.xml`, ...). On first load these are folded into one conversation
//! and the flat keys are removed, so running the import again is a no-op.

use serde::de::DeserializeOwned;

use super::{keys, ConversationStore};
use crate::error::Result;
use crate::models::{
    new_session_id, ConversationId, ConversationMeta, ConversationPayload, DiagramVersion,
    Message, VersionLabel,
};

/// What the legacy import did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationResult {
    /// No legacy keys were present
    NotNeeded,
    /// Legacy keys existed but held nothing worth keeping; they were removed
    DiscardedEmpty,
    /// A conversation was created from the legacy data
    Migrated {
        id: ConversationId,
        messages: usize,
        versions: usize,
    },
}

/// Fold legacy flat keys into a conversation, if any are present.
pub fn migrate_legacy_if_present(store: &ConversationStore) -> Result<MigrationResult> {
    let mut present = false;
    for key in keys::LEGACY_KEYS {
        present |= store.raw_get(key)?.is_some();
    }
    if !present {
        return Ok(MigrationResult::NotNeeded);
    }

    let now = store.now_ms();
    let messages: Vec<Message> = read_legacy(store, keys::LEGACY_MESSAGES)?.unwrap_or_default();
    let xml = store.raw_get(keys::LEGACY_XML)?.unwrap_or_default();
    let mut versions: Vec<DiagramVersion> =
        read_legacy(store, keys::LEGACY_DIAGRAM_VERSIONS)?.unwrap_or_default();
    let stored_cursor: Option<i64> = read_legacy(store, keys::LEGACY_DIAGRAM_CURSOR)?;
    let session_id = store
        .raw_get(keys::LEGACY_SESSION_ID)?
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(new_session_id);

    if messages.is_empty() && versions.is_empty() && xml.trim().is_empty() {
        remove_legacy_keys(store)?;
        tracing::info!("Discarded empty legacy conversation data");
        return Ok(MigrationResult::DiscardedEmpty);
    }

    // A diagram without history becomes a single snapshot so xml and cursor agree
    if versions.is_empty() && !xml.trim().is_empty() {
        versions.push(DiagramVersion::new(xml.clone(), VersionLabel::Migrated, now));
    }

    let cursor = stored_cursor
        .and_then(|cursor| usize::try_from(cursor).ok())
        .filter(|cursor| *cursor < versions.len())
        .or_else(|| versions.len().checked_sub(1));

    let payload = ConversationPayload {
        messages,
        xml: cursor
            .map(|index| versions[index].xml.clone())
            .unwrap_or_default(),
        diagram_version_cursor: cursor.map_or(-1, |index| {
            i64::try_from(index).unwrap_or(i64::MAX)
        }),
        diagram_versions: versions,
        session_id,
        ..ConversationPayload::default()
    };

    let id = ConversationId::new();
    let meta = ConversationMeta::new(id, now);
    store.write_conversation(&meta, &payload)?;
    if store.current_conversation()?.is_none() {
        store.set_current_conversation(Some(&id))?;
    }
    remove_legacy_keys(store)?;

    tracing::info!(
        "Migrated legacy conversation {} ({} messages, {} diagram versions)",
        id,
        payload.messages.len(),
        payload.diagram_versions.len()
    );
    Ok(MigrationResult::Migrated {
        id,
        messages: payload.messages.len(),
        versions: payload.diagram_versions.len(),
    })
}

fn read_legacy<T: DeserializeOwned>(store: &ConversationStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.raw_get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(error) => {
            tracing::warn!("Dropping unreadable legacy value {key}: {error}");
            Ok(None)
        }
    }
}

fn remove_legacy_keys(store: &ConversationStore) -> Result<()> {
    for key in keys::LEGACY_KEYS {
        store.raw_remove(key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::KeyValueStore;

    fn seed(store: &ConversationStore, entries: &[(&str, &str)]) {
        store.kv().set_many(entries).unwrap();
    }

    #[test]
    fn test_no_legacy_keys_is_noop() {
        let store = ConversationStore::open_in_memory().unwrap();
        assert_eq!(
            migrate_legacy_if_present(&store).unwrap(),
            MigrationResult::NotNeeded
        );
        assert!(store.read_metas().unwrap().is_empty());
    }

    #[test]
    fn test_migrates_messages_and_versions_once() {
        let store = ConversationStore::open_in_memory().unwrap();
        seed(
            &store,
            &[
                (
                    keys::LEGACY_MESSAGES,
                    r#"[{"id":"m1","role":"user","content":"draw a box"}]"#,
                ),
                (
                    keys::LEGACY_DIAGRAM_VERSIONS,
                    r#"[{"xml":"<a/>","createdAt":1,"label":"before-send"},{"xml":"<b/>","createdAt":2,"label":"display_diagram"}]"#,
                ),
                (keys::LEGACY_DIAGRAM_CURSOR, "0"),
                (keys::LEGACY_SESSION_ID, "session-old"),
            ],
        );

        let MigrationResult::Migrated {
            id,
            messages,
            versions,
        } = migrate_legacy_if_present(&store).unwrap()
        else {
            panic!("expected migration");
        };
        assert_eq!((messages, versions), (1, 2));

        let payload = store.read_payload(&id).unwrap().unwrap();
        assert_eq!(payload.session_id, "session-old");
        assert_eq!(payload.diagram_version_cursor, 0);
        assert_eq!(payload.xml, "<a/>");
        assert!(payload.is_consistent());
        assert_eq!(store.current_conversation().unwrap(), Some(id));

        assert_eq!(
            migrate_legacy_if_present(&store).unwrap(),
            MigrationResult::NotNeeded
        );
        assert_eq!(store.read_metas().unwrap().len(), 1);
    }

    #[test]
    fn test_bare_xml_becomes_single_version() {
        let store = ConversationStore::open_in_memory().unwrap();
        seed(&store, &[(keys::LEGACY_XML, "<mxGraphModel/>")]);

        let MigrationResult::Migrated { id, versions, .. } =
            migrate_legacy_if_present(&store).unwrap()
        else {
            panic!("expected migration");
        };
        assert_eq!(versions, 1);

        let payload = store.read_payload(&id).unwrap().unwrap();
        assert_eq!(payload.diagram_versions[0].label, VersionLabel::Migrated);
        assert!(payload.is_consistent());
    }

    #[test]
    fn test_empty_legacy_data_is_discarded() {
        let store = ConversationStore::open_in_memory().unwrap();
        seed(
            &store,
            &[(keys::LEGACY_MESSAGES, "[]"), (keys::LEGACY_XML, "  ")],
        );

        assert_eq!(
            migrate_legacy_if_present(&store).unwrap(),
            MigrationResult::DiscardedEmpty
        );
        assert!(store.raw_get(keys::LEGACY_MESSAGES).unwrap().is_none());
        assert!(store.read_metas().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_cursor_points_at_latest() {
        let store = ConversationStore::open_in_memory().unwrap();
        seed(
            &store,
            &[
                (
                    keys::LEGACY_DIAGRAM_VERSIONS,
                    r#"[{"xml":"<a/>","createdAt":1,"label":"edit_diagram"}]"#,
                ),
                (keys::LEGACY_DIAGRAM_CURSOR, "7"),
            ],
        );

        let MigrationResult::Migrated { id, .. } = migrate_legacy_if_present(&store).unwrap()
        else {
            panic!("expected migration");
        };
        let payload = store.read_payload(&id).unwrap().unwrap();
        assert_eq!(payload.diagram_version_cursor, 0);
        assert_eq!(payload.xml, "<a/>");
    }
}
