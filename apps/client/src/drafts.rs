//! Draft Manager: unsaved, local-only entities per kind.
//!
//! Drafts live in durable storage under `draft_<kind>` as a JSON list.
//! Every read-modify-write holds `lock`, so concurrent updates inside one
//! process never interleave. Storage failures never escape: reads degrade to
//! "no drafts", writes report `false` / `None`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthTransition, AuthTransitionObserver};
use crate::models::{Draft, Entity, EntityKind};
use crate::storage::{read_json, write_json, KeyValueStore, StorageError};

pub const TEMP_ID_PREFIX: &str = "temp_";

pub fn new_temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[derive(Clone)]
pub struct DraftManager {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl DraftManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn load(&self, kind: EntityKind) -> Result<Vec<Draft>, StorageError> {
        Ok(read_json(self.store.as_ref(), &kind.draft_storage_key())?.unwrap_or_default())
    }

    fn persist(&self, kind: EntityKind, drafts: &[Draft]) -> Result<(), StorageError> {
        write_json(self.store.as_ref(), &kind.draft_storage_key(), &drafts)
    }

    pub async fn get_drafts(&self, kind: EntityKind) -> Vec<Draft> {
        let _guard = self.lock.lock().await;
        match self.load(kind) {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!("Could not read {kind} drafts: {e}");
                Vec::new()
            }
        }
    }

    pub async fn get_draft(&self, kind: EntityKind, temp_id: &str) -> Option<Draft> {
        self.get_drafts(kind)
            .await
            .into_iter()
            .find(|draft| draft.temp_id == temp_id)
    }

    /// Appends `entity` as a new draft with a fresh temp id.
    pub async fn save_draft(&self, kind: EntityKind, entity: Entity) -> Option<Draft> {
        let _guard = self.lock.lock().await;
        let mut drafts = match self.load(kind) {
            Ok(drafts) => drafts,
            Err(StorageError::Corrupted { .. }) => {
                warn!("Discarding unreadable {kind} drafts");
                Vec::new()
            }
            Err(e) => {
                warn!("Could not read {kind} drafts: {e}");
                return None;
            }
        };

        let draft = Draft {
            temp_id: new_temp_id(),
            drafted_at: Utc::now(),
            entity: Entity { id: None, ..entity },
        };
        drafts.push(draft.clone());

        match self.persist(kind, &drafts) {
            Ok(()) => {
                info!("Saved {kind} draft {}", draft.temp_id);
                Some(draft)
            }
            Err(e) => {
                warn!("Could not save {kind} draft: {e}");
                None
            }
        }
    }

    /// Field-preserving merge of `partial` into the draft `temp_id`.
    ///
    /// Returns `false` when the draft does not exist (nothing is written) or
    /// when the write fails.
    pub async fn update_draft_preserve_fields(
        &self,
        kind: EntityKind,
        temp_id: &str,
        partial: &Map<String, Value>,
    ) -> bool {
        let _guard = self.lock.lock().await;
        let mut drafts = match self.load(kind) {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!("Could not read {kind} drafts: {e}");
                return false;
            }
        };

        let Some(draft) = drafts.iter_mut().find(|d| d.temp_id == temp_id) else {
            debug!("No {kind} draft {temp_id} to update");
            return false;
        };
        draft.entity.merge_preserving_fields(partial);

        match self.persist(kind, &drafts) {
            Ok(()) => {
                debug!("Updated {kind} draft {temp_id}: {} keys", partial.len());
                true
            }
            Err(e) => {
                warn!("Could not update {kind} draft {temp_id}: {e}");
                false
            }
        }
    }

    pub async fn remove_draft(&self, kind: EntityKind, temp_id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let mut drafts = match self.load(kind) {
            Ok(drafts) => drafts,
            Err(e) => {
                warn!("Could not read {kind} drafts: {e}");
                return false;
            }
        };
        let before = drafts.len();
        drafts.retain(|d| d.temp_id != temp_id);
        if drafts.len() == before {
            return false;
        }
        match self.persist(kind, &drafts) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not remove {kind} draft {temp_id}: {e}");
                false
            }
        }
    }

    /// Clears drafts of every kind when the flags describe a real transition
    /// (`was_unauthenticated == is_now_authenticated`). Returns whether it did.
    pub async fn clear_drafts_on_auth_change(
        &self,
        was_unauthenticated: bool,
        is_now_authenticated: bool,
    ) -> bool {
        if was_unauthenticated != is_now_authenticated {
            return false;
        }
        self.clear_all().await;
        true
    }

    pub async fn clear_all(&self) {
        let _guard = self.lock.lock().await;
        for kind in EntityKind::ALL {
            if let Err(e) = self.store.remove(&kind.draft_storage_key()) {
                warn!("Could not clear {kind} drafts: {e}");
            }
        }
        info!("Cleared all drafts");
    }
}

#[async_trait]
impl AuthTransitionObserver for DraftManager {
    fn name(&self) -> &'static str {
        "draft_manager"
    }

    async fn on_auth_transition(&self, transition: AuthTransition) {
        if transition.identity_changed {
            self.clear_all().await;
            return;
        }
        self.clear_drafts_on_auth_change(
            !transition.was_authenticated,
            transition.is_authenticated,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use serde_json::json;

    fn account(name: &str) -> Entity {
        let mut entity = Entity {
            name: Some(name.to_string()),
            ..Default::default()
        };
        entity.merge_preserving_fields(
            json!({
                "targetAccountName": name,
                "firmographics": {"industry": ["Fintech"]},
                "buyingSignals": [{"title": "Hiring"}]
            })
            .as_object()
            .unwrap(),
        );
        entity
    }

    fn manager() -> (Arc<MemoryStore>, DraftManager) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), DraftManager::new(store))
    }

    #[tokio::test]
    async fn test_save_assigns_temp_id_and_drops_id() {
        let (_store, drafts) = manager();
        let mut entity = account("Fintech");
        entity.id = Some("server-id".to_string());

        let draft = drafts.save_draft(EntityKind::Account, entity).await.unwrap();
        assert!(is_temp_id(&draft.temp_id));
        assert!(draft.entity.id.is_none());
        assert_eq!(
            drafts.get_draft(EntityKind::Account, &draft.temp_id).await,
            Some(draft)
        );
    }

    #[tokio::test]
    async fn test_preserving_update_keeps_untouched_fields() {
        let (_store, drafts) = manager();
        let draft = drafts
            .save_draft(EntityKind::Account, account("Fintech"))
            .await
            .unwrap();

        let updated = drafts
            .update_draft_preserve_fields(
                EntityKind::Account,
                &draft.temp_id,
                json!({"buyingSignals": [{"title": "Raised Series B"}]})
                    .as_object()
                    .unwrap(),
            )
            .await;
        assert!(updated);

        let after = drafts
            .get_draft(EntityKind::Account, &draft.temp_id)
            .await
            .unwrap();
        assert_eq!(after.entity.data["firmographics"], json!({"industry": ["Fintech"]}));
        assert_eq!(after.entity.data["targetAccountName"], "Fintech");
        assert_eq!(
            after.entity.fields["buyingSignals"],
            json!([{"title": "Raised Series B"}])
        );
        assert_eq!(after.temp_id, draft.temp_id);
        assert_eq!(after.drafted_at, draft.drafted_at);
    }

    #[tokio::test]
    async fn test_kinds_are_isolated() {
        let (_store, drafts) = manager();
        let draft = drafts
            .save_draft(EntityKind::Account, account("Fintech"))
            .await
            .unwrap();
        drafts
            .save_draft(EntityKind::Persona, account("VP Sales"))
            .await
            .unwrap();

        let updated = drafts
            .update_draft_preserve_fields(
                EntityKind::Persona,
                &draft.temp_id,
                json!({"name": "wrong kind"}).as_object().unwrap(),
            )
            .await;
        assert!(!updated);
        assert_eq!(drafts.get_drafts(EntityKind::Account).await.len(), 1);
        assert_eq!(drafts.get_drafts(EntityKind::Persona).await.len(), 1);
        assert!(drafts.get_drafts(EntityKind::Campaign).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_draft_update_writes_nothing() {
        let (store, drafts) = manager();
        drafts
            .save_draft(EntityKind::Account, account("Fintech"))
            .await
            .unwrap();
        let before = store.snapshot();

        let updated = drafts
            .update_draft_preserve_fields(
                EntityKind::Account,
                "temp_missing",
                json!({"name": "x"}).as_object().unwrap(),
            )
            .await;

        assert!(!updated);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_clear_only_on_real_transition() {
        let (_store, drafts) = manager();
        drafts
            .save_draft(EntityKind::Campaign, account("Intro"))
            .await
            .unwrap();

        // unauthenticated -> unauthenticated
        assert!(!drafts.clear_drafts_on_auth_change(true, false).await);
        // authenticated -> authenticated
        assert!(!drafts.clear_drafts_on_auth_change(false, true).await);
        assert_eq!(drafts.get_drafts(EntityKind::Campaign).await.len(), 1);

        // unauthenticated -> authenticated
        assert!(drafts.clear_drafts_on_auth_change(true, true).await);
        assert!(drafts.get_drafts(EntityKind::Campaign).await.is_empty());

        drafts
            .save_draft(EntityKind::Campaign, account("Intro"))
            .await
            .unwrap();
        // authenticated -> unauthenticated
        assert!(drafts.clear_drafts_on_auth_change(false, false).await);
        assert!(drafts.get_drafts(EntityKind::Campaign).await.is_empty());
    }

    #[tokio::test]
    async fn test_quota_failure_is_reported_not_raised() {
        let drafts = DraftManager::new(Arc::new(MemoryStore::with_quota(16)));
        assert!(drafts
            .save_draft(EntityKind::Account, account("Fintech"))
            .await
            .is_none());
        assert!(drafts.get_drafts(EntityKind::Account).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_draft_unchanged() {
        let store = Arc::new(MemoryStore::with_quota(2048));
        let drafts = DraftManager::new(store.clone());
        let draft = drafts
            .save_draft(EntityKind::Account, account("Fintech"))
            .await
            .unwrap();
        let before = store.snapshot();

        let oversized = json!({"notes": "x".repeat(4096)});
        let updated = drafts
            .update_draft_preserve_fields(
                EntityKind::Account,
                &draft.temp_id,
                oversized.as_object().unwrap(),
            )
            .await;

        assert!(!updated);
        assert_eq!(store.snapshot(), before);
        assert_eq!(
            drafts.get_draft(EntityKind::Account, &draft.temp_id).await,
            Some(draft)
        );
    }

    #[tokio::test]
    async fn test_user_switch_clears_drafts() {
        let (_store, drafts) = manager();
        drafts
            .save_draft(EntityKind::Campaign, account("Intro"))
            .await
            .unwrap();

        drafts
            .on_auth_transition(AuthTransition {
                was_authenticated: true,
                is_authenticated: true,
                identity_changed: true,
            })
            .await;

        assert!(drafts.get_drafts(EntityKind::Campaign).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_drafts_read_as_empty() {
        let (store, drafts) = manager();
        store.set("draft_persona", "{oops").unwrap();
        assert!(drafts.get_drafts(EntityKind::Persona).await.is_empty());

        // A new save replaces the unreadable list.
        let draft = drafts
            .save_draft(EntityKind::Persona, account("CTO"))
            .await
            .unwrap();
        assert_eq!(
            drafts.get_drafts(EntityKind::Persona).await,
            vec![draft]
        );
    }

    #[tokio::test]
    async fn test_drafts_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let temp_id = {
            let drafts = DraftManager::new(Arc::new(FileStore::open(dir.path()).unwrap()));
            drafts
                .save_draft(EntityKind::Account, account("Fintech"))
                .await
                .unwrap()
                .temp_id
        };
        let drafts = DraftManager::new(Arc::new(FileStore::open(dir.path()).unwrap()));
        assert!(drafts.get_draft(EntityKind::Account, &temp_id).await.is_some());
        assert!(drafts.remove_draft(EntityKind::Account, &temp_id).await);
        assert!(!drafts.remove_draft(EntityKind::Account, &temp_id).await);
    }
}
