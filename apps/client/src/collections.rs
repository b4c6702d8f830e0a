//! Local target-account and persona collections for signed-out use.
//!
//! Stored as JSON lists under `target_accounts` and `target_personas`.
//! Persona records carry the id of the account they belong to.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::{AuthTransition, AuthTransitionObserver};
use crate::models::Entity;
use crate::storage::{read_json, write_json, KeyValueStore, StorageError};

pub const ACCOUNTS_KEY: &str = "target_accounts";
pub const PERSONAS_KEY: &str = "target_personas";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPersona {
    account_id: String,
    persona: Entity,
}

#[derive(Clone)]
pub struct LocalCollections {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl LocalCollections {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn load_accounts(&self) -> Result<Vec<Entity>, StorageError> {
        Ok(read_json(self.store.as_ref(), ACCOUNTS_KEY)?.unwrap_or_default())
    }

    fn load_personas(&self) -> Result<Vec<StoredPersona>, StorageError> {
        Ok(read_json(self.store.as_ref(), PERSONAS_KEY)?.unwrap_or_default())
    }

    pub async fn accounts(&self) -> Vec<Entity> {
        let _guard = self.lock.lock().await;
        self.load_accounts().unwrap_or_else(|e| {
            warn!("Could not read local accounts: {e}");
            Vec::new()
        })
    }

    /// Inserts or replaces (by id) a local account. Entities without an id are rejected.
    pub async fn save_account(&self, account: Entity) -> bool {
        let Some(id) = account.id.clone() else {
            warn!("Refusing to store a local account without an id");
            return false;
        };
        let _guard = self.lock.lock().await;
        let result = self.load_accounts().and_then(|mut accounts| {
            match accounts.iter_mut().find(|a| a.id.as_deref() == Some(id.as_str())) {
                Some(existing) => *existing = account,
                None => accounts.push(account),
            }
            write_json(self.store.as_ref(), ACCOUNTS_KEY, &accounts)
        });
        match result {
            Ok(()) => {
                debug!("Stored local account {id}");
                true
            }
            Err(e) => {
                warn!("Could not store local account {id}: {e}");
                false
            }
        }
    }

    /// Removes the account and every persona filed under it. Personas go
    /// first, so a failed write never leaves them without their account.
    pub async fn remove_account(&self, account_id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let result = self.load_accounts().and_then(|mut accounts| {
            let before = accounts.len();
            accounts.retain(|a| a.id.as_deref() != Some(account_id));
            if accounts.len() == before {
                return Ok(false);
            }
            let mut personas = self.load_personas()?;
            let owned = personas.len();
            personas.retain(|p| p.account_id != account_id);
            if personas.len() != owned {
                write_json(self.store.as_ref(), PERSONAS_KEY, &personas)?;
            }
            write_json(self.store.as_ref(), ACCOUNTS_KEY, &accounts)?;
            Ok(true)
        });
        result.unwrap_or_else(|e| {
            warn!("Could not remove local account {account_id}: {e}");
            false
        })
    }

    pub async fn personas_for(&self, account_id: &str) -> Vec<Entity> {
        let _guard = self.lock.lock().await;
        match self.load_personas() {
            Ok(personas) => personas
                .into_iter()
                .filter(|p| p.account_id == account_id)
                .map(|p| p.persona)
                .collect(),
            Err(e) => {
                warn!("Could not read local personas: {e}");
                Vec::new()
            }
        }
    }

    pub async fn save_persona(&self, account_id: &str, persona: Entity) -> bool {
        let Some(id) = persona.id.clone() else {
            warn!("Refusing to store a local persona without an id");
            return false;
        };
        let _guard = self.lock.lock().await;
        let result = self.load_personas().and_then(|mut personas| {
            let existing = personas.iter_mut().find(|p| {
                p.account_id == account_id && p.persona.id.as_deref() == Some(id.as_str())
            });
            match existing {
                Some(stored) => stored.persona = persona,
                None => personas.push(StoredPersona {
                    account_id: account_id.to_string(),
                    persona,
                }),
            }
            write_json(self.store.as_ref(), PERSONAS_KEY, &personas)
        });
        match result {
            Ok(()) => {
                debug!("Stored local persona {id} under account {account_id}");
                true
            }
            Err(e) => {
                warn!("Could not store local persona {id}: {e}");
                false
            }
        }
    }

    pub async fn remove_persona(&self, account_id: &str, persona_id: &str) -> bool {
        let _guard = self.lock.lock().await;
        let result = self.load_personas().and_then(|mut personas| {
            let before = personas.len();
            personas.retain(|p| {
                !(p.account_id == account_id && p.persona.id.as_deref() == Some(persona_id))
            });
            if personas.len() == before {
                return Ok(false);
            }
            write_json(self.store.as_ref(), PERSONAS_KEY, &personas)?;
            Ok(true)
        });
        result.unwrap_or_else(|e| {
            warn!("Could not remove local persona {persona_id}: {e}");
            false
        })
    }

    pub async fn find_persona(&self, account_id: &str, persona_id: &str) -> Option<Entity> {
        self.personas_for(account_id)
            .await
            .into_iter()
            .find(|p| p.id.as_deref() == Some(persona_id))
    }

    pub async fn clear(&self) {
        let _guard = self.lock.lock().await;
        for key in [ACCOUNTS_KEY, PERSONAS_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Could not clear {key}: {e}");
            }
        }
        info!("Cleared local collections");
    }
}

#[async_trait]
impl AuthTransitionObserver for LocalCollections {
    fn name(&self) -> &'static str {
        "local_collections"
    }

    async fn on_auth_transition(&self, _transition: AuthTransition) {
        self.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn named(id: &str, name: &str) -> Entity {
        Entity {
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn collections() -> LocalCollections {
        LocalCollections::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_accounts_upsert_by_id() {
        let local = collections();
        assert!(local.accounts().await.is_empty());

        assert!(local.save_account(named("temp_a", "Fintech")).await);
        assert!(local.save_account(named("temp_b", "Healthcare")).await);
        assert!(local.save_account(named("temp_a", "Fintech EU")).await);

        let accounts = local.accounts().await;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name.as_deref(), Some("Fintech EU"));
        assert!(!local.save_account(Entity::default()).await);
    }

    #[tokio::test]
    async fn test_personas_are_scoped_to_their_account() {
        let local = collections();
        local.save_persona("temp_a", named("temp_p1", "CFO")).await;
        local.save_persona("temp_b", named("temp_p2", "CTO")).await;

        assert_eq!(local.personas_for("temp_a").await.len(), 1);
        assert_eq!(
            local.find_persona("temp_a", "temp_p1").await.unwrap().name.as_deref(),
            Some("CFO")
        );
        assert!(local.find_persona("temp_a", "temp_p2").await.is_none());
        assert!(local.find_persona("missing", "temp_p1").await.is_none());

        assert!(local.remove_persona("temp_a", "temp_p1").await);
        assert!(!local.remove_persona("temp_a", "temp_p1").await);
    }

    #[tokio::test]
    async fn test_removing_account_drops_its_personas() {
        let local = collections();
        local.save_account(named("temp_a", "Fintech")).await;
        local.save_persona("temp_a", named("temp_p1", "CFO")).await;

        assert!(local.remove_account("temp_a").await);
        assert!(local.accounts().await.is_empty());
        assert!(local.personas_for("temp_a").await.is_empty());
    }

    /// Fails writes to one key, accepts everything else.
    struct RejectKey {
        inner: MemoryStore,
        rejected: &'static str,
    }

    impl KeyValueStore for RejectKey {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.rejected {
                return Err(StorageError::QuotaExceeded {
                    requested: value.len(),
                    quota: 0,
                });
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn test_failed_persona_write_keeps_account() {
        let store = Arc::new(RejectKey {
            inner: MemoryStore::new(),
            rejected: PERSONAS_KEY,
        });
        let personas = vec![StoredPersona {
            account_id: "temp_a".to_string(),
            persona: named("temp_p1", "CFO"),
        }];
        store
            .inner
            .set(PERSONAS_KEY, &serde_json::to_string(&personas).unwrap())
            .unwrap();
        let local = LocalCollections::new(store);
        assert!(local.save_account(named("temp_a", "Fintech")).await);

        assert!(!local.remove_account("temp_a").await);
        assert_eq!(local.accounts().await.len(), 1);
        assert_eq!(local.personas_for("temp_a").await.len(), 1);
    }

    #[tokio::test]
    async fn test_auth_transition_clears_collections() {
        let local = collections();
        local.save_account(named("temp_a", "Fintech")).await;
        local
            .on_auth_transition(AuthTransition {
                was_authenticated: false,
                is_authenticated: true,
                identity_changed: false,
            })
            .await;
        assert!(local.accounts().await.is_empty());
    }
}
