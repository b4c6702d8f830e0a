//! In-process query cache: the materialized view of persisted entities.
//!
//! Entries are keyed by kind + id (single entities) or kind + scope (lists).
//! Last write by completion order wins. Every mutation is announced on a
//! broadcast channel so views can refetch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::auth::{AuthTransition, AuthTransitionObserver};
use crate::models::{Entity, EntityKind};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Entity { kind: EntityKind, id: String },
    /// `scope` is the parent id a list was fetched under, if any.
    List { kind: EntityKind, scope: Option<String> },
}

impl CacheKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            CacheKey::Entity { kind, .. } | CacheKey::List { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Updated(CacheKey),
    Removed(CacheKey),
    /// `None` means everything was dropped.
    Invalidated(Option<EntityKind>),
}

#[derive(Debug, Clone)]
enum CachedValue {
    Entity(Entity),
    List(Vec<Entity>),
}

#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<RwLock<HashMap<CacheKey, CachedValue>>>,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub async fn get_entity(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        let key = CacheKey::Entity {
            kind,
            id: id.to_string(),
        };
        match self.entries.read().await.get(&key) {
            Some(CachedValue::Entity(entity)) => Some(entity.clone()),
            _ => None,
        }
    }

    /// Stores `entity` under `id` and replaces any copy of it held in cached
    /// lists of the same kind.
    pub async fn set_entity(&self, kind: EntityKind, id: &str, entity: Entity) {
        let key = CacheKey::Entity {
            kind,
            id: id.to_string(),
        };
        let mut touched_lists = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for (list_key, value) in entries.iter_mut() {
                if let (CacheKey::List { kind: list_kind, .. }, CachedValue::List(items)) =
                    (list_key, value)
                {
                    if *list_kind != kind {
                        continue;
                    }
                    for item in items.iter_mut() {
                        if item.id.as_deref() == Some(id) {
                            *item = entity.clone();
                            touched_lists.push(list_key.clone());
                        }
                    }
                }
            }
            entries.insert(key.clone(), CachedValue::Entity(entity));
        }
        debug!("Cached {kind} {id}");
        self.publish(CacheEvent::Updated(key));
        for list_key in touched_lists {
            self.publish(CacheEvent::Updated(list_key));
        }
    }

    /// Drops the entity and removes it from cached lists of the same kind.
    pub async fn remove_entity(&self, kind: EntityKind, id: &str) {
        let key = CacheKey::Entity {
            kind,
            id: id.to_string(),
        };
        {
            let mut entries = self.entries.write().await;
            entries.remove(&key);
            for (list_key, value) in entries.iter_mut() {
                if let (CacheKey::List { kind: list_kind, .. }, CachedValue::List(items)) =
                    (list_key, value)
                {
                    if *list_kind == kind {
                        items.retain(|item| item.id.as_deref() != Some(id));
                    }
                }
            }
        }
        self.publish(CacheEvent::Removed(key));
    }

    pub async fn get_list(&self, kind: EntityKind, scope: Option<&str>) -> Option<Vec<Entity>> {
        let key = CacheKey::List {
            kind,
            scope: scope.map(String::from),
        };
        match self.entries.read().await.get(&key) {
            Some(CachedValue::List(items)) => Some(items.clone()),
            _ => None,
        }
    }

    pub async fn set_list(&self, kind: EntityKind, scope: Option<&str>, items: Vec<Entity>) {
        let key = CacheKey::List {
            kind,
            scope: scope.map(String::from),
        };
        debug!("Cached {} {kind} list entries", items.len());
        self.entries
            .write()
            .await
            .insert(key.clone(), CachedValue::List(items));
        self.publish(CacheEvent::Updated(key));
    }

    /// Drops every list of `kind` (after a create or delete changes membership).
    pub async fn invalidate_lists(&self, kind: EntityKind) {
        self.entries
            .write()
            .await
            .retain(|key, _| !matches!(key, CacheKey::List { kind: k, .. } if *k == kind));
        self.publish(CacheEvent::Invalidated(Some(kind)));
    }

    pub async fn invalidate_kind(&self, kind: EntityKind) {
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|key, _| key.kind() != kind);
            before - entries.len()
        };
        debug!("Invalidated {removed} cached {kind} entries");
        self.publish(CacheEvent::Invalidated(Some(kind)));
    }

    pub async fn invalidate_all(&self) {
        let removed = {
            let mut entries = self.entries.write().await;
            let count = entries.len();
            entries.clear();
            count
        };
        info!("Invalidated all {removed} cache entries");
        self.publish(CacheEvent::Invalidated(None));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuthTransitionObserver for QueryCache {
    fn name(&self) -> &'static str {
        "query_cache"
    }

    async fn on_auth_transition(&self, _transition: AuthTransition) {
        self.invalidate_all().await;
        // Company scope is the root every other query hangs off.
        self.invalidate_kind(EntityKind::Company).await;
    }
}
