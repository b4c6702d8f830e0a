//! Entity Page State: per-page orchestration of remote records, drafts and
//! AI generation results.
//!
//! What the page shows is decided by `resolve_display_entity`: an unsaved
//! generation result beats a draft, which beats the persisted record. Only the
//! pending result belongs to the page; drafts are read from the Draft Manager
//! and persisted records from the cache each time, so auth wipes and writes
//! made through other pages show up immediately. Writes are routed by auth
//! state and route: signed-in pages talk to the remote service and cache,
//! signed-out pages keep everything in local drafts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::drafts::is_temp_id;
use crate::errors::ClientError;
use crate::models::{Draft, Entity, EntityKind};
use crate::remote::ensure_list_fields;
use crate::state::ClientState;

// ────────────────────────────────────────────────────────────────────────────
// Route & display model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRoute {
    New,
    Draft(String),
    Persisted(String),
}

impl EntityRoute {
    /// `temp_…` is a draft, empty or `new` is a blank page, anything else a persisted id.
    pub fn parse(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            None | Some("") | Some("new") => EntityRoute::New,
            Some(id) if is_temp_id(id) => EntityRoute::Draft(id.to_string()),
            Some(id) => EntityRoute::Persisted(id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEntity {
    /// Generated, not yet saved anywhere.
    Pending(Entity),
    Draft(Draft),
    Persisted(Entity),
}

impl DisplayEntity {
    pub fn entity(&self) -> &Entity {
        match self {
            DisplayEntity::Pending(entity) | DisplayEntity::Persisted(entity) => entity,
            DisplayEntity::Draft(draft) => &draft.entity,
        }
    }

    /// Drafts come back addressed by their temp id.
    pub fn into_entity(self) -> Entity {
        match self {
            DisplayEntity::Pending(entity) | DisplayEntity::Persisted(entity) => entity,
            DisplayEntity::Draft(draft) => draft.to_entity(),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            DisplayEntity::Pending(_) => "pending",
            DisplayEntity::Draft(_) => "draft",
            DisplayEntity::Persisted(_) => "persisted",
        }
    }
}

pub fn resolve_display_entity(
    pending: Option<&Entity>,
    draft: Option<&Draft>,
    persisted: Option<&Entity>,
) -> Option<DisplayEntity> {
    if let Some(entity) = pending {
        return Some(DisplayEntity::Pending(entity.clone()));
    }
    if let Some(draft) = draft {
        return Some(DisplayEntity::Draft(draft.clone()));
    }
    persisted.map(|entity| DisplayEntity::Persisted(entity.clone()))
}

#[derive(Debug, Clone)]
pub struct EntityPageConfig {
    pub kind: EntityKind,
    /// Company id for accounts, account id for personas and campaigns.
    pub parent_id: Option<String>,
}

impl EntityPageConfig {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Lets a page's owner mark it unmounted while an operation is in flight.
#[derive(Debug, Clone)]
pub struct PageHandle {
    mounted: Arc<AtomicBool>,
}

impl PageHandle {
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// EntityPage
// ────────────────────────────────────────────────────────────────────────────

pub struct EntityPage {
    config: EntityPageConfig,
    route: EntityRoute,
    state: ClientState,
    pending: Option<Entity>,
    mounted: Arc<AtomicBool>,
}

impl EntityPage {
    pub fn new(config: EntityPageConfig, route_param: Option<&str>, state: ClientState) -> Self {
        Self {
            config,
            route: EntityRoute::parse(route_param),
            state,
            pending: None,
            mounted: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.config.kind
    }

    pub fn route(&self) -> &EntityRoute {
        &self.route
    }

    pub fn handle(&self) -> PageHandle {
        PageHandle {
            mounted: self.mounted.clone(),
        }
    }

    pub fn unmount(&self) {
        self.handle().unmount();
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    fn parent(&self) -> Option<&str> {
        self.config.parent_id.as_deref()
    }

    fn token(&self) -> Option<String> {
        self.state.auth.bearer_token()
    }

    /// Current view from the pending result, the Draft Manager and the cache.
    /// Never calls the remote service.
    pub async fn display_entity(&self) -> Option<DisplayEntity> {
        let kind = self.kind();
        let (draft, persisted) = match &self.route {
            EntityRoute::New => (None, None),
            EntityRoute::Draft(temp_id) => (self.state.drafts.get_draft(kind, temp_id).await, None),
            EntityRoute::Persisted(id) => (None, self.state.cache.get_entity(kind, id).await),
        };
        let shown = resolve_display_entity(self.pending.as_ref(), draft.as_ref(), persisted.as_ref());
        if let Some(current) = &shown {
            debug!(
                "{kind} page shows {} entity ({} data fields)",
                current.source(),
                current.entity().data.len()
            );
        }
        shown
    }

    /// Loads whatever the route points at: a draft from the draft store, or a
    /// persisted record from the cache, falling back to the remote service.
    pub async fn load(&mut self) -> Result<Option<DisplayEntity>, ClientError> {
        let kind = self.kind();
        match self.route.clone() {
            EntityRoute::New => {}
            EntityRoute::Draft(temp_id) => {
                if self.state.drafts.get_draft(kind, &temp_id).await.is_none() {
                    warn!("{kind} draft {temp_id} not found");
                }
            }
            EntityRoute::Persisted(id) => {
                if self.state.cache.get_entity(kind, &id).await.is_none() {
                    let token = self.token();
                    let fetched = self
                        .state
                        .service
                        .fetch_one(kind, &id, token.as_deref())
                        .await?;
                    self.state.cache.set_entity(kind, &id, fetched).await;
                }
            }
        }
        Ok(self.display_entity().await)
    }

    /// Entities of this page's kind (under its parent). Signed-out users see
    /// their local collections or drafts.
    pub async fn load_list(&self) -> Result<Vec<Entity>, ClientError> {
        let kind = self.kind();
        if !self.state.auth.is_authenticated() {
            return Ok(match (kind, self.parent()) {
                (EntityKind::Account, _) => self.state.collections.accounts().await,
                (EntityKind::Persona, Some(account_id)) => {
                    self.state.collections.personas_for(account_id).await
                }
                _ => self
                    .state
                    .drafts
                    .get_drafts(kind)
                    .await
                    .iter()
                    .map(Draft::to_entity)
                    .collect(),
            });
        }

        if let Some(cached) = self.state.cache.get_list(kind, self.parent()).await {
            return Ok(cached);
        }
        let token = self.token();
        let items = self
            .state
            .service
            .fetch_list(kind, self.parent(), token.as_deref())
            .await?;
        self.state
            .cache
            .set_list(kind, self.parent(), items.clone())
            .await;
        Ok(items)
    }

    /// Runs AI generation. The result becomes the pending entity unless the
    /// page was unmounted while the call was in flight, in which case it is
    /// dropped and `None` is returned.
    pub async fn generate_entity(&mut self, input: &Value) -> Result<Option<Entity>, ClientError> {
        let kind = self.kind();
        let token = self.token();
        let generated = self
            .state
            .service
            .generate(kind, self.parent(), input, token.as_deref())
            .await?;

        if !self.is_mounted() {
            debug!("{kind} page unmounted; discarding generation result");
            return Ok(None);
        }
        info!("Generated {kind} ({} data fields)", generated.data.len());
        self.pending = Some(generated.clone());
        Ok(Some(generated))
    }

    /// Create-on-save. Signed in, the displayed entity is created remotely and
    /// any draft it came from is removed. Signed out, a pending entity becomes
    /// a local draft. Already-saved entities are returned unchanged.
    pub async fn save(&mut self) -> Result<Entity, ClientError> {
        let kind = self.kind();
        let display = self
            .display_entity()
            .await
            .ok_or_else(|| ClientError::Validation(format!("no {kind} to save")))?;

        if let DisplayEntity::Persisted(entity) = display {
            return Ok(entity);
        }

        if self.state.auth.is_authenticated() {
            let source_draft = match &display {
                DisplayEntity::Draft(draft) => Some(draft.temp_id.clone()),
                _ => None,
            };
            let entity = Entity {
                id: None,
                ..display.entity().clone()
            };
            let token = self.token();
            let created = self
                .state
                .service
                .create(kind, self.parent(), &entity, token.as_deref())
                .await?;
            let id = created.id.clone().ok_or_else(|| {
                ClientError::InvalidPayload(format!("created {kind} has no id"))
            })?;

            self.state.cache.set_entity(kind, &id, created.clone()).await;
            self.state.cache.invalidate_lists(kind).await;
            if let Some(temp_id) = source_draft {
                if !self.state.drafts.remove_draft(kind, &temp_id).await {
                    warn!("Created {kind} {id} but could not remove draft {temp_id}");
                }
                self.state.cache.remove_entity(kind, &temp_id).await;
            }
            info!("Created {kind} {id}");

            self.pending = None;
            self.route = EntityRoute::Persisted(id);
            return Ok(created);
        }

        match display {
            DisplayEntity::Pending(entity) => {
                let draft = self
                    .state
                    .drafts
                    .save_draft(kind, entity)
                    .await
                    .ok_or_else(|| ClientError::DraftNotSaved(format!("new {kind} draft")))?;
                self.mirror_draft(&draft).await;
                self.pending = None;
                self.route = EntityRoute::Draft(draft.temp_id.clone());
                Ok(draft.to_entity())
            }
            other => Ok(other.into_entity()),
        }
    }

    /// Field-preserving partial update of whatever the page shows.
    pub async fn update(&mut self, partial: &Map<String, Value>) -> Result<Entity, ClientError> {
        self.apply_update(partial, false).await
    }

    /// `update` restricted to list-valued fields; any non-list value is rejected
    /// before anything is written.
    pub async fn update_list_fields(
        &mut self,
        list_updates: &Map<String, Value>,
    ) -> Result<Entity, ClientError> {
        ensure_list_fields(list_updates)?;
        self.apply_update(list_updates, true).await
    }

    async fn apply_update(
        &mut self,
        partial: &Map<String, Value>,
        lists_only: bool,
    ) -> Result<Entity, ClientError> {
        let kind = self.kind();

        if let Some(pending) = self.pending.as_mut() {
            pending.merge_preserving_fields(partial);
            return Ok(pending.clone());
        }

        match self.route.clone() {
            EntityRoute::Persisted(id) => {
                let token = self
                    .token()
                    .ok_or(ClientError::Unauthorized)?;
                let service = &self.state.service;
                let updated = if lists_only {
                    service
                        .update_list_fields_preserving_fields(kind, &id, partial, Some(&token))
                        .await?
                } else {
                    service
                        .update_preserving_fields(kind, &id, partial, Some(&token))
                        .await?
                };
                self.state.cache.set_entity(kind, &id, updated.clone()).await;
                Ok(updated)
            }
            EntityRoute::Draft(temp_id) => {
                let drafts = &self.state.drafts;
                if !drafts
                    .update_draft_preserve_fields(kind, &temp_id, partial)
                    .await
                {
                    return Err(ClientError::DraftNotSaved(format!("{kind} draft {temp_id}")));
                }
                let draft = drafts
                    .get_draft(kind, &temp_id)
                    .await
                    .ok_or_else(|| ClientError::DraftNotSaved(format!("{kind} draft {temp_id}")))?;
                self.mirror_draft(&draft).await;
                Ok(draft.to_entity())
            }
            EntityRoute::New => Err(ClientError::Validation(format!("no {kind} to update"))),
        }
    }

    /// Full replacement of the persisted record.
    pub async fn replace(&mut self, entity: Entity) -> Result<Entity, ClientError> {
        let kind = self.kind();
        let EntityRoute::Persisted(id) = self.route.clone() else {
            return Err(ClientError::Validation(format!(
                "only saved {kind} records can be replaced"
            )));
        };
        let token = self.token().ok_or(ClientError::Unauthorized)?;
        let updated = self
            .state
            .service
            .update(kind, &id, &entity, Some(&token))
            .await?;
        self.state.cache.set_entity(kind, &id, updated.clone()).await;
        Ok(updated)
    }

    /// Deletes the remote record or the local draft; a pending result is discarded.
    pub async fn delete(&mut self) -> Result<(), ClientError> {
        let kind = self.kind();
        match self.route.clone() {
            EntityRoute::Persisted(id) => {
                let token = self.token().ok_or(ClientError::Unauthorized)?;
                self.state
                    .service
                    .delete(kind, &id, Some(&token))
                    .await?;
                self.state.cache.remove_entity(kind, &id).await;
                self.state.cache.invalidate_lists(kind).await;
                info!("Deleted {kind} {id}");
            }
            EntityRoute::Draft(temp_id) => {
                if !self.state.drafts.remove_draft(kind, &temp_id).await {
                    return Err(ClientError::DraftNotSaved(format!("{kind} draft {temp_id}")));
                }
                self.state.cache.remove_entity(kind, &temp_id).await;
                match (kind, self.parent()) {
                    (EntityKind::Account, _) => {
                        self.state.collections.remove_account(&temp_id).await;
                    }
                    (EntityKind::Persona, Some(account_id)) => {
                        self.state
                            .collections
                            .remove_persona(account_id, &temp_id)
                            .await;
                    }
                    _ => {}
                }
            }
            EntityRoute::New => {}
        }
        self.pending = None;
        self.route = EntityRoute::New;
        Ok(())
    }

    /// Drafts are mirrored into the cache under their temp id, and accounts and
    /// personas into the local collections, so lists and detail views agree.
    async fn mirror_draft(&self, draft: &Draft) {
        let kind = self.kind();
        let entity = draft.to_entity();
        self.state
            .cache
            .set_entity(kind, &draft.temp_id, entity.clone())
            .await;
        match (kind, self.parent()) {
            (EntityKind::Account, _) => {
                self.state.collections.save_account(entity).await;
            }
            (EntityKind::Persona, Some(account_id)) => {
                self.state.collections.save_persona(account_id, entity).await;
            }
            _ => {}
        }
    }
}
