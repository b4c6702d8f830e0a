use std::sync::Arc;

use crate::auth::{auth_channel, AuthController, AuthStore, IdentityProvider, StaticTokenProvider};
use crate::cache::QueryCache;
use crate::collections::LocalCollections;
use crate::config::Config;
use crate::drafts::DraftManager;
use crate::errors::ClientError;
use crate::remote::{EntityService, HttpEntityService};
use crate::storage::{FileStore, KeyValueStore};

/// Shared client state handed to every page.
#[derive(Clone)]
pub struct ClientState {
    pub config: Config,
    pub service: Arc<dyn EntityService>,
    pub cache: QueryCache,
    pub drafts: DraftManager,
    pub collections: LocalCollections,
    pub auth: AuthStore,
}

impl ClientState {
    /// Wires the components together. The returned controller is the only
    /// writer of auth state; on every boundary crossing or user switch it
    /// clears drafts, then the cache, then the local collections. The settled
    /// identity is kept in `store` across restarts.
    pub fn new(
        config: Config,
        service: Arc<dyn EntityService>,
        store: Arc<dyn KeyValueStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> (Self, AuthController) {
        let cache = QueryCache::new();
        let drafts = DraftManager::new(store.clone());
        let collections = LocalCollections::new(store.clone());

        let (auth, controller) = auth_channel(provider);
        let mut controller = controller.with_persistence(store);
        controller.register(Arc::new(drafts.clone()));
        controller.register(Arc::new(cache.clone()));
        controller.register(Arc::new(collections.clone()));

        let state = Self {
            config,
            service,
            cache,
            drafts,
            collections,
            auth,
        };
        (state, controller)
    }

    /// File-backed storage, HTTP service and the configured static token.
    pub fn from_config(config: Config) -> Result<(Self, AuthController), ClientError> {
        let store = Arc::new(FileStore::open(&config.storage_dir)?);
        let service = Arc::new(HttpEntityService::new(
            &config.api_url,
            config.request_timeout,
        )?);
        let provider = Arc::new(StaticTokenProvider::new(config.api_token.clone()));
        Ok(Self::new(config, service, store, provider))
    }
}
