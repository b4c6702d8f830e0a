//! Remote Entity Service client.
//!
//! `EntityService` is the set of operations pages run against the backend.
//! `HttpEntityService` is the reqwest implementation; every response body
//! passes through the response normalizer before it leaves this module.
//!
//! Calls are never retried here. Transient failures surface as errors and the
//! caller decides (see `ClientError::is_transient`).

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::ClientError;
use crate::models::{Entity, EntityKind};
use crate::normalize::{normalize_entities, normalize_entity, normalize_generated};

pub mod rate_limit;
pub mod routes;

use rate_limit::RateLimitInfo;
use routes::Route;

#[async_trait]
pub trait EntityService: Send + Sync {
    async fn fetch_one(
        &self,
        kind: EntityKind,
        id: &str,
        token: Option<&str>,
    ) -> Result<Entity, ClientError>;

    async fn fetch_list(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<Entity>, ClientError>;

    /// Runs AI generation. Without a token the demo route is used.
    async fn generate(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        input: &Value,
        token: Option<&str>,
    ) -> Result<Entity, ClientError>;

    async fn create(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        entity: &Entity,
        token: Option<&str>,
    ) -> Result<Entity, ClientError>;

    /// Full replacement of the stored record.
    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        entity: &Entity,
        token: Option<&str>,
    ) -> Result<Entity, ClientError>;

    async fn delete(&self, kind: EntityKind, id: &str, token: Option<&str>)
        -> Result<(), ClientError>;

    /// Reads the current record, merges `partial` into it key by key and
    /// writes the whole record back, so the server never drops fields that
    /// `partial` does not mention.
    async fn update_preserving_fields(
        &self,
        kind: EntityKind,
        id: &str,
        partial: &Map<String, Value>,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        let mut current = self.fetch_one(kind, id, token).await?;
        current.merge_preserving_fields(partial);
        self.update(kind, id, &current, token).await
    }

    /// Same as `update_preserving_fields`, restricted to list-valued fields.
    async fn update_list_fields_preserving_fields(
        &self,
        kind: EntityKind,
        id: &str,
        list_updates: &Map<String, Value>,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        ensure_list_fields(list_updates)?;
        self.update_preserving_fields(kind, id, list_updates, token)
            .await
    }
}

/// Every value must be a JSON array.
pub fn ensure_list_fields(list_updates: &Map<String, Value>) -> Result<(), ClientError> {
    match list_updates.iter().find(|(_, value)| !value.is_array()) {
        Some((key, _)) => Err(ClientError::Validation(format!(
            "field '{key}' must be a list"
        ))),
        None => Ok(()),
    }
}

/// FastAPI-style error body. `detail` is a string, or a list of
/// `{ "msg": ... }` objects for request validation failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Value,
}

impl ErrorBody {
    fn message(self) -> String {
        match self.detail {
            Value::String(message) => message,
            Value::Array(items) => items
                .iter()
                .map(|item| match item.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HttpEntityService {
    client: Client,
    base_url: String,
    rate_limit: Arc<RwLock<Option<RateLimitInfo>>>,
}

impl HttpEntityService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: Arc::new(RwLock::new(None)),
        })
    }

    /// Rate-limit state from the most recent response that carried one.
    pub fn last_rate_limit(&self) -> Option<RateLimitInfo> {
        *self.rate_limit.read().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(
        &self,
        method: Method,
        route: Route,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ClientError> {
        let url = format!("{}{}", self.base_url, route.path);
        debug!("{method} {url}");

        let mut request = self.client.request(method, &url).query(&route.query);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        let rate_limit = RateLimitInfo::from_headers(response.headers());
        if let Some(info) = rate_limit {
            *self
                .rate_limit
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(info);
        }

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Rate limited on {}", route.path);
                return Err(ClientError::RateLimited { info: rate_limit });
            }
            StatusCode::UNAUTHORIZED => return Err(ClientError::Unauthorized),
            StatusCode::NOT_FOUND => return Err(ClientError::NotFound(route.path)),
            StatusCode::NO_CONTENT => return Ok(None),
            _ => {}
        }

        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(ErrorBody::message)
                .unwrap_or(text);
            if status.is_server_error() {
                warn!("Service returned {}: {}", status, message);
            }
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }
}

fn require_body(body: Option<Value>, route: &str) -> Result<Value, ClientError> {
    body.ok_or_else(|| ClientError::InvalidPayload(format!("empty response from {route}")))
}

#[async_trait]
impl EntityService for HttpEntityService {
    async fn fetch_one(
        &self,
        kind: EntityKind,
        id: &str,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        let route = Route::item(kind, id)?;
        let path = route.path.clone();
        let body = self.send(Method::GET, route, token, None).await?;
        normalize_entity(kind, require_body(body, &path)?)
    }

    async fn fetch_list(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<Entity>, ClientError> {
        let route = Route::list(kind, parent)?;
        let path = route.path.clone();
        match self.send(Method::GET, route, token, None).await? {
            Some(Value::Array(items)) => normalize_entities(kind, items),
            None => Ok(Vec::new()),
            Some(_) => Err(ClientError::InvalidPayload(format!(
                "{path} did not return a list"
            ))),
        }
    }

    async fn generate(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        input: &Value,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        let route = Route::generate(kind, parent, token.is_some())?;
        let path = route.path.clone();
        let body = self.send(Method::POST, route, token, Some(input)).await?;
        let entity = normalize_generated(kind, require_body(body, &path)?)?;
        debug!("Generated {kind} via {path}");
        Ok(entity)
    }

    async fn create(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        entity: &Entity,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        let route = Route::create(kind, parent)?;
        let path = route.path.clone();
        let payload = entity.to_payload();
        let body = self
            .send(Method::POST, route, token, Some(&payload))
            .await?;
        normalize_entity(kind, require_body(body, &path)?)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        entity: &Entity,
        token: Option<&str>,
    ) -> Result<Entity, ClientError> {
        let route = Route::item(kind, id)?;
        let path = route.path.clone();
        let payload = entity.to_payload();
        let body = self.send(Method::PUT, route, token, Some(&payload)).await?;
        normalize_entity(kind, require_body(body, &path)?)
    }

    async fn delete(
        &self,
        kind: EntityKind,
        id: &str,
        token: Option<&str>,
    ) -> Result<(), ClientError> {
        let route = Route::item(kind, id)?;
        self.send(Method::DELETE, route, token, None).await?;
        Ok(())
    }
}
