//! Route table of the Remote Entity Service, relative to the API base URL.
//!
//! | kind     | list                        | create                       | generate                           | demo generate                    |
//! |----------|-----------------------------|------------------------------|------------------------------------|----------------------------------|
//! | company  | `/companies`                | `/companies`                 | `/companies/generate-ai`           | `/demo/company/overview`         |
//! | account  | `/accounts?company_id=`     | `/accounts?company_id=`      | `/accounts/generate-ai`            | `/demo/accounts`                 |
//! | persona  | `/accounts/{id}/personas`   | `/accounts/{id}/personas`    | `/accounts/{id}/personas/generate` | `/demo/personas`                 |
//! | campaign | `/campaigns?account_id=`    | `/campaigns`                 | `/campaigns/generate-email`        | `/demo/campaigns/generate-email` |
//!
//! Single records live at `/{collection}/{id}` for fetch, update and delete.

use crate::errors::ClientError;
use crate::models::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

impl Route {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    fn with_query(mut self, key: &'static str, value: &str) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    /// `GET`/`PUT`/`DELETE` target for one record.
    pub fn item(kind: EntityKind, id: &str) -> Result<Self, ClientError> {
        Ok(Self::new(format!(
            "/{}/{}",
            kind.collection_path(),
            segment(id)?
        )))
    }

    pub fn list(kind: EntityKind, parent: Option<&str>) -> Result<Self, ClientError> {
        match kind {
            EntityKind::Company => Ok(Self::new("/companies")),
            EntityKind::Account => {
                Ok(Self::new("/accounts").with_query("company_id", require(kind, parent)?))
            }
            EntityKind::Persona => Ok(Self::new(format!(
                "/accounts/{}/personas",
                segment(require(kind, parent)?)?
            ))),
            EntityKind::Campaign => {
                let route = Self::new("/campaigns");
                Ok(match parent {
                    Some(account_id) => route.with_query("account_id", account_id),
                    None => route,
                })
            }
        }
    }

    pub fn create(kind: EntityKind, parent: Option<&str>) -> Result<Self, ClientError> {
        match kind {
            EntityKind::Campaign => Ok(Self::new("/campaigns")),
            _ => Self::list(kind, parent),
        }
    }

    /// AI generation. Signed-out callers use the rate-limited demo routes.
    pub fn generate(
        kind: EntityKind,
        parent: Option<&str>,
        authenticated: bool,
    ) -> Result<Self, ClientError> {
        if !authenticated {
            return Ok(Self::new(match kind {
                EntityKind::Company => "/demo/company/overview",
                EntityKind::Account => "/demo/accounts",
                EntityKind::Persona => "/demo/personas",
                EntityKind::Campaign => "/demo/campaigns/generate-email",
            }));
        }
        match kind {
            EntityKind::Company => Ok(Self::new("/companies/generate-ai")),
            EntityKind::Account => Ok(Self::new("/accounts/generate-ai")),
            EntityKind::Persona => Ok(Self::new(format!(
                "/accounts/{}/personas/generate",
                segment(require(kind, parent)?)?
            ))),
            EntityKind::Campaign => Ok(Self::new("/campaigns/generate-email")),
        }
    }
}

fn require<'a>(kind: EntityKind, parent: Option<&'a str>) -> Result<&'a str, ClientError> {
    let parent_kind = match kind {
        EntityKind::Account => "company",
        _ => "account",
    };
    parent
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ClientError::Validation(format!("{kind} requires a {parent_kind} id")))
}

fn segment(id: &str) -> Result<&str, ClientError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(ClientError::Validation(format!("invalid id '{id}'")))
    }
}
