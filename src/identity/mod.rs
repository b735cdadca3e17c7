//! User model and durable-store contract
//!
//! The durable user store owns the [`User`] lifecycle; this module defines
//! its narrow contract ([`UserRepository`]) and an in-memory implementation
//! for tests and small deployments. `internal_id` is stable and never reused;
//! at most one record exists per `(provider, provider_subject)` pair and per
//! `(provider, email)` pair when the provider is set.

pub mod reconciler;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A TMI user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Opaque stable identifier (UUID), never reused
    pub internal_id: String,
    /// Login provider id; `None` for sparse precreated records
    pub provider: Option<String>,
    /// Subject at the login provider; `None` for sparse records
    pub provider_subject: Option<String>,
    /// Email address
    pub email: String,
    /// Whether the email has been asserted verified by an upstream
    pub email_verified: bool,
    /// Display name
    pub name: String,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// A sparse user has an email but no provider identity yet; a first login
    /// completes it exactly once.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.provider.is_none() && self.provider_subject.is_none()
    }
}

/// Counts reported by the durable store when a user is erased.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeletionOutcome {
    /// Threat models re-homed to other owners
    #[serde(rename = "threatModelsTransferred")]
    pub threat_models_transferred: u64,
    /// Threat models removed outright
    #[serde(rename = "threatModelsDeleted")]
    pub threat_models_deleted: u64,
}

/// Narrow contract over the durable user store.
///
/// Implementations must tolerate concurrent writers; the reconciler retries
/// nothing and relies on the uniqueness constraints above.
#[async_trait::async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Find by `(provider, provider_subject)`.
    async fn find_by_provider_subject(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>>;

    /// Find by `(provider, email)` where the subject is still empty.
    async fn find_by_provider_email(&self, provider: &str, email: &str)
    -> Result<Option<User>>;

    /// Find a sparse record by bare email.
    async fn find_sparse_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find any record by email, sparse or completed.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find by internal id.
    async fn find_by_id(&self, internal_id: &str) -> Result<Option<User>>;

    /// Insert a new record.
    async fn insert(&self, user: &User) -> Result<()>;

    /// Persist changes to an existing record.
    async fn update(&self, user: &User) -> Result<()>;

    /// Erase a user and re-home or drop their threat models.
    async fn delete_by_email(&self, email: &str) -> Result<DeletionOutcome>;

    /// Erase a group, reporting the same counts.
    async fn delete_group(&self, name: &str) -> Result<DeletionOutcome>;
}

/// In-memory repository keyed by internal id.
pub struct MemoryUserRepository {
    users: DashMap<String, User>,
}

impl MemoryUserRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Seed a record; test and bootstrap helper.
    pub fn seed(&self, user: User) {
        self.users.insert(user.internal_id.clone(), user);
    }

    /// Number of stored users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for MemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_provider_subject(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.provider.as_deref() == Some(provider)
                    && u.provider_subject.as_deref() == Some(subject)
            })
            .map(|u| u.clone()))
    }

    async fn find_by_provider_email(
        &self,
        provider: &str,
        email: &str,
    ) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.provider.as_deref() == Some(provider)
                    && u.provider_subject.is_none()
                    && u.email == email
            })
            .map(|u| u.clone()))
    }

    async fn find_sparse_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.is_sparse() && u.email == email)
            .map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone()))
    }

    async fn find_by_id(&self, internal_id: &str) -> Result<Option<User>> {
        Ok(self.users.get(internal_id).map(|u| u.clone()))
    }

    async fn insert(&self, user: &User) -> Result<()> {
        self.users.insert(user.internal_id.clone(), user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        if !self.users.contains_key(&user.internal_id) {
            return Err(Error::Internal(format!(
                "update of unknown user {}",
                user.internal_id
            )));
        }
        self.users.insert(user.internal_id.clone(), user.clone());
        Ok(())
    }

    async fn delete_by_email(&self, email: &str) -> Result<DeletionOutcome> {
        let ids: Vec<String> = self
            .users
            .iter()
            .filter(|u| u.email == email)
            .map(|u| u.internal_id.clone())
            .collect();
        let deleted = ids.len() as u64;
        for id in ids {
            self.users.remove(&id);
        }
        Ok(DeletionOutcome {
            threat_models_transferred: 0,
            threat_models_deleted: deleted,
        })
    }

    async fn delete_group(&self, _name: &str) -> Result<DeletionOutcome> {
        // The in-memory store carries no group-owned threat models
        Ok(DeletionOutcome::default())
    }
}

/// Construct a new user with fresh timestamps.
#[must_use]
pub fn new_user(
    provider: Option<String>,
    provider_subject: Option<String>,
    email: String,
    email_verified: bool,
    name: String,
) -> User {
    let now = Utc::now();
    User {
        internal_id: Uuid::new_v4().to_string(),
        provider,
        provider_subject,
        email,
        email_verified,
        name,
        created_at: now,
        modified_at: now,
        last_login: None,
    }
}
