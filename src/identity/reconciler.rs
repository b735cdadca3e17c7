//! Identity reconciliation
//!
//! Maps a verified upstream identity onto an internal user with a tiered
//! matching strategy, stopping at the first hit:
//!
//! 1. strong match on `(provider, provider_subject)`
//! 2. provider-email match completing a record with an empty subject
//! 3. sparse match completing a precreated record with no provider at all
//! 4. miss: create a new user
//!
//! Every successful login touches `last_login` and `modified_at`, so repeated
//! logins converge after the first call. `email_verified` only ever moves
//! false→true.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::{User, UserRepository, new_user};
use crate::Result;
use crate::provider::UserProfile;

/// Reconciles upstream identities into the durable user store.
pub struct IdentityReconciler {
    repo: Arc<dyn UserRepository>,
}

impl IdentityReconciler {
    /// Wrap the durable store.
    #[must_use]
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Reconcile one successful upstream authentication.
    ///
    /// # Errors
    ///
    /// Propagates durable-store failures; these surface as internal errors.
    pub async fn reconcile(&self, provider_id: &str, profile: &UserProfile) -> Result<User> {
        let email = profile
            .email
            .clone()
            .unwrap_or_else(|| synthesize_email(provider_id, &profile.subject));
        let name = profile.name.clone().unwrap_or_default();
        let now = Utc::now();

        // Tier 1: strong match
        if let Some(mut user) = self
            .repo
            .find_by_provider_subject(provider_id, &profile.subject)
            .await?
        {
            user.email = email;
            if !name.is_empty() {
                user.name = name;
            }
            if profile.email_verified {
                user.email_verified = true;
            }
            user.last_login = Some(now);
            user.modified_at = now;
            self.repo.update(&user).await?;
            debug!(user = %user.internal_id, provider = %provider_id, "Login matched existing identity");
            return Ok(user);
        }

        // Tier 2: same provider + email, subject not yet recorded
        if let Some(mut user) = self
            .repo
            .find_by_provider_email(provider_id, &email)
            .await?
        {
            user.provider_subject = Some(profile.subject.clone());
            if !name.is_empty() {
                user.name = name;
            }
            if profile.email_verified {
                user.email_verified = true;
            }
            user.last_login = Some(now);
            user.modified_at = now;
            self.repo.update(&user).await?;
            info!(user = %user.internal_id, provider = %provider_id, "Completed provider-email record on first login");
            return Ok(user);
        }

        // Tier 3: sparse precreated record, completable exactly once
        if let Some(mut user) = self.repo.find_sparse_by_email(&email).await? {
            user.provider = Some(provider_id.to_string());
            user.provider_subject = Some(profile.subject.clone());
            if !name.is_empty() {
                user.name = name;
            }
            if profile.email_verified {
                user.email_verified = true;
            }
            user.last_login = Some(now);
            user.modified_at = now;
            self.repo.update(&user).await?;
            info!(user = %user.internal_id, provider = %provider_id, "Completed sparse record on first login");
            return Ok(user);
        }

        // Tier 4: miss
        let mut user = new_user(
            Some(provider_id.to_string()),
            Some(profile.subject.clone()),
            email,
            profile.email_verified,
            name,
        );
        user.last_login = Some(now);
        self.repo.insert(&user).await?;
        info!(user = %user.internal_id, provider = %provider_id, "Created user on first login");
        Ok(user)
    }
}

/// Deterministic placeholder for providers that withhold the email entirely.
#[must_use]
pub fn synthesize_email(provider_id: &str, subject: &str) -> String {
    format!("{provider_id}-{subject}@{provider_id}.oauth.tmi")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryUserRepository;

    fn profile(subject: &str, email: Option<&str>, name: &str) -> UserProfile {
        UserProfile {
            subject: subject.to_string(),
            email: email.map(str::to_string),
            email_verified: true,
            name: Some(name.to_string()),
            ..UserProfile::default()
        }
    }

    fn reconciler() -> (Arc<MemoryUserRepository>, IdentityReconciler) {
        let repo = Arc::new(MemoryUserRepository::new());
        let reconciler = IdentityReconciler::new(repo.clone());
        (repo, reconciler)
    }

    #[tokio::test]
    async fn miss_creates_user_with_fresh_timestamps() {
        let (repo, reconciler) = reconciler();
        let user = reconciler
            .reconcile("github", &profile("42", Some("bob@x"), "Bob"))
            .await
            .unwrap();

        assert_eq!(user.provider.as_deref(), Some("github"));
        assert_eq!(user.provider_subject.as_deref(), Some("42"));
        assert_eq!(user.email, "bob@x");
        assert!(user.last_login.is_some());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn strong_match_updates_profile_fields() {
        let (_, reconciler) = reconciler();
        let first = reconciler
            .reconcile("github", &profile("42", Some("bob@x"), "Bob"))
            .await
            .unwrap();
        let second = reconciler
            .reconcile("github", &profile("42", Some("bob@new"), "Robert"))
            .await
            .unwrap();

        assert_eq!(second.internal_id, first.internal_id);
        assert_eq!(second.email, "bob@new");
        assert_eq!(second.name, "Robert");
    }

    #[tokio::test]
    async fn sparse_record_completed_on_first_login() {
        let (repo, reconciler) = reconciler();
        repo.seed(crate::identity::new_user(
            None,
            None,
            "bob@x".to_string(),
            false,
            String::new(),
        ));

        let user = reconciler
            .reconcile("github", &profile("42", Some("bob@x"), "Bob"))
            .await
            .unwrap();

        assert_eq!(user.provider.as_deref(), Some("github"));
        assert_eq!(user.provider_subject.as_deref(), Some("42"));
        assert_eq!(user.name, "Bob");
        assert_eq!(repo.len(), 1, "completion must not create a second record");
    }

    #[tokio::test]
    async fn provider_email_record_gains_subject() {
        let (repo, reconciler) = reconciler();
        let mut precreated =
            crate::identity::new_user(None, None, "dana@x".to_string(), false, String::new());
        precreated.provider = Some("google".to_string());
        repo.seed(precreated.clone());

        let user = reconciler
            .reconcile("google", &profile("s-9", Some("dana@x"), "Dana"))
            .await
            .unwrap();

        assert_eq!(user.internal_id, precreated.internal_id);
        assert_eq!(user.provider_subject.as_deref(), Some("s-9"));
    }

    #[tokio::test]
    async fn email_verified_is_monotonic() {
        let (_, reconciler) = reconciler();
        let verified = reconciler
            .reconcile("github", &profile("42", Some("bob@x"), "Bob"))
            .await
            .unwrap();
        assert!(verified.email_verified);

        let mut unverified_profile = profile("42", Some("bob@x"), "Bob");
        unverified_profile.email_verified = false;
        let after = reconciler
            .reconcile("github", &unverified_profile)
            .await
            .unwrap();
        assert!(after.email_verified, "true must never revert to false");
    }

    #[tokio::test]
    async fn missing_email_synthesizes_deterministic_identifier() {
        let (_, reconciler) = reconciler();
        let user = reconciler
            .reconcile("github", &profile("9009", None, "Quiet"))
            .await
            .unwrap();
        assert_eq!(user.email, "github-9009@github.oauth.tmi");

        // The same subject lands on the same record next time
        let again = reconciler
            .reconcile("github", &profile("9009", None, "Quiet"))
            .await
            .unwrap();
        assert_eq!(again.internal_id, user.internal_id);
    }

    #[tokio::test]
    async fn repeated_logins_converge() {
        let (repo, reconciler) = reconciler();
        let p = profile("42", Some("bob@x"), "Bob");
        let first = reconciler.reconcile("github", &p).await.unwrap();
        let second = reconciler.reconcile("github", &p).await.unwrap();

        assert_eq!(first.internal_id, second.internal_id);
        assert_eq!(first.email, second.email);
        assert_eq!(first.name, second.name);
        assert_eq!(repo.len(), 1);
    }
}
