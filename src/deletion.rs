//! Two-step account and group erasure
//!
//! Step one hands the caller a challenge sentence embedding their email (or
//! group name) and a random token, stored for three minutes. Step two parses
//! the sentence back, compares the token in constant time, and only then
//! invokes the durable deletion repository. The sentence format is fixed so
//! a client cannot be tricked into posting a deletion confirmation it did not
//! read.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngExt;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::identity::{DeletionOutcome, UserRepository};
use crate::store::{FlowStore, StoreError};
use crate::{Error, Result};

const USER_CHALLENGE_KIND: &str = "user";
const GROUP_CHALLENGE_KIND: &str = "group";

/// Challenge issued to a caller who asked for erasure.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionChallenge {
    /// The sentence the caller must echo back verbatim
    pub text: String,
    /// When the challenge stops being accepted
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Orchestrates challenge issuance and verified deletion.
pub struct DeletionService {
    store: FlowStore,
    repo: Arc<dyn UserRepository>,
}

impl DeletionService {
    /// Assemble the service.
    #[must_use]
    pub fn new(store: FlowStore, repo: Arc<dyn UserRepository>) -> Self {
        Self { store, repo }
    }

    /// Issue a deletion challenge for a user account.
    ///
    /// # Errors
    ///
    /// Fails when the coordination store is unavailable.
    pub async fn challenge_user(&self, email: &str) -> Result<DeletionChallenge> {
        let token = generate_challenge_token();
        self.store
            .put_deletion_challenge(USER_CHALLENGE_KIND, email, &token)
            .await
            .map_err(Error::from)?;
        Ok(DeletionChallenge {
            text: user_challenge_text(email, &token),
            expires_at: Utc::now() + ChronoDuration::minutes(3),
        })
    }

    /// Verify the echoed sentence and erase the user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] on a malformed or mismatched
    /// sentence, and propagates durable-store failures.
    pub async fn delete_user(&self, email: &str, text: &str) -> Result<DeletionOutcome> {
        let presented = parse_challenge_token(&user_challenge_prefix(email), text)?;
        self.verify_and_burn(USER_CHALLENGE_KIND, email, &presented)
            .await?;

        let outcome = self.repo.delete_by_email(email).await?;
        info!(
            email = %email,
            transferred = outcome.threat_models_transferred,
            deleted = outcome.threat_models_deleted,
            "User erased"
        );
        Ok(outcome)
    }

    /// Issue a deletion challenge for a group.
    ///
    /// # Errors
    ///
    /// Fails when the coordination store is unavailable.
    pub async fn challenge_group(&self, name: &str) -> Result<DeletionChallenge> {
        let token = generate_challenge_token();
        self.store
            .put_deletion_challenge(GROUP_CHALLENGE_KIND, name, &token)
            .await
            .map_err(Error::from)?;
        Ok(DeletionChallenge {
            text: group_challenge_text(name, &token),
            expires_at: Utc::now() + ChronoDuration::minutes(3),
        })
    }

    /// Verify the echoed sentence and erase the group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] on a malformed or mismatched
    /// sentence, and propagates durable-store failures.
    pub async fn delete_group(&self, name: &str, text: &str) -> Result<DeletionOutcome> {
        let presented = parse_challenge_token(&group_challenge_prefix(name), text)?;
        self.verify_and_burn(GROUP_CHALLENGE_KIND, name, &presented)
            .await?;

        let outcome = self.repo.delete_group(name).await?;
        info!(
            group = %name,
            transferred = outcome.threat_models_transferred,
            deleted = outcome.threat_models_deleted,
            "Group erased"
        );
        Ok(outcome)
    }

    /// Constant-time comparison against the stored token; a match burns the
    /// challenge, a mismatch leaves it for the caller to retry within TTL.
    async fn verify_and_burn(&self, kind: &str, subject: &str, presented: &str) -> Result<()> {
        let stored = match self
            .store
            .backend()
            .get(&format!("{kind}_deletion_challenge:{subject}"))
            .await
        {
            Ok(token) => token,
            Err(StoreError::NotFound) => {
                return Err(Error::InvalidRequest(
                    "deletion challenge expired or never issued".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        if stored.as_bytes().ct_eq(presented.as_bytes()).into() {
            self.store
                .take_deletion_challenge(kind, subject)
                .await
                .map_err(Error::from)?;
            Ok(())
        } else {
            Err(Error::InvalidRequest(
                "deletion challenge does not match".to_string(),
            ))
        }
    }
}

fn user_challenge_prefix(email: &str) -> String {
    format!(
        "I, {email}, request permanent deletion of my TMI account and all associated data. Confirmation token: "
    )
}

fn user_challenge_text(email: &str, token: &str) -> String {
    format!("{}{token}", user_challenge_prefix(email))
}

fn group_challenge_prefix(name: &str) -> String {
    format!(
        "I request permanent deletion of the group {name} and all associated data. Confirmation token: "
    )
}

fn group_challenge_text(name: &str, token: &str) -> String {
    format!("{}{token}", group_challenge_prefix(name))
}

/// Extract the trailing token; the prefix must match byte-for-byte.
fn parse_challenge_token(prefix: &str, text: &str) -> Result<String> {
    text.strip_prefix(prefix)
        .filter(|token| !token.is_empty() && !token.contains(char::is_whitespace))
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidRequest("malformed deletion challenge text".to_string()))
}

/// 256-bit URL-safe random challenge token.
fn generate_challenge_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
