use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::db::Database;
use crate::db::models::{User, normalize_email};
use crate::error::Result;

/// User identities plus the configured set of trusted emails.
///
/// The trust flag is owned by configuration: it is written on creation and
/// re-synced on every login, never by the user.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<dyn Database>,
    trusted: Arc<HashSet<String>>,
}

impl CredentialStore {
    pub fn new(db: Arc<dyn Database>, trusted_emails: &[String]) -> Self {
        let trusted = trusted_emails
            .iter()
            .map(|email| email.trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self {
            db,
            trusted: Arc::new(trusted),
        }
    }

    pub fn is_trusted(&self, email: &str) -> bool {
        self.trusted.contains(&email.trim().to_ascii_lowercase())
    }

    /// Creates an untrusted user if the email is new. Existing users are
    /// returned unchanged.
    pub async fn register_guest(&self, email: &str) -> Result<User> {
        let email = normalize_email(email)?;
        if let Some(user) = self.db.get_user_by_email(&email).await? {
            return Ok(user);
        }

        let user = self.db.insert_user_if_absent(&email, false).await?;
        info!("Registered guest user {}", user.id);
        Ok(user)
    }

    /// Returns the user for `email`, creating it on first sight, with the
    /// trust flag matching the configured list.
    pub async fn get_or_create_user(&self, email: &str) -> Result<User> {
        let email = normalize_email(email)?;
        let trusted = self.is_trusted(&email);

        match self.db.get_user_by_email(&email).await? {
            Some(user) if user.is_trusted == trusted => Ok(user),
            Some(user) => {
                let user = self.db.set_user_trust(user.id, trusted).await?;
                info!("Synced trust for user {} to {}", user.id, trusted);
                Ok(user)
            }
            None => {
                let user = self.db.insert_user_if_absent(&email, trusted).await?;
                if user.is_trusted != trusted {
                    // Created concurrently by a guest registration
                    return self.db.set_user_trust(user.id, trusted).await;
                }
                info!("Created user {} (trusted: {})", user.id, trusted);
                Ok(user)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::error::StatsError;

    fn store(trusted: &[&str]) -> CredentialStore {
        let trusted: Vec<String> = trusted.iter().map(|e| e.to_string()).collect();
        CredentialStore::new(Arc::new(MemoryDatabase::new()), &trusted)
    }

    #[test]
    fn test_trust_is_case_insensitive() {
        let store = store(&["Admin@Example.com"]);
        assert!(store.is_trusted(" admin@example.COM "));
        assert!(!store.is_trusted("guest@example.com"));
    }

    #[tokio::test]
    async fn test_guest_registration_is_idempotent() {
        let store = store(&[]);
        let first = store.register_guest("guest@example.com").await.unwrap();
        let second = store.register_guest("GUEST@example.com").await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_trusted);
    }

    #[tokio::test]
    async fn test_login_syncs_trust_with_config() {
        let before = store(&["boss@example.com"]);
        let user = before.get_or_create_user("boss@example.com").await.unwrap();
        assert!(user.is_trusted);

        // Same storage, email removed from the trusted list
        let after = CredentialStore::new(before.db.clone(), &[]);
        let demoted = after.get_or_create_user("boss@example.com").await.unwrap();
        assert_eq!(demoted.id, user.id);
        assert!(!demoted.is_trusted);
    }

    #[tokio::test]
    async fn test_guest_promoted_on_login_when_listed() {
        let store = store(&["friend@example.com"]);
        let guest = store.register_guest("friend@example.com").await.unwrap();
        assert!(!guest.is_trusted);

        let user = store.get_or_create_user("friend@example.com").await.unwrap();
        assert_eq!(user.id, guest.id);
        assert!(user.is_trusted);
    }

    #[tokio::test]
    async fn test_malformed_email_rejected() {
        let store = store(&[]);
        let err = store.get_or_create_user("not-an-email").await.unwrap_err();
        assert!(matches!(err, StatsError::Validation(_)));
        let err = store.register_guest("").await.unwrap_err();
        assert!(matches!(err, StatsError::Validation(_)));
    }
}
