//! Binding an approved user to this provider's credential

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::models::Credential;
use crate::store::AuthStoreBackend;

/// Looks up or creates the single credential a user has with one provider
pub struct CredentialBinder {
    provider_type: String,
    provider_id: Option<String>,
    store: Arc<dyn AuthStoreBackend>,
    /// Serialises get-or-create per user id
    user_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CredentialBinder {
    pub fn new(
        provider_type: impl Into<String>,
        provider_id: Option<String>,
        store: Arc<dyn AuthStoreBackend>,
    ) -> Self {
        Self {
            provider_type: provider_type.into(),
            provider_id,
            store,
            user_locks: DashMap::new(),
        }
    }

    /// Return the user's credential for this provider, creating and linking
    /// it on first use.
    ///
    /// Fails with [`AuthError::InvalidUser`] unless `user_id` names an
    /// existing, active, non system generated user.
    pub async fn get_or_create(&self, user_id: &str) -> AuthResult<Credential> {
        let lock = self.user_locks.entry(user_id.to_string()).or_default().clone();
        let _guard = lock.lock().await;

        let users = self.store.list_users().await?;
        let Some(user) = users.iter().find(|u| u.id == user_id && u.can_login()) else {
            warn!("Refusing to bind credential for invalid user {}", user_id);
            return Err(AuthError::InvalidUser {
                user_id: user_id.to_string(),
            });
        };

        let existing = self
            .store
            .credentials_for_provider(&self.provider_type, self.provider_id.as_deref())
            .await?
            .into_iter()
            .find(|c| c.bound_user_id() == Some(user_id));
        if let Some(credential) = existing {
            debug!("Reusing credential {} for user {}", credential.id, user_id);
            return Ok(credential);
        }

        let credential =
            Credential::for_user(&self.provider_type, self.provider_id.clone(), &user.id);
        self.store.link_user_credential(&user.id, credential).await
    }
}
