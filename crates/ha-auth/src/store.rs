//! User and credential stores
//!
//! The login gate reads users and credentials through the [`UserStore`] and
//! [`CredentialStore`] traits. [`AuthStore`] is the in-memory implementation,
//! optionally persisted to `.storage/auth`.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::models::{Credential, Group, User, GROUP_ID_ADMIN, GROUP_ID_READ_ONLY, GROUP_ID_USER};
use crate::storage::{Storable, Storage};

/// Source of user accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users, including inactive and system generated ones
    async fn list_users(&self) -> AuthResult<Vec<User>>;
}

/// Source and sink of provider credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials created by one provider instance
    async fn credentials_for_provider(
        &self,
        provider_type: &str,
        provider_id: Option<&str>,
    ) -> AuthResult<Vec<Credential>>;

    /// Attach a new credential to a user and persist both in one step.
    ///
    /// Either the credential is linked and stored, or the store is left
    /// unchanged and an error is returned.
    async fn link_user_credential(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> AuthResult<Credential>;
}

/// Everything the trusted networks provider needs from the auth store
pub trait AuthStoreBackend: UserStore + CredentialStore {}

impl<T: UserStore + CredentialStore> AuthStoreBackend for T {}

/// Persisted contents of the auth store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthData {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
}

impl Storable for AuthData {
    const KEY: &'static str = "auth";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

impl AuthData {
    fn with_system_groups() -> Self {
        let groups = [
            (GROUP_ID_ADMIN, "Administrators"),
            (GROUP_ID_USER, "Users"),
            (GROUP_ID_READ_ONLY, "Read Only"),
        ]
        .into_iter()
        .map(|(id, name)| Group {
            system_generated: true,
            ..Group::new(id, name)
        })
        .collect();

        Self {
            users: Vec::new(),
            groups,
        }
    }
}

/// In-memory auth store with optional `.storage/auth` persistence
pub struct AuthStore {
    data: RwLock<AuthData>,
    storage: Option<Storage>,
}

impl AuthStore {
    /// Create a store that lives only in memory
    pub fn new() -> Self {
        Self {
            data: RwLock::new(AuthData::with_system_groups()),
            storage: None,
        }
    }

    /// Create a store backed by `<config_dir>/.storage/auth`
    pub fn with_storage(config_dir: impl AsRef<Path>) -> Self {
        Self {
            data: RwLock::new(AuthData::with_system_groups()),
            storage: Some(Storage::new(config_dir)),
        }
    }

    /// Load persisted users and groups, keeping the defaults if nothing is stored
    pub async fn load(&self) -> AuthResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        if let Some(data) = storage.load::<AuthData>().await? {
            info!(
                "Loading {} users and {} groups from storage",
                data.users.len(),
                data.groups.len()
            );
            *self.data.write().await = data;
        }
        Ok(())
    }

    /// Persist the current contents
    pub async fn save(&self) -> AuthResult<()> {
        let data = self.data.read().await;
        self.persist(&data).await
    }

    async fn persist(&self, data: &AuthData) -> AuthResult<()> {
        if let Some(storage) = &self.storage {
            storage.save(data).await?;
        }
        Ok(())
    }

    /// Add a group
    pub async fn create_group(&self, group: Group) -> AuthResult<Group> {
        let mut data = self.data.write().await;
        let previous = data.groups.clone();
        data.groups.retain(|g| g.id != group.id);
        data.groups.push(group.clone());
        if let Err(e) = self.persist(&data).await {
            data.groups = previous;
            return Err(e);
        }
        debug!("Created group {} ({})", group.name, group.id);
        Ok(group)
    }

    /// Add a user; every referenced group must exist
    pub async fn create_user(&self, user: User) -> AuthResult<User> {
        let mut data = self.data.write().await;
        if let Some(missing) = user
            .group_ids
            .iter()
            .find(|id| !data.groups.iter().any(|g| &g.id == *id))
        {
            return Err(AuthError::UnknownGroup {
                group_id: missing.clone(),
            });
        }

        data.users.push(user.clone());
        if let Err(e) = self.persist(&data).await {
            data.users.pop();
            return Err(e);
        }
        info!("Created user {} ({})", user.name, user.id);
        Ok(user)
    }

    /// Activate or deactivate a user
    pub async fn set_user_active(&self, user_id: &str, is_active: bool) -> AuthResult<()> {
        let mut data = self.data.write().await;
        let user = data
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| AuthError::InvalidUser {
                user_id: user_id.to_string(),
            })?;
        let was_active = std::mem::replace(&mut user.is_active, is_active);
        if let Err(e) = self.persist(&data).await {
            if let Some(user) = data.users.iter_mut().find(|u| u.id == user_id) {
                user.is_active = was_active;
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.data
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
    }

    pub async fn groups(&self) -> Vec<Group> {
        self.data.read().await.groups.clone()
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for AuthStore {
    async fn list_users(&self) -> AuthResult<Vec<User>> {
        Ok(self.data.read().await.users.clone())
    }
}

#[async_trait]
impl CredentialStore for AuthStore {
    async fn credentials_for_provider(
        &self,
        provider_type: &str,
        provider_id: Option<&str>,
    ) -> AuthResult<Vec<Credential>> {
        let data = self.data.read().await;
        Ok(data
            .users
            .iter()
            .flat_map(|u| u.credentials.iter())
            .filter(|c| c.belongs_to(provider_type, provider_id))
            .cloned()
            .collect())
    }

    async fn link_user_credential(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> AuthResult<Credential> {
        let mut data = self.data.write().await;
        let index = data
            .users
            .iter()
            .position(|u| u.id == user_id)
            .ok_or_else(|| AuthError::InvalidUser {
                user_id: user_id.to_string(),
            })?;

        data.users[index].credentials.push(Credential {
            is_new: false,
            ..credential.clone()
        });
        if let Err(e) = self.persist(&data).await {
            data.users[index].credentials.pop();
            return Err(e);
        }

        info!(
            "Linked {} credential {} to user {}",
            credential.auth_provider_type, credential.id, user_id
        );
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_groups() {
        let store = AuthStore::new();
        let ids: Vec<String> = store.groups().await.into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![GROUP_ID_ADMIN, GROUP_ID_USER, GROUP_ID_READ_ONLY]);
    }

    #[tokio::test]
    async fn test_create_user_unknown_group() {
        let store = AuthStore::new();
        let result = store
            .create_user(User::new("Alice").with_groups(["nope"]))
            .await;
        assert!(matches!(result, Err(AuthError::UnknownGroup { .. })));
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_credential_unknown_user() {
        let store = AuthStore::new();
        let cred = Credential::for_user("trusted_networks", None, "ghost");
        let result = store.link_user_credential("ghost", cred).await;
        assert!(matches!(result, Err(AuthError::InvalidUser { .. })));
    }

    #[tokio::test]
    async fn test_credentials_filtered_by_provider() {
        let store = AuthStore::new();
        let user = store.create_user(User::new("Alice")).await.unwrap();

        store
            .link_user_credential(
                &user.id,
                Credential::for_user("trusted_networks", None, &user.id),
            )
            .await
            .unwrap();
        store
            .link_user_credential(
                &user.id,
                Credential::create("homeassistant", None, serde_json::json!({"username": "alice"})),
            )
            .await
            .unwrap();

        let creds = store
            .credentials_for_provider("trusted_networks", None)
            .await
            .unwrap();
        assert_eq!(creds.len(), 1);
        assert!(!creds[0].is_new);
        assert_eq!(creds[0].bound_user_id(), Some(user.id.as_str()));
    }

    #[tokio::test]
    async fn test_linked_credential_returned_as_new() {
        let store = AuthStore::new();
        let user = store.create_user(User::new("Alice")).await.unwrap();

        let linked = store
            .link_user_credential(
                &user.id,
                Credential::for_user("trusted_networks", None, &user.id),
            )
            .await
            .unwrap();
        assert!(linked.is_new);

        let stored = store.get_user(&user.id).await.unwrap();
        assert!(!stored.credentials[0].is_new);
    }

    /// Replace `.storage` with a plain file so every save fails
    fn break_storage(config_dir: &Path) {
        std::fs::remove_dir_all(config_dir.join(".storage")).ok();
        std::fs::write(config_dir.join(".storage"), "").unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let store = AuthStore::with_storage(temp_dir.path());
        let user = store.create_user(User::new("Alice")).await.unwrap();
        break_storage(temp_dir.path());

        let result = store.set_user_active(&user.id, false).await;
        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert!(store.get_user(&user.id).await.unwrap().is_active);

        let result = store.create_group(Group::new("guests", "Guests")).await;
        assert!(matches!(result, Err(AuthError::Storage(_))));
        assert_eq!(store.groups().await.len(), 3);

        let result = store
            .link_user_credential(
                &user.id,
                Credential::for_user("trusted_networks", None, &user.id),
            )
            .await;
        assert!(result.is_err());
        assert!(store.get_user(&user.id).await.unwrap().credentials.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();

        let store = AuthStore::with_storage(temp_dir.path());
        let user = store
            .create_user(User::new("Alice").with_groups([GROUP_ID_USER]))
            .await
            .unwrap();
        let cred = store
            .link_user_credential(
                &user.id,
                Credential::for_user("trusted_networks", None, &user.id),
            )
            .await
            .unwrap();

        let reopened = AuthStore::with_storage(temp_dir.path());
        reopened.load().await.unwrap();

        let loaded = reopened.get_user(&user.id).await.unwrap();
        assert_eq!(loaded.group_ids, vec![GROUP_ID_USER]);
        assert_eq!(loaded.credentials.len(), 1);
        assert_eq!(loaded.credentials[0].id, cred.id);
    }
}
