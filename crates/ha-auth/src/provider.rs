//! Trusted networks auth provider
//!
//! Lets clients inside configured networks log in by picking a user, without
//! a password. Based on Home Assistant's `trusted_networks` auth provider.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use tracing::{debug, info};

use crate::config::{TrustedNetworksConfig, PROVIDER_TYPE};
use crate::credential::CredentialBinder;
use crate::error::{AuthError, AuthResult, InvalidAuth};
use crate::login_flow::{FlowResult, LoginFlow, LoginFlowProvider};
use crate::models::{CandidateUser, Credential};
use crate::network;
use crate::restriction::filter_candidates;
use crate::store::AuthStoreBackend;

/// Title shown when the config does not name the provider
pub const DEFAULT_TITLE: &str = "Trusted Networks";

/// Metadata used when a provider creates a user for new credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMeta {
    pub name: Option<String>,
    pub is_active: bool,
}

pub struct TrustedNetworksAuthProvider {
    config: TrustedNetworksConfig,
    trusted_proxies: Vec<IpNet>,
    store: Arc<dyn AuthStoreBackend>,
    binder: CredentialBinder,
}

impl TrustedNetworksAuthProvider {
    pub fn new(
        config: TrustedNetworksConfig,
        trusted_proxies: Vec<IpNet>,
        store: Arc<dyn AuthStoreBackend>,
    ) -> Self {
        let binder = CredentialBinder::new(PROVIDER_TYPE, config.id.clone(), store.clone());
        Self {
            config,
            trusted_proxies,
            store,
            binder,
        }
    }

    pub fn provider_type(&self) -> &'static str {
        PROVIDER_TYPE
    }

    pub fn id(&self) -> Option<&str> {
        self.config.id.as_deref()
    }

    pub fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    pub fn support_mfa(&self) -> bool {
        false
    }

    pub fn config(&self) -> &TrustedNetworksConfig {
        &self.config
    }

    /// Check that `ip` is trusted and does not belong to a proxy
    pub fn validate_access(&self, ip: IpAddr) -> Result<(), InvalidAuth> {
        network::validate_access(ip, &self.config.trusted_networks, &self.trusted_proxies)
    }

    /// Refresh tokens from this provider are only usable from trusted addresses
    pub fn validate_refresh_token(&self, remote_ip: Option<IpAddr>) -> Result<(), InvalidAuth> {
        let ip = remote_ip.ok_or(InvalidAuth::UnknownRemoteIp)?;
        self.validate_access(ip)
    }

    /// Users a client at `ip` may pick, read fresh from the store
    pub async fn candidates(&self, ip: IpAddr) -> AuthResult<Vec<CandidateUser>> {
        let users = self.store.list_users().await?;
        Ok(filter_candidates(ip, &users, &self.config.trusted_users))
    }

    /// Create a login flow for `client_ip` and run its first step
    pub async fn start_login(&self, client_ip: IpAddr) -> AuthResult<(LoginFlow, FlowResult)> {
        let candidates = self.candidates(client_ip).await?;
        let mut flow = LoginFlow::new(client_ip, candidates, self.config.allow_bypass_login);
        debug!(
            "Starting login flow {} for {} with {} candidates",
            flow.flow_id(),
            client_ip,
            flow.available_users().len()
        );

        let result = flow.step_init(self, None).await?;
        Ok((flow, result))
    }

    /// Continue a flow with the client's chosen user
    pub async fn submit_selection(
        &self,
        flow: &mut LoginFlow,
        user_id: &str,
    ) -> AuthResult<FlowResult> {
        flow.submit_selection(self, user_id).await
    }

    /// Trusted networks never create users, so there is no metadata to offer
    pub async fn user_meta_for_credentials(&self, _credential: &Credential) -> AuthResult<UserMeta> {
        Err(AuthError::UserCreationUnsupported)
    }
}

#[async_trait]
impl LoginFlowProvider for TrustedNetworksAuthProvider {
    fn validate_access(&self, ip: IpAddr) -> Result<(), InvalidAuth> {
        TrustedNetworksAuthProvider::validate_access(self, ip)
    }

    async fn get_or_create_credentials(&self, user_id: &str) -> AuthResult<Credential> {
        let credential = self.binder.get_or_create(user_id).await?;
        info!("Trusted networks login for user {}", user_id);
        Ok(credential)
    }
}
