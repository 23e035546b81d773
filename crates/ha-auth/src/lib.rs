//! Trusted networks authentication for Home Assistant
//!
//! Clients inside configured networks log in by picking one of the users
//! they are allowed to assume:
//!
//! 1. [`network`] decides whether the client address is trusted
//! 2. [`restriction`] narrows the users by `trusted_users`
//! 3. [`login_flow`] prompts for a user, or bypasses the prompt
//! 4. [`credential`] binds the chosen user to a provider credential
//!
//! # Example
//!
//! ```ignore
//! use ha_auth::{AuthConfig, AuthStore, LoginFlowManager, TrustedNetworksAuthProvider};
//!
//! let config = AuthConfig::load("/config")?;
//! let store = Arc::new(AuthStore::with_storage("/config"));
//! store.load().await?;
//!
//! let provider = TrustedNetworksAuthProvider::new(
//!     config.providers[0].clone(),
//!     config.trusted_proxies,
//!     store,
//! );
//! let flows = LoginFlowManager::new(Arc::new(provider));
//! let step = flows.start(client_ip).await?;
//! ```

pub mod config;
pub mod credential;
mod error;
pub mod flow_manager;
pub mod login_flow;
pub mod models;
pub mod network;
pub mod provider;
pub mod restriction;
pub mod storage;
pub mod store;

pub use config::{AuthConfig, TrustedNetworksConfig, TrustedUserEntry, UserRestriction};
pub use credential::CredentialBinder;
pub use error::{AuthError, AuthResult, ConfigError, ConfigResult, InvalidAuth};
pub use flow_manager::{FlowStep, LoginFlowManager, FLOW_EXPIRATION};
pub use login_flow::{AbortReason, FlowResult, FlowState, LoginFlow, LoginFlowProvider};
pub use models::{CandidateUser, Credential, Group, User};
pub use network::is_member;
pub use provider::{TrustedNetworksAuthProvider, UserMeta};
pub use restriction::filter_candidates;
pub use storage::{Storage, StorageError, StorageResult};
pub use store::{AuthStore, AuthStoreBackend, CredentialStore, UserStore};
