//! Error types for the auth provider

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Result type for configuration parsing
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reasons a client address is refused by the trusted networks provider
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidAuth {
    /// The provider was configured without any trusted network
    #[error("trusted_networks is not configured")]
    NoTrustedNetworks,

    /// The address is outside every configured trusted network
    #[error("{ip} is not in trusted_networks")]
    NotInTrustedNetworks { ip: std::net::IpAddr },

    /// The address belongs to a trusted proxy
    #[error("can't allow access from a proxy server ({ip})")]
    TrustedProxy { ip: std::net::IpAddr },

    /// No remote address was available to check
    #[error("unknown remote ip can't be used for trusted network provider")]
    UnknownRemoteIp,
}

/// Errors raised by the auth provider and login flows
#[derive(Debug, Error)]
pub enum AuthError {
    /// Access from the client address is not allowed
    #[error(transparent)]
    InvalidAuth(#[from] InvalidAuth),

    /// The selected user is not one of the flow's candidates
    #[error("user '{user_id}' is not a valid choice for this login flow")]
    InvalidSelection { user_id: String },

    /// The user does not exist, is system generated or is inactive
    #[error("invalid user '{user_id}'")]
    InvalidUser { user_id: String },

    /// The flow already reached a terminal state
    #[error("login flow {flow_id} is already finished")]
    FlowFinished { flow_id: String },

    /// No in-flight flow with this id
    #[error("unknown login flow {flow_id}")]
    UnknownFlow { flow_id: String },

    /// Trusted networks never create new users
    #[error("trusted_networks auth provider does not create users")]
    UserCreationUnsupported,

    /// Group referenced by a user does not exist
    #[error("unknown group '{group_id}'")]
    UnknownGroup { group_id: String },

    /// Persisting the auth store failed
    #[error("auth storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors that can occur while loading auth provider configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A network string could not be parsed
    #[error("invalid network '{value}' for '{key}': {reason}")]
    InvalidNetwork {
        key: String,
        value: String,
        reason: String,
    },

    /// A required key is missing
    #[error("required key '{key}' not provided")]
    MissingKey { key: String },

    /// A key the schema does not allow
    #[error("extra keys not allowed @ data['{key}']")]
    UnknownKey { key: String },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}
