//! Trusted networks provider configuration
//!
//! Parses the `trusted_networks` entry of `homeassistant: auth_providers:`
//! and the `http: trusted_proxies:` list from `configuration.yaml`:
//!
//! ```yaml
//! homeassistant:
//!   auth_providers:
//!     - type: trusted_networks
//!       trusted_networks:
//!         - 192.168.1.0/24
//!         - fd00::/8
//!       trusted_users:
//!         192.168.1.0/24:
//!           - 0b3f4c5d6e7f40818293a4b5c6d7e8f9
//!           - group: system-users
//!       allow_bypass_login: true
//! http:
//!   trusted_proxies: 172.30.33.0/24
//! ```
//!
//! Everything is validated once here; the provider only ever sees the typed
//! [`TrustedNetworksConfig`].

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;
use serde_yaml::{Mapping, Value};
use tracing::debug;
use uuid::{Uuid, Variant};

use crate::error::{ConfigError, ConfigResult};

/// Provider type string in `auth_providers`
pub const PROVIDER_TYPE: &str = "trusted_networks";

pub const CONF_TYPE: &str = "type";
pub const CONF_ID: &str = "id";
pub const CONF_NAME: &str = "name";
pub const CONF_TRUSTED_NETWORKS: &str = "trusted_networks";
pub const CONF_TRUSTED_USERS: &str = "trusted_users";
pub const CONF_GROUP: &str = "group";
pub const CONF_ALLOW_BYPASS_LOGIN: &str = "allow_bypass_login";
pub const CONF_TRUSTED_PROXIES: &str = "trusted_proxies";

const ALLOWED_KEYS: &[&str] = &[
    CONF_TYPE,
    CONF_ID,
    CONF_NAME,
    CONF_TRUSTED_NETWORKS,
    CONF_TRUSTED_USERS,
    CONF_ALLOW_BYPASS_LOGIN,
];

/// One allowed identity in a `trusted_users` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedUserEntry {
    /// A user id
    UserId(String),
    /// Every member of a group (`{group: group_id}`)
    Group(String),
}

/// Allowed identities for clients inside one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRestriction {
    pub network: IpNet,
    pub allowed: Vec<TrustedUserEntry>,
}

/// Typed configuration of a trusted networks provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrustedNetworksConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Trusted networks, in configuration order
    pub trusted_networks: Vec<IpNet>,
    /// Per network restrictions, in configuration order (first match wins)
    pub trusted_users: Vec<UserRestriction>,
    pub allow_bypass_login: bool,
}

impl TrustedNetworksConfig {
    /// Parse one `auth_providers` entry
    pub fn from_yaml(value: &Value) -> ConfigResult<Self> {
        let mapping = value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            key: "auth_providers".to_string(),
            reason: "provider config must be a mapping".to_string(),
        })?;

        for key in mapping.keys() {
            let key = key.as_str().unwrap_or_default();
            if !ALLOWED_KEYS.contains(&key) {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                });
            }
        }

        match get(mapping, CONF_TYPE).and_then(Value::as_str) {
            Some(PROVIDER_TYPE) => {}
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: CONF_TYPE.to_string(),
                    reason: format!("expected '{}', got '{}'", PROVIDER_TYPE, other),
                })
            }
            None => {
                return Err(ConfigError::MissingKey {
                    key: CONF_TYPE.to_string(),
                })
            }
        }

        let trusted_networks = match get(mapping, CONF_TRUSTED_NETWORKS) {
            Some(value) => parse_network_list(CONF_TRUSTED_NETWORKS, value)?,
            None => {
                return Err(ConfigError::MissingKey {
                    key: CONF_TRUSTED_NETWORKS.to_string(),
                })
            }
        };

        let trusted_users = match get(mapping, CONF_TRUSTED_USERS) {
            Some(Value::Null) | None => Vec::new(),
            Some(value) => parse_trusted_users(value)?,
        };

        let allow_bypass_login = match get(mapping, CONF_ALLOW_BYPASS_LOGIN) {
            Some(value) => parse_boolean(CONF_ALLOW_BYPASS_LOGIN, value)?,
            None => false,
        };

        let config = Self {
            id: optional_string(mapping, CONF_ID)?,
            name: optional_string(mapping, CONF_NAME)?,
            trusted_networks,
            trusted_users,
            allow_bypass_login,
        };
        debug!(
            "Parsed trusted_networks provider: {} networks, {} restrictions, bypass={}",
            config.trusted_networks.len(),
            config.trusted_users.len(),
            config.allow_bypass_login
        );
        Ok(config)
    }
}

/// Auth related settings from a whole `configuration.yaml`
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Every trusted_networks provider under `homeassistant: auth_providers:`
    pub providers: Vec<TrustedNetworksConfig>,
    /// `http: trusted_proxies:`
    pub trusted_proxies: Vec<IpNet>,
}

impl AuthConfig {
    /// Read `configuration.yaml` from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = config_dir.as_ref().join("configuration.yaml");
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        let yaml: Value = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseYaml { path, source: e })?;
        Self::from_yaml(&yaml)
    }

    /// Extract auth settings from a parsed configuration document
    pub fn from_yaml(root: &Value) -> ConfigResult<Self> {
        let providers = match root.get("homeassistant").and_then(|h| h.get("auth_providers")) {
            Some(Value::Sequence(entries)) => entries
                .iter()
                .filter(|entry| entry.get(CONF_TYPE).and_then(Value::as_str) == Some(PROVIDER_TYPE))
                .map(TrustedNetworksConfig::from_yaml)
                .collect::<ConfigResult<Vec<_>>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(ConfigError::InvalidValue {
                    key: "auth_providers".to_string(),
                    reason: "expected a list".to_string(),
                })
            }
        };

        let trusted_proxies = match root.get("http").and_then(|h| h.get(CONF_TRUSTED_PROXIES)) {
            Some(value) => parse_network_list(CONF_TRUSTED_PROXIES, value)?,
            None => Vec::new(),
        };

        Ok(Self {
            providers,
            trusted_proxies,
        })
    }
}

fn get<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping.get(key)
}

fn optional_string(mapping: &Mapping, key: &str) -> ConfigResult<Option<String>> {
    match get(mapping, key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

/// Parse a network in CIDR notation; a bare address is a single host network.
///
/// Networks with host bits set (`192.168.1.1/24`) are rejected.
pub fn parse_network(key: &str, raw: &str) -> ConfigResult<IpNet> {
    let raw = raw.trim();
    let invalid = |reason: String| ConfigError::InvalidNetwork {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    };

    let net = if raw.contains('/') {
        raw.parse::<IpNet>().map_err(|e| invalid(e.to_string()))?
    } else {
        let addr = raw.parse::<IpAddr>().map_err(|e| invalid(e.to_string()))?;
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        IpNet::new(addr, prefix).map_err(|e| invalid(e.to_string()))?
    };

    if net.trunc() != net {
        return Err(invalid("has host bits set".to_string()));
    }
    Ok(net)
}

/// Parse a single network or a list of networks
pub fn parse_network_list(key: &str, value: &Value) -> ConfigResult<Vec<IpNet>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(vec![parse_network(key, s)?]),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => parse_network(key, s),
                other => Err(ConfigError::InvalidNetwork {
                    key: key.to_string(),
                    value: format!("{:?}", other),
                    reason: "expected a string".to_string(),
                }),
            })
            .collect(),
        other => Err(ConfigError::InvalidNetwork {
            key: key.to_string(),
            value: format!("{:?}", other),
            reason: "expected a string or a list".to_string(),
        }),
    }
}

fn parse_trusted_users(value: &Value) -> ConfigResult<Vec<UserRestriction>> {
    let mapping = value.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
        key: CONF_TRUSTED_USERS.to_string(),
        reason: "expected a mapping of network to users".to_string(),
    })?;

    // Mapping keeps document order, which decides which restriction wins
    mapping
        .iter()
        .map(|(network, entries)| {
            let network = network.as_str().ok_or_else(|| ConfigError::InvalidNetwork {
                key: CONF_TRUSTED_USERS.to_string(),
                value: format!("{:?}", network),
                reason: "expected a string".to_string(),
            })?;
            let network = parse_network(CONF_TRUSTED_USERS, network)?;

            let allowed = match entries {
                // A bare network key admits nobody
                Value::Null => Vec::new(),
                Value::Sequence(items) => items
                    .iter()
                    .map(parse_trusted_user_entry)
                    .collect::<ConfigResult<Vec<_>>>()?,
                single => vec![parse_trusted_user_entry(single)?],
            };

            Ok(UserRestriction { network, allowed })
        })
        .collect()
}

fn parse_trusted_user_entry(value: &Value) -> ConfigResult<TrustedUserEntry> {
    match value {
        Value::String(user_id) => {
            validate_user_id(user_id)?;
            Ok(TrustedUserEntry::UserId(user_id.clone()))
        }
        Value::Mapping(mapping) => {
            if let Some(key) = mapping
                .keys()
                .find(|k| k.as_str() != Some(CONF_GROUP))
            {
                return Err(ConfigError::UnknownKey {
                    key: key.as_str().unwrap_or_default().to_string(),
                });
            }
            match get(mapping, CONF_GROUP) {
                Some(Value::String(group_id)) => Ok(TrustedUserEntry::Group(group_id.clone())),
                Some(_) => Err(ConfigError::InvalidValue {
                    key: CONF_GROUP.to_string(),
                    reason: "expected a string".to_string(),
                }),
                None => Err(ConfigError::MissingKey {
                    key: CONF_GROUP.to_string(),
                }),
            }
        }
        other => Err(ConfigError::InvalidValue {
            key: CONF_TRUSTED_USERS.to_string(),
            reason: format!("expected a user id or {{group: id}}, got {:?}", other),
        }),
    }
}

/// User ids are RFC 4122 uuid4 values in 32 character lowercase hex form
fn validate_user_id(user_id: &str) -> ConfigResult<()> {
    let is_hex = user_id.len() == 32
        && user_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    let is_v4 = Uuid::try_parse(user_id)
        .map(|u| u.get_version_num() == 4 && u.get_variant() == Variant::RFC4122)
        .unwrap_or(false);

    if is_hex && is_v4 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: CONF_TRUSTED_USERS.to_string(),
            reason: format!("'{}' is not a valid user id", user_id),
        })
    }
}

fn parse_boolean(key: &str, value: &Value) -> ConfigResult<bool> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().and_then(|n| match n {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }),
        Value::String(s) => match s.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" | "enable" => Some(true),
            "0" | "false" | "no" | "off" | "disable" => Some(false),
            _ => None,
        },
        _ => None,
    };

    parsed.ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("invalid boolean value {:?}", value),
    })
}
