//! Auth data model: users, groups and credentials

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Group id of the built-in administrators group
pub const GROUP_ID_ADMIN: &str = "system-admin";
/// Group id of the built-in users group
pub const GROUP_ID_USER: &str = "system-users";
/// Group id of the built-in read-only group
pub const GROUP_ID_READ_ONLY: &str = "system-read-only";

/// Key under which credential data stores the bound user id
const CREDENTIAL_USER_ID: &str = "user_id";

/// Generate a new hex identifier (uuid4 without dashes)
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A permission group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_generated: bool,
}

impl Group {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_generated: false,
        }
    }
}

/// A credential linking a user to an auth provider instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub auth_provider_type: String,
    pub auth_provider_id: Option<String>,
    /// Provider specific data, opaque to everything but the provider
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Set until the credential has been linked to a user
    #[serde(skip)]
    pub is_new: bool,
}

impl Credential {
    /// Construct an unlinked credential for a provider
    pub fn create(
        auth_provider_type: impl Into<String>,
        auth_provider_id: Option<String>,
        data: Value,
    ) -> Self {
        Self {
            id: new_id(),
            auth_provider_type: auth_provider_type.into(),
            auth_provider_id,
            data,
            created_at: Utc::now(),
            is_new: true,
        }
    }

    /// Construct a credential whose data binds it to `user_id`
    pub fn for_user(
        auth_provider_type: impl Into<String>,
        auth_provider_id: Option<String>,
        user_id: &str,
    ) -> Self {
        Self::create(
            auth_provider_type,
            auth_provider_id,
            json!({ CREDENTIAL_USER_ID: user_id }),
        )
    }

    /// User id stored in the credential data, if any
    pub fn bound_user_id(&self) -> Option<&str> {
        self.data.get(CREDENTIAL_USER_ID).and_then(Value::as_str)
    }

    /// Whether this credential belongs to the given provider instance
    pub fn belongs_to(&self, provider_type: &str, provider_id: Option<&str>) -> bool {
        self.auth_provider_type == provider_type && self.auth_provider_id.as_deref() == provider_id
    }
}

/// A user account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_owner: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub system_generated: bool,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

fn default_true() -> bool {
    true
}

impl User {
    /// Create an active, non system user
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            is_owner: false,
            is_active: true,
            system_generated: false,
            group_ids: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_groups<I, S>(mut self, group_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = group_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn owner(mut self) -> Self {
        self.is_owner = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system_generated = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether the user may log in through a provider
    pub fn can_login(&self) -> bool {
        self.is_active && !self.system_generated
    }
}

/// A user that may be picked in a login flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateUser {
    pub id: String,
    pub name: String,
}

impl From<&User> for CandidateUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
        }
    }
}
