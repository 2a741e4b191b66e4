use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{errors::Error, xapi::OpaqueRef};

/// `other_config` key holding the username of subjects managed by this gateway.
pub const SUBJECT_NAME_KEY: &str = "subject-name";
/// `other_config` key holding the argon2 PHC string of the user's password.
pub const SUBJECT_PASSWORD_HASH_KEY: &str = "subject-password-hash";

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SubjectRecord {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub subject_identifier: String,
    #[serde(default)]
    pub other_config: HashMap<String, String>,
    #[serde(default)]
    pub roles: Vec<OpaqueRef>,
}

impl SubjectRecord {
    /// Falls back to the subject identifier for subjects created elsewhere.
    pub fn username(&self) -> &str {
        self.other_config
            .get(SUBJECT_NAME_KEY)
            .map(String::as_str)
            .unwrap_or(&self.subject_identifier)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct RoleRecord {
    pub name_label: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct User {
    pub uuid: String,
    pub username: String,
    pub roles: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct CreateUserRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name label of an existing XAPI role, e.g. `vm-operator`
    pub role: Option<String>,
}

#[derive(Clone, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: String,
}

// Keeps the password out of logs and `#[instrument]` spans.
impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("role", &self.role)
            .finish()
    }
}

impl TryFrom<CreateUserRequest> for NewUser {
    type Error = Error;

    fn try_from(request: CreateUserRequest) -> Result<Self, Self::Error> {
        let present = |value: Option<String>| value.filter(|v| !v.is_empty());
        match (
            present(request.username),
            present(request.password),
            present(request.role),
        ) {
            (Some(username), Some(password), Some(role)) => {
                let user = NewUser {
                    username,
                    password,
                    role,
                };
                user.validate()?;
                Ok(user)
            }
            _ => Err(Error::MissingParameters),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct CreateUserResponse {
    /// Opaque reference of the new subject
    pub subject_ref: String,
}
