use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub const DEFAULT_AVATAR: &str = "uploads/avatars/default.png";

/// Access level attached to every account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Superuser,
    Admin,
    #[default]
    Regular,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Superuser => "superuser",
            Role::Admin => "admin",
            Role::Regular => "regular",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Superuser => "Superuser",
            Role::Admin => "Administrator",
            Role::Regular => "Regular User",
        }
    }

    /// Capability check used by the route guards.
    pub fn is_any_of(self, allowed: &[Role]) -> bool {
        allowed.contains(&self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(String);

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "superuser" => Ok(Role::Superuser),
            "admin" => Ok(Role::Admin),
            "regular" => Ok(Role::Regular),
            _ => Err(UnknownRole(value)),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for accounts created through an external provider
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub theme: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: Option<String>,
    pub phone: String,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub blood_type: Option<String>,
    pub insurance_policy: Option<String>,
    pub insurer: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub birthday: Option<Date>,
    pub avatar_url: String,
    pub registered_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

impl User {
    pub fn has_custom_avatar(&self) -> bool {
        self.avatar_url != DEFAULT_AVATAR
    }
}

/// Fields collected at sign-up. Everything else is filled in from the profile page.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    /// `None` applies the bootstrap rule inside the store: Superuser when the
    /// table is empty, Regular otherwise.
    pub role: Option<Role>,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: Option<String>,
    pub phone: String,
    pub avatar_url: String,
}

impl Role {
    /// Role for a new account given whether any account exists yet.
    pub fn for_new_account(table_empty: bool) -> Self {
        if table_empty {
            Role::Superuser
        } else {
            Role::Regular
        }
    }
}

/// Full replacement of the editable profile fields.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: Option<String>,
    pub phone: String,
    pub national_id: Option<String>,
    pub address: Option<String>,
    pub company: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub blood_type: Option<String>,
    pub insurance_policy: Option<String>,
    pub insurer: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub birthday: Option<Date>,
    pub avatar_url: String,
}
