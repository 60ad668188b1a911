use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, StoreError};

pub const ADMIN_ROLE: &str = "admin";
pub const USER_ROLE: &str = "user";
pub const VISITOR_ROLE: &str = "visitor";

/// Roles accepted by [`User::validate`]
pub const KNOWN_ROLES: [&str; 3] = [ADMIN_ROLE, USER_ROLE, VISITOR_ROLE];

pub const DEFAULT_SPACE_LIMIT: i64 = 1024 * 1024 * 1024; // 1GB
pub const DEFAULT_UPLOAD_SPEED_LIMIT: i32 = 50 * 1024 * 1024; // 50MB/s
pub const DEFAULT_DOWNLOAD_SPEED_LIMIT: i32 = 50 * 1024 * 1024; // 50MB/s

/// Per-user limits, stored as an encoded blob in `t_user.quota`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Upper bound on `used_space` in bytes
    #[serde(deserialize_with = "int_or_string")]
    pub space_limit: i64,
    /// Bytes per second
    #[serde(default = "default_upload_speed_limit")]
    pub upload_speed_limit: i32,
    /// Bytes per second
    #[serde(default = "default_download_speed_limit")]
    pub download_speed_limit: i32,
}

fn default_upload_speed_limit() -> i32 {
    DEFAULT_UPLOAD_SPEED_LIMIT
}

fn default_download_speed_limit() -> i32 {
    DEFAULT_DOWNLOAD_SPEED_LIMIT
}

impl Default for Quota {
    fn default() -> Self {
        Quota {
            space_limit: DEFAULT_SPACE_LIMIT,
            upload_speed_limit: DEFAULT_UPLOAD_SPEED_LIMIT,
            download_speed_limit: DEFAULT_DOWNLOAD_SPEED_LIMIT,
        }
    }
}

impl Quota {
    /// Quota with the given space limit and default speed limits
    pub fn with_space_limit(space_limit: i64) -> Self {
        Quota {
            space_limit,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.space_limit < 0 {
            return Err(StoreError::Validation(format!(
                "space limit must be >= 0, got {}",
                self.space_limit
            )));
        }
        if self.upload_speed_limit <= 0 {
            return Err(StoreError::Validation(format!(
                "upload speed limit must be > 0, got {}",
                self.upload_speed_limit
            )));
        }
        if self.download_speed_limit <= 0 {
            return Err(StoreError::Validation(format!(
                "download speed limit must be > 0, got {}",
                self.download_speed_limit
            )));
        }
        Ok(())
    }
}

/// Older rows encode `spaceLimit` as a JSON string.
fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(v) => Ok(v),
        IntOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Background settings for the user's UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BgConfig {
    pub url: String,
    pub repeat: String,
    pub position: String,
    pub align: String,
    pub bg_color: String,
}

/// User-configurable settings, stored as an encoded blob in `t_user.preference`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub bg: BgConfig,
    #[serde(rename = "cssURL")]
    pub css_url: String,
    #[serde(rename = "lanPackURL")]
    pub lan_pack_url: String,
    pub lan: String,
    pub theme: String,
    pub avatar: String,
    pub email: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            bg: BgConfig::default(),
            css_url: String::new(),
            lan_pack_url: String::new(),
            lan: "en_US".to_string(),
            theme: "light".to_string(),
            avatar: String::new(),
            email: String::new(),
        }
    }
}

/// A row of `t_user`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    /// Credential material, already hashed by the caller
    pub pwd: String,
    pub role: String,
    pub used_space: i64,
    pub quota: Quota,
    pub preferences: Preferences,
}

impl User {
    /// New user with zero usage, default quota and default preferences
    pub fn new(id: u64, name: &str, pwd: &str, role: &str) -> Self {
        User {
            id,
            name: name.to_string(),
            pwd: pwd.to_string(),
            role: role.to_string(),
            used_space: 0,
            quota: Quota::default(),
            preferences: Preferences::default(),
        }
    }

    /// Check required fields, role, quota and non-negative usage.
    ///
    /// Usage above the limit is allowed here: resets and lowered quotas can
    /// leave a stored row in that state.
    pub fn validate(&self) -> Result<()> {
        sql_id(self.id)?;

        if self.name.trim().is_empty() {
            return Err(StoreError::Validation("name must not be empty".to_string()));
        }
        if self.pwd.is_empty() {
            return Err(StoreError::Validation("pwd must not be empty".to_string()));
        }
        validate_role(&self.role)?;
        self.quota.validate()?;

        if self.used_space < 0 {
            return Err(StoreError::Validation(format!(
                "used space must be >= 0, got {}",
                self.used_space
            )));
        }

        Ok(())
    }

    /// [`User::validate`] plus `used_space <= space_limit`, for new users
    pub fn validate_new(&self) -> Result<()> {
        self.validate()?;

        if self.used_space > self.quota.space_limit {
            return Err(StoreError::Validation(format!(
                "used space {} exceeds space limit {}",
                self.used_space, self.quota.space_limit
            )));
        }

        Ok(())
    }

    /// Bytes left before the space limit is reached
    pub fn space_remaining(&self) -> i64 {
        self.quota.space_limit.saturating_sub(self.used_space).max(0)
    }
}

pub fn validate_role(role: &str) -> Result<()> {
    if KNOWN_ROLES.contains(&role) {
        Ok(())
    } else {
        Err(StoreError::Validation(format!("unknown role '{}'", role)))
    }
}

/// SQLite integers are signed; ids above `i64::MAX` cannot be stored.
pub(crate) fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id)
        .map_err(|_| StoreError::Validation(format!("id {} is out of range", id)))
}
