//! Environment-driven configuration.
//!
//! [`Config::from_env`] is called once at startup. A missing credential is
//! fatal: nothing is contacted and no mutation is attempted.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{GroupId, GuildId, ManagedRoleSet, RoleCasing};

pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
pub const ENV_WOM_API_KEY: &str = "WOM_API_KEY";
pub const ENV_GUILD_ID: &str = "DISCORD_GUILD_ID";
pub const ENV_GROUP_ID: &str = "WOM_GROUP_ID";
pub const ENV_ROLE_NAMES: &str = "WOM_ROLE_NAMES";
pub const ENV_CASING: &str = "ROLE_CREATION_CASING";
pub const ENV_CREATE_MISSING: &str = "CREATE_MISSING_ROLES";
pub const ENV_STRIP_UNASSIGNED: &str = "REMOVE_WOM_ROLES_NOT_ASSIGNED";
pub const ENV_INTERVAL: &str = "SYNC_INTERVAL_SECS";
pub const ENV_WOM_BASE_URL: &str = "WOM_API_BASE_URL";
pub const ENV_DISCORD_BASE_URL: &str = "DISCORD_API_BASE_URL";
pub const ENV_SOCKET: &str = "RANKSYNC_SOCKET";

pub const DEFAULT_ROLE_NAMES: [&str; 3] = ["Squire", "Knight", "Owner"];
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_WOM_BASE_URL: &str = "https://api.wiseoldman.net";
pub const DEFAULT_DISCORD_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_SOCKET_FILE: &str = "ranksync.sock";

/// Values shipped in sample env files that must never reach a remote API.
const PLACEHOLDER_PREFIX: &str = "PUT_YOUR_";

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Knobs the reconciler reads on every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub managed_roles: ManagedRoleSet,
    pub casing: RoleCasing,
    pub create_missing_roles: bool,
    pub strip_unassigned_roles: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            managed_roles: ManagedRoleSet::new(DEFAULT_ROLE_NAMES),
            casing: RoleCasing::AsIs,
            create_missing_roles: true,
            strip_unassigned_roles: true,
        }
    }
}

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: Secret,
    pub wom_api_key: Secret,
    pub guild_id: GuildId,
    pub group_id: GroupId,
    pub reconcile: ReconcileSettings,
    pub sync_interval: Duration,
    pub wom_base_url: String,
    pub discord_base_url: String,
    pub socket_path: PathBuf,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &'static str| {
            get(key)
                .filter(|v| !v.starts_with(PLACEHOLDER_PREFIX))
                .ok_or(ConfigError::Missing(key))
        };

        // Credentials first so the fail-fast message names them.
        let bot_token = Secret::new(require(ENV_BOT_TOKEN)?);
        let wom_api_key = Secret::new(require(ENV_WOM_API_KEY)?);
        let guild_id = GuildId(parse_u64(ENV_GUILD_ID, &require(ENV_GUILD_ID)?)?);
        let group_id = GroupId(parse_u64(ENV_GROUP_ID, &require(ENV_GROUP_ID)?)?);

        let managed_roles = match get(ENV_ROLE_NAMES) {
            Some(raw) => ManagedRoleSet::new(raw.split(',')),
            None => ManagedRoleSet::new(DEFAULT_ROLE_NAMES),
        };
        if managed_roles.is_empty() {
            return Err(ConfigError::Invalid {
                key: ENV_ROLE_NAMES,
                reason: "no role names given".to_string(),
            });
        }

        let casing = get(ENV_CASING)
            .map(|v| RoleCasing::parse(&v))
            .unwrap_or_default();
        let create_missing_roles = get(ENV_CREATE_MISSING)
            .map(|v| parse_bool(ENV_CREATE_MISSING, &v))
            .transpose()?
            .unwrap_or(true);
        let strip_unassigned_roles = get(ENV_STRIP_UNASSIGNED)
            .map(|v| parse_bool(ENV_STRIP_UNASSIGNED, &v))
            .transpose()?
            .unwrap_or(true);

        let sync_interval = match get(ENV_INTERVAL) {
            Some(raw) => match parse_u64(ENV_INTERVAL, &raw)? {
                0 => {
                    return Err(ConfigError::Invalid {
                        key: ENV_INTERVAL,
                        reason: "interval must be greater than zero".to_string(),
                    })
                }
                secs => Duration::from_secs(secs),
            },
            None => DEFAULT_INTERVAL,
        };

        let socket_path = match get(ENV_SOCKET) {
            Some(path) => PathBuf::from(path),
            None => default_socket_path()?,
        };

        Ok(Self {
            bot_token,
            wom_api_key,
            guild_id,
            group_id,
            reconcile: ReconcileSettings {
                managed_roles,
                casing,
                create_missing_roles,
                strip_unassigned_roles,
            },
            sync_interval,
            wom_base_url: trim_base(get(ENV_WOM_BASE_URL), DEFAULT_WOM_BASE_URL),
            discord_base_url: trim_base(get(ENV_DISCORD_BASE_URL), DEFAULT_DISCORD_BASE_URL),
            socket_path,
        })
    }
}

/// `~/.ranksync/ranksync.sock`
pub fn default_socket_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(home.join(".ranksync").join(DEFAULT_SOCKET_FILE))
}

fn trim_base(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|err| ConfigError::Invalid {
        key,
        reason: format!("'{value}' is not a non-negative integer ({err})"),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
