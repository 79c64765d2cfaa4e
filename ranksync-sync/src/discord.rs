//! [`GuildDirectory`] over the Discord REST API (v10).
//!
//! Listing members requires the privileged "server members" intent to be
//! enabled for the bot application.

use std::sync::OnceLock;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use ranksync_core::{
    config::Secret, Config, GuildId, GuildMember, GuildSnapshot, RoleId, RoleRef, UserId,
};

use crate::error::DirectoryError;
use crate::guild::{CurrentUser, GuildDirectory};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Page size for `GET /guilds/{id}/members`, the API maximum.
pub const MEMBERS_PAGE_LIMIT: usize = 1000;

pub const PERMISSION_ADMINISTRATOR: u64 = 1 << 3;
pub const PERMISSION_MANAGE_ROLES: u64 = 1 << 28;

const AUDIT_LOG_REASON: &str = "ranksync: group rank sync";

pub struct DiscordClient {
    agent: ureq::Agent,
    base_url: String,
    token: Secret,
    me: OnceLock<CurrentUser>,
}

impl DiscordClient {
    pub fn new(base_url: impl Into<String>, token: Secret) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout_read(REQUEST_TIMEOUT)
            .user_agent(concat!(
                "DiscordBot (https://github.com/ranksync/ranksync, ",
                env!("CARGO_PKG_VERSION"),
                ")"
            ))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            me: OnceLock::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.discord_base_url.clone(), config.bot_token.clone())
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        self.agent
            .request(method, &format!("{}{}", self.base_url, path))
            .set("Authorization", &format!("Bot {}", self.token.expose()))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DirectoryError> {
        let response = self
            .request("GET", path)
            .call()
            .map_err(|err| map_ureq_error(path, err))?;
        response
            .into_json::<T>()
            .map_err(|source| DirectoryError::Decode {
                endpoint: path.to_string(),
                source,
            })
    }

    fn me(&self) -> Result<CurrentUser, DirectoryError> {
        if let Some(me) = self.me.get() {
            return Ok(me.clone());
        }
        let user: WireUser = self.get_json("/users/@me")?;
        let me = CurrentUser {
            id: UserId(parse_snowflake(&user.id)?),
            name: user.username,
        };
        Ok(self.me.get_or_init(|| me).clone())
    }

    fn list_members(&self, guild: GuildId) -> Result<Vec<WireMember>, DirectoryError> {
        let mut members = Vec::new();
        let mut after = 0u64;
        loop {
            let path = format!("/guilds/{guild}/members?limit={MEMBERS_PAGE_LIMIT}&after={after}");
            let page: Vec<WireMember> = self.get_json(&path)?;
            let page_len = page.len();
            let mut last = after;
            for member in &page {
                last = last.max(parse_snowflake(&member.user.id)?);
            }
            members.extend(page);
            if page_len < MEMBERS_PAGE_LIMIT || last == after {
                break;
            }
            after = last;
        }
        Ok(members)
    }
}

impl GuildDirectory for DiscordClient {
    fn current_user(&self) -> Result<CurrentUser, DirectoryError> {
        self.me()
    }

    fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError> {
        let info: WireGuild = match self.get_json(&format!("/guilds/{guild}")) {
            Ok(info) => info,
            // 403 is what the API answers for guilds the bot is not part of.
            Err(DirectoryError::Http { status: 403 | 404, .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let me = self.me()?;

        let wire_roles: Vec<WireRole> = self.get_json(&format!("/guilds/{guild}/roles"))?;
        let roles = wire_roles
            .iter()
            .map(WireRole::to_role_ref)
            .collect::<Result<Vec<_>, _>>()?;

        let wire_members = self.list_members(guild)?;
        let mut members = Vec::with_capacity(wire_members.len());
        let mut my_role_ids = Vec::new();
        for wire in wire_members {
            let member = wire.into_member(&roles)?;
            if member.id == me.id {
                my_role_ids = member.current_roles.iter().map(|r| r.id).collect();
            }
            members.push(member);
        }

        let is_owner = parse_snowflake(&info.owner_id)? == me.id.0;
        let can_manage_roles = is_owner
            || has_manage_roles(
                effective_permissions(guild, &wire_roles, &my_role_ids)?,
            );

        Ok(Some(GuildSnapshot {
            id: guild,
            name: info.name,
            members,
            roles,
            can_manage_roles,
        }))
    }

    fn create_role(&self, guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError> {
        let path = format!("/guilds/{guild}/roles");
        let response = self
            .request("POST", &path)
            .set("X-Audit-Log-Reason", AUDIT_LOG_REASON)
            .send_json(json!({ "name": name }))
            .map_err(|err| map_ureq_error(&path, err))?;
        let role: WireRole = response
            .into_json()
            .map_err(|source| DirectoryError::Decode {
                endpoint: path.clone(),
                source,
            })?;
        role.to_role_ref()
    }

    fn add_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: &RoleRef,
    ) -> Result<(), DirectoryError> {
        let path = format!("/guilds/{guild}/members/{member}/roles/{}", role.id);
        self.request("PUT", &path)
            .set("X-Audit-Log-Reason", AUDIT_LOG_REASON)
            .send_bytes(&[])
            .map_err(|err| map_ureq_error(&path, err))?;
        Ok(())
    }

    fn remove_roles(
        &self,
        guild: GuildId,
        member: UserId,
        roles: &[RoleRef],
    ) -> Result<(), DirectoryError> {
        for role in roles {
            let path = format!("/guilds/{guild}/members/{member}/roles/{}", role.id);
            self.request("DELETE", &path)
                .set("X-Audit-Log-Reason", AUDIT_LOG_REASON)
                .call()
                .map_err(|err| map_ureq_error(&path, err))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireGuild {
    name: String,
    owner_id: String,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    id: String,
    name: String,
    /// Bitset serialized as a decimal string.
    #[serde(default)]
    permissions: String,
}

impl WireRole {
    fn to_role_ref(&self) -> Result<RoleRef, DirectoryError> {
        Ok(RoleRef::new(parse_snowflake(&self.id)?, self.name.clone()))
    }
}

#[derive(Debug, Deserialize)]
struct WireMember {
    user: WireUser,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

impl WireMember {
    /// Role ids are resolved against the guild role list; unknown ids are dropped.
    fn into_member(self, guild_roles: &[RoleRef]) -> Result<GuildMember, DirectoryError> {
        let id = UserId(parse_snowflake(&self.user.id)?);
        let mut current_roles = Vec::with_capacity(self.roles.len());
        for raw in &self.roles {
            let role_id = RoleId(parse_snowflake(raw)?);
            if let Some(role) = guild_roles.iter().find(|r| r.id == role_id) {
                current_roles.push(role.clone());
            }
        }
        let display_name = self
            .nick
            .or(self.user.global_name)
            .unwrap_or_else(|| self.user.username.clone());
        Ok(GuildMember {
            id,
            display_name,
            login_name: self.user.username,
            current_roles,
        })
    }
}

fn parse_snowflake(raw: &str) -> Result<u64, DirectoryError> {
    raw.parse::<u64>()
        .map_err(|_| DirectoryError::InvalidId(raw.to_string()))
}

fn parse_permissions(raw: &str) -> Result<u64, DirectoryError> {
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse::<u64>()
        .map_err(|_| DirectoryError::InvalidId(raw.to_string()))
}

/// Guild-level permissions: `@everyone` (id == guild id) plus every held role.
fn effective_permissions(
    guild: GuildId,
    roles: &[WireRole],
    held: &[RoleId],
) -> Result<u64, DirectoryError> {
    let mut bits = 0u64;
    for role in roles {
        let id = parse_snowflake(&role.id)?;
        if id == guild.0 || held.contains(&RoleId(id)) {
            bits |= parse_permissions(&role.permissions)?;
        }
    }
    Ok(bits)
}

fn has_manage_roles(bits: u64) -> bool {
    bits & (PERMISSION_ADMINISTRATOR | PERMISSION_MANAGE_ROLES) != 0
}

fn map_ureq_error(endpoint: &str, err: ureq::Error) -> DirectoryError {
    match err {
        ureq::Error::Status(status, response) => DirectoryError::Http {
            endpoint: endpoint.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => DirectoryError::Transport {
            endpoint: endpoint.to_string(),
            message: transport.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_role(id: &str, name: &str, permissions: &str) -> WireRole {
        WireRole {
            id: id.to_string(),
            name: name.to_string(),
            permissions: permissions.to_string(),
        }
    }

    #[test]
    fn everyone_role_contributes_permissions() {
        let roles = vec![
            wire_role("10", "@everyone", &PERMISSION_MANAGE_ROLES.to_string()),
            wire_role("11", "Knight", "0"),
        ];
        let bits = effective_permissions(GuildId(10), &roles, &[]).expect("bits");
        assert!(has_manage_roles(bits));
    }

    #[test]
    fn held_role_grants_administrator() {
        let roles = vec![
            wire_role("10", "@everyone", "1024"),
            wire_role("12", "Bot", &PERMISSION_ADMINISTRATOR.to_string()),
            wire_role("13", "Other", &PERMISSION_MANAGE_ROLES.to_string()),
        ];
        assert!(has_manage_roles(
            effective_permissions(GuildId(10), &roles, &[RoleId(12)]).expect("bits")
        ));
        assert!(!has_manage_roles(
            effective_permissions(GuildId(10), &roles, &[]).expect("bits")
        ));
    }

    #[test]
    fn member_display_name_falls_back_to_global_then_username() {
        let roles = vec![RoleRef::new(RoleId(5), "Knight")];
        let raw = r#"[
            {"user": {"id": "1", "username": "lance", "global_name": "Lancelot"}, "nick": "Sir L", "roles": ["5", "99"]},
            {"user": {"id": "2", "username": "gawain", "global_name": "Gawain"}, "roles": []},
            {"user": {"id": "3", "username": "kay"}, "nick": null}
        ]"#;
        let wire: Vec<WireMember> = serde_json::from_str(raw).expect("decode");
        let members: Vec<GuildMember> = wire
            .into_iter()
            .map(|m| m.into_member(&roles).expect("member"))
            .collect();

        assert_eq!(members[0].display_name, "Sir L");
        assert_eq!(members[0].login_name, "lance");
        assert_eq!(members[0].current_roles, roles, "unknown role ids are dropped");
        assert_eq!(members[1].display_name, "Gawain");
        assert_eq!(members[2].display_name, "kay");
    }

    #[test]
    fn bad_snowflake_is_rejected() {
        assert!(matches!(
            parse_snowflake("abc"),
            Err(DirectoryError::InvalidId(raw)) if raw == "abc"
        ));
    }
}
