//! Membership source: the external group tracker (Wise Old Man).
//!
//! One blocking `GET {base}/v2/groups/{id}` per pass. Every failure is logged
//! and turned into an empty [`MembershipMap`], which the reconciler treats as
//! "skip this cycle".

use std::time::Duration;

use serde::Deserialize;

use ranksync_core::{config::Secret, Config, GroupId, MembershipMap, MembershipRecord};

use crate::error::FetchError;

/// Bound on connect and on each read of the group request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the optional API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Anything that can report current group membership.
pub trait MembershipSource: Send + Sync {
    /// Lowercase identity → rank. Empty means "no data available".
    fn fetch_members(&self) -> MembershipMap;
}

/// Blocking client for the group endpoint.
pub struct WomClient {
    agent: ureq::Agent,
    base_url: String,
    group_id: GroupId,
    api_key: Option<Secret>,
}

impl WomClient {
    pub fn new(base_url: impl Into<String>, group_id: GroupId, api_key: Option<Secret>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(FETCH_TIMEOUT)
            .timeout_read(FETCH_TIMEOUT)
            .user_agent(concat!("ranksync/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            group_id,
            api_key: api_key.filter(|key| !key.expose().is_empty()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.wom_base_url.clone(),
            config.group_id,
            Some(config.wom_api_key.clone()),
        )
    }

    pub fn group_url(&self) -> String {
        format!("{}/v2/groups/{}", self.base_url, self.group_id)
    }

    /// Performs the request, surfacing the failure kind.
    pub fn try_fetch(&self) -> Result<MembershipMap, FetchError> {
        let mut request = self.agent.get(&self.group_url());
        if let Some(key) = &self.api_key {
            request = request.set(API_KEY_HEADER, key.expose());
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => return Err(FetchError::Http { status }),
            Err(ureq::Error::Transport(err)) => return Err(FetchError::Transport(err.to_string())),
        };

        let body = response
            .into_string()
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        parse_group(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

impl MembershipSource for WomClient {
    fn fetch_members(&self) -> MembershipMap {
        match self.try_fetch() {
            Ok(members) => {
                tracing::debug!(
                    group_id = %self.group_id,
                    members = members.len(),
                    "fetched group memberships",
                );
                members
            }
            Err(err) => {
                tracing::warn!(
                    group_id = %self.group_id,
                    error = %err,
                    "error fetching group members",
                );
                MembershipMap::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GroupDetails {
    #[serde(default)]
    memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    role: Option<String>,
    player: Player,
}

#[derive(Debug, Deserialize)]
struct Player {
    username: String,
}

/// Decodes a group details payload into a membership map.
///
/// Entries without a role are skipped.
pub fn parse_group(body: &str) -> Result<MembershipMap, serde_json::Error> {
    let details: GroupDetails = serde_json::from_str(body)?;
    Ok(details
        .memberships
        .into_iter()
        .filter_map(|m| {
            m.role
                .map(|role| MembershipRecord::new(&m.player.username, role))
        })
        .collect())
}
