//! In-memory directory and membership source for tests.
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `testing` feature.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ranksync_core::{
    GuildId, GuildMember, GuildSnapshot, MembershipMap, MembershipRecord, RoleId, RoleRef, UserId,
};

use crate::error::DirectoryError;
use crate::guild::{CurrentUser, GuildDirectory};
use crate::membership::MembershipSource;

pub const BOT_USER_ID: UserId = UserId(999);

/// One successful directory mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateRole(String),
    Add { member: UserId, role: String },
    Remove { member: UserId, roles: Vec<String> },
}

#[derive(Debug)]
struct State {
    members: Vec<GuildMember>,
    roles: Vec<RoleRef>,
    next_role_id: u64,
    mutations: Vec<Mutation>,
}

/// A single guild held in memory. Successful mutations change the state that
/// the next [`GuildDirectory::guild`] call returns.
#[derive(Debug)]
pub struct MemoryGuild {
    id: GuildId,
    name: String,
    can_manage_roles: bool,
    fail_create: bool,
    fail_add: HashSet<UserId>,
    fail_remove: HashSet<UserId>,
    state: Mutex<State>,
}

impl MemoryGuild {
    pub fn new(id: u64) -> Self {
        Self {
            id: GuildId(id),
            name: format!("guild-{id}"),
            can_manage_roles: true,
            fail_create: false,
            fail_add: HashSet::new(),
            fail_remove: HashSet::new(),
            state: Mutex::new(State {
                members: Vec::new(),
                roles: Vec::new(),
                next_role_id: 100,
                mutations: Vec::new(),
            }),
        }
    }

    pub fn with_role(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            let id = state.next_role_id;
            state.next_role_id += 1;
            state.roles.push(RoleRef::new(id, name));
        }
        self
    }

    /// Adds a member holding the named roles; unknown names are created first.
    pub fn with_member(self, id: u64, display_name: &str, login_name: &str, roles: &[&str]) -> Self {
        {
            let mut state = self.lock();
            let mut current_roles = Vec::new();
            for name in roles {
                let existing = state.roles.iter().find(|r| r.name == *name).cloned();
                let role = match existing {
                    Some(role) => role,
                    None => {
                        let role = RoleRef::new(state.next_role_id, *name);
                        state.next_role_id += 1;
                        state.roles.push(role.clone());
                        role
                    }
                };
                current_roles.push(role);
            }
            state.members.push(GuildMember {
                id: UserId(id),
                display_name: display_name.to_string(),
                login_name: login_name.to_string(),
                current_roles,
            });
        }
        self
    }

    pub fn without_manage_roles(mut self) -> Self {
        self.can_manage_roles = false;
        self
    }

    pub fn failing_role_creation(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_add_for(mut self, member: u64) -> Self {
        self.fail_add.insert(UserId(member));
        self
    }

    pub fn failing_remove_for(mut self, member: u64) -> Self {
        self.fail_remove.insert(UserId(member));
        self
    }

    pub fn guild_id(&self) -> GuildId {
        self.id
    }

    /// Names of the roles `member` currently holds, sorted.
    pub fn roles_of(&self, member: u64) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state
            .members
            .iter()
            .find(|m| m.id == UserId(member))
            .map(|m| m.current_roles.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn role_names(&self) -> Vec<String> {
        self.lock().roles.iter().map(|r| r.name.clone()).collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refused(endpoint: &str) -> DirectoryError {
        DirectoryError::Http {
            endpoint: endpoint.to_string(),
            status: 403,
            body: "Missing Permissions".to_string(),
        }
    }
}

impl GuildDirectory for MemoryGuild {
    fn current_user(&self) -> Result<CurrentUser, DirectoryError> {
        Ok(CurrentUser {
            id: BOT_USER_ID,
            name: "ranksync".to_string(),
        })
    }

    fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError> {
        if guild != self.id {
            return Ok(None);
        }
        let state = self.lock();
        Ok(Some(GuildSnapshot {
            id: self.id,
            name: self.name.clone(),
            members: state.members.clone(),
            roles: state.roles.clone(),
            can_manage_roles: self.can_manage_roles,
        }))
    }

    fn create_role(&self, _guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError> {
        if self.fail_create {
            return Err(Self::refused("create_role"));
        }
        let mut state = self.lock();
        let role = RoleRef::new(RoleId(state.next_role_id), name);
        state.next_role_id += 1;
        state.roles.push(role.clone());
        state.mutations.push(Mutation::CreateRole(name.to_string()));
        Ok(role)
    }

    fn add_role(
        &self,
        _guild: GuildId,
        member: UserId,
        role: &RoleRef,
    ) -> Result<(), DirectoryError> {
        if self.fail_add.contains(&member) {
            return Err(Self::refused("add_role"));
        }
        let mut state = self.lock();
        if let Some(m) = state.members.iter_mut().find(|m| m.id == member) {
            if !m.has_role(&role.id) {
                m.current_roles.push(role.clone());
            }
        }
        state.mutations.push(Mutation::Add {
            member,
            role: role.name.clone(),
        });
        Ok(())
    }

    fn remove_roles(
        &self,
        _guild: GuildId,
        member: UserId,
        roles: &[RoleRef],
    ) -> Result<(), DirectoryError> {
        if self.fail_remove.contains(&member) {
            return Err(Self::refused("remove_roles"));
        }
        let mut state = self.lock();
        if let Some(m) = state.members.iter_mut().find(|m| m.id == member) {
            m.current_roles
                .retain(|held| !roles.iter().any(|r| r.id == held.id));
        }
        state.mutations.push(Mutation::Remove {
            member,
            roles: roles.iter().map(|r| r.name.clone()).collect(),
        });
        Ok(())
    }
}

/// Membership source returning a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership(pub MembershipMap);

impl StaticMembership {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(identity, rank)| MembershipRecord::new(identity, *rank))
                .collect(),
        )
    }

    /// Simulates a transport failure: the fetcher yields nothing.
    pub fn unavailable() -> Self {
        Self(MembershipMap::new())
    }
}

impl MembershipSource for StaticMembership {
    fn fetch_members(&self) -> MembershipMap {
        self.0.clone()
    }
}
