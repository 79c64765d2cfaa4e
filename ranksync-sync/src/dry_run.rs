//! A [`GuildDirectory`] wrapper that reads through and logs mutations instead
//! of applying them.

use std::sync::atomic::{AtomicU64, Ordering};

use ranksync_core::{GuildId, GuildSnapshot, RoleId, RoleRef, UserId};

use crate::error::DirectoryError;
use crate::guild::{CurrentUser, GuildDirectory};

pub struct DryRun<'a> {
    inner: &'a dyn GuildDirectory,
    /// Placeholder ids for roles that would be created, counted down from
    /// `u64::MAX` so they never collide with real snowflakes.
    next_placeholder: AtomicU64,
}

impl<'a> DryRun<'a> {
    pub fn new(inner: &'a dyn GuildDirectory) -> Self {
        Self {
            inner,
            next_placeholder: AtomicU64::new(u64::MAX),
        }
    }
}

impl GuildDirectory for DryRun<'_> {
    fn current_user(&self) -> Result<CurrentUser, DirectoryError> {
        self.inner.current_user()
    }

    fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError> {
        self.inner.guild(guild)
    }

    fn create_role(&self, guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError> {
        tracing::info!(guild_id = %guild, role = %name, "[dry-run] would create role");
        let id = self.next_placeholder.fetch_sub(1, Ordering::Relaxed);
        Ok(RoleRef::new(RoleId(id), name))
    }

    fn add_role(
        &self,
        guild: GuildId,
        member: UserId,
        role: &RoleRef,
    ) -> Result<(), DirectoryError> {
        tracing::info!(guild_id = %guild, user_id = %member, role = %role.name, "[dry-run] would add role");
        Ok(())
    }

    fn remove_roles(
        &self,
        guild: GuildId,
        member: UserId,
        roles: &[RoleRef],
    ) -> Result<(), DirectoryError> {
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        tracing::info!(guild_id = %guild, user_id = %member, roles = ?names, "[dry-run] would remove roles");
        Ok(())
    }
}
