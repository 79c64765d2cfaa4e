//! The guild directory seam: reads a live snapshot and applies role mutations.

use ranksync_core::{GuildId, GuildSnapshot, RoleRef, UserId};

use crate::error::DirectoryError;

/// Identity the directory client acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
}

/// Chat-platform guild registry and its mutation API.
///
/// Implementations are blocking; the daemon calls them from a blocking task.
pub trait GuildDirectory: Send + Sync {
    /// The identity mutations are performed as. A successful call marks the
    /// session as ready.
    fn current_user(&self) -> Result<CurrentUser, DirectoryError>;

    /// Reads members, roles and the acting identity's role-management right.
    ///
    /// `Ok(None)` means the guild is unknown or not visible to the caller.
    fn guild(&self, guild: GuildId) -> Result<Option<GuildSnapshot>, DirectoryError>;

    fn create_role(&self, guild: GuildId, name: &str) -> Result<RoleRef, DirectoryError>;

    fn add_role(&self, guild: GuildId, member: UserId, role: &RoleRef)
        -> Result<(), DirectoryError>;

    fn remove_roles(
        &self,
        guild: GuildId,
        member: UserId,
        roles: &[RoleRef],
    ) -> Result<(), DirectoryError>;
}
