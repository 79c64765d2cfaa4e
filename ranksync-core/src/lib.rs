//! ranksync core library: domain types, configuration, errors.
//!
//! - [`types`]: snapshot types shared by every crate
//! - [`config`]: environment-driven [`Config`]
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    GroupId, GuildId, GuildMember, GuildSnapshot, ManagedRoleSet, MembershipMap,
    MembershipRecord, RoleCasing, RoleId, RoleRef, UserId,
};
