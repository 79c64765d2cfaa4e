//! # ranksync-sync
//!
//! Remote clients and the reconciliation pass.
//!
//! Call [`pipeline::run`] to resolve a guild and reconcile it against the
//! membership source, or drive a [`Reconciler`] directly with a snapshot.

pub mod discord;
pub mod dry_run;
pub mod error;
pub mod guild;
pub mod membership;
pub mod pipeline;
pub mod reconcile;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use discord::DiscordClient;
pub use dry_run::DryRun;
pub use error::{DirectoryError, FetchError, SyncError};
pub use guild::{CurrentUser, GuildDirectory};
pub use membership::{MembershipSource, WomClient};
pub use reconcile::{member_delta, MemberDelta, PassOutcome, PassReport, Reconciler, RoleIndex};
