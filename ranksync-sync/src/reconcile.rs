//! Per-member role reconciliation.
//!
//! For every guild member matched to a membership record whose rank is
//! managed, the pass converges on exactly one managed role: the one named
//! after the rank. Members without a match are never touched.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

use ranksync_core::{
    config::ReconcileSettings, GuildId, GuildMember, GuildSnapshot, MembershipMap, RoleRef,
};

use crate::guild::GuildDirectory;
use crate::membership::MembershipSource;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every member was evaluated.
    Completed,
    /// The acting identity cannot manage roles; nothing was changed.
    MissingPermission,
    /// The membership source had nothing to offer this cycle.
    NoMembershipData,
}

/// Counters collected over one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub guild_id: GuildId,
    pub outcome: PassOutcome,
    /// Members that received their target role.
    pub updated: usize,
    /// Members that had other managed roles taken away.
    pub stripped: usize,
    pub roles_created: Vec<String>,
    /// Members with no membership record.
    pub unmatched: usize,
    /// Members whose rank is not managed, or whose target role is unavailable.
    pub skipped: usize,
    /// Failed directory calls (create, add or remove).
    pub failures: usize,
    pub duration_ms: u128,
}

impl PassReport {
    fn new(guild_id: GuildId, outcome: PassOutcome) -> Self {
        Self {
            guild_id,
            outcome,
            updated: 0,
            stripped: 0,
            roles_created: Vec::new(),
            unmatched: 0,
            skipped: 0,
            failures: 0,
            duration_ms: 0,
        }
    }

    /// Number of directory mutations that succeeded.
    pub fn mutations(&self) -> usize {
        self.updated + self.stripped + self.roles_created.len()
    }

    /// Terminal message shown to a manual invoker.
    pub fn user_message(&self) -> String {
        match self.outcome {
            PassOutcome::Completed => format!(
                "Manual sync complete! Updated {} member(s).",
                self.updated
            ),
            PassOutcome::MissingPermission => {
                "Sync aborted: missing required permission Manage Roles.".to_string()
            }
            PassOutcome::NoMembershipData => {
                "Manual sync complete! No members found in the group.".to_string()
            }
        }
    }
}

/// Case-insensitive role lookup, local to one pass.
#[derive(Debug, Default)]
pub struct RoleIndex {
    by_name: HashMap<String, RoleRef>,
}

impl RoleIndex {
    pub fn new(roles: &[RoleRef]) -> Self {
        let mut index = Self::default();
        for role in roles {
            index
                .by_name
                .entry(role.name.to_lowercase())
                .or_insert_with(|| role.clone());
        }
        index
    }

    pub fn get(&self, name: &str) -> Option<&RoleRef> {
        self.by_name.get(&name.to_lowercase())
    }

    pub fn insert(&mut self, role: RoleRef) {
        self.by_name.insert(role.name.to_lowercase(), role);
    }
}

/// Role changes for one member, computed before any call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDelta {
    pub target: RoleRef,
    pub remove: Vec<RoleRef>,
    pub add: bool,
}

impl MemberDelta {
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && !self.add
    }
}

/// Computes the delta for `member` once its target role is known.
pub fn member_delta(
    member: &GuildMember,
    target: &RoleRef,
    settings: &ReconcileSettings,
) -> MemberDelta {
    let remove = if settings.strip_unassigned_roles {
        member
            .current_roles
            .iter()
            .filter(|role| settings.managed_roles.contains(&role.name) && role.id != target.id)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };
    MemberDelta {
        target: target.clone(),
        remove,
        add: !member.has_role(&target.id),
    }
}

/// Applies managed-role assignments to one guild snapshot.
pub struct Reconciler<'a> {
    directory: &'a dyn GuildDirectory,
    settings: &'a ReconcileSettings,
}

impl<'a> Reconciler<'a> {
    pub fn new(directory: &'a dyn GuildDirectory, settings: &'a ReconcileSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    /// Full pass: permission check, membership fetch, then per-member apply.
    pub fn run(&self, guild: &GuildSnapshot, source: &dyn MembershipSource) -> PassReport {
        let started = Instant::now();

        if !guild.can_manage_roles {
            tracing::warn!(guild_id = %guild.id, "missing required permissions: Manage Roles");
            return PassReport::new(guild.id, PassOutcome::MissingPermission);
        }

        let membership = source.fetch_members();
        if membership.is_empty() {
            tracing::info!(guild_id = %guild.id, "no members found in group; skipping cycle");
            return PassReport::new(guild.id, PassOutcome::NoMembershipData);
        }

        let mut report = self.apply(guild, &membership);
        report.duration_ms = started.elapsed().as_millis();
        tracing::info!(
            guild_id = %guild.id,
            updated = report.updated,
            stripped = report.stripped,
            created = report.roles_created.len(),
            failures = report.failures,
            "sync complete, updated {} member(s)",
            report.updated,
        );
        report
    }

    /// Evaluates every member against a non-empty membership map.
    pub fn apply(&self, guild: &GuildSnapshot, membership: &MembershipMap) -> PassReport {
        let mut report = PassReport::new(guild.id, PassOutcome::Completed);
        let mut index = RoleIndex::new(&guild.roles);

        for member in &guild.members {
            let Some(rank) = membership.rank_for(member) else {
                report.unmatched += 1;
                continue;
            };
            if !self.settings.managed_roles.contains(rank) {
                report.skipped += 1;
                continue;
            }

            let Some(target) = self.resolve_target(guild.id, rank, &mut index, &mut report)
            else {
                report.skipped += 1;
                continue;
            };

            let delta = member_delta(member, &target, self.settings);
            self.apply_delta(guild.id, member, &delta, &mut report);
        }

        report
    }

    /// Finds the role for `rank`, creating it when allowed.
    fn resolve_target(
        &self,
        guild: GuildId,
        rank: &str,
        index: &mut RoleIndex,
        report: &mut PassReport,
    ) -> Option<RoleRef> {
        let name = self.settings.casing.apply(rank);
        if let Some(role) = index.get(&name) {
            return Some(role.clone());
        }
        if !self.settings.create_missing_roles {
            tracing::debug!(role = %name, "role missing and creation disabled");
            return None;
        }

        match self.directory.create_role(guild, &name) {
            Ok(role) => {
                tracing::info!(role = %role.name, role_id = %role.id, "created role");
                report.roles_created.push(role.name.clone());
                index.insert(role.clone());
                Some(role)
            }
            Err(err) => {
                tracing::error!(role = %name, error = %err, "failed to create role");
                report.failures += 1;
                None
            }
        }
    }

    fn apply_delta(
        &self,
        guild: GuildId,
        member: &GuildMember,
        delta: &MemberDelta,
        report: &mut PassReport,
    ) {
        if !delta.remove.is_empty() {
            match self.directory.remove_roles(guild, member.id, &delta.remove) {
                Ok(()) => {
                    report.stripped += 1;
                    tracing::debug!(
                        member = %member.display_name,
                        removed = delta.remove.len(),
                        "removed managed roles",
                    );
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(
                        member = %member.display_name,
                        user_id = %member.id,
                        error = %err,
                        "failed to remove roles",
                    );
                }
            }
        }

        if delta.add {
            match self.directory.add_role(guild, member.id, &delta.target) {
                Ok(()) => {
                    report.updated += 1;
                    tracing::debug!(
                        member = %member.display_name,
                        role = %delta.target.name,
                        "assigned role",
                    );
                }
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(
                        member = %member.display_name,
                        user_id = %member.id,
                        role = %delta.target.name,
                        error = %err,
                        "failed to add role",
                    );
                }
            }
        }
    }
}
