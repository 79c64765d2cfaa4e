//! Shared pass entrypoint used by the CLI and the daemon worker.

use ranksync_core::{config::ReconcileSettings, GuildId};

use crate::{GuildDirectory, MembershipSource, PassReport, Reconciler, SyncError};

/// Resolve `guild_id` and run one reconciliation pass against it.
///
/// Guild-not-found and snapshot read failures end the pass before any member
/// is evaluated; everything after that is reported through [`PassReport`].
pub fn run(
    directory: &dyn GuildDirectory,
    source: &dyn MembershipSource,
    guild_id: GuildId,
    settings: &ReconcileSettings,
) -> Result<PassReport, SyncError> {
    let guild = directory
        .guild(guild_id)?
        .ok_or(SyncError::GuildNotFound(guild_id))?;
    tracing::debug!(
        guild_id = %guild.id,
        guild = %guild.name,
        members = guild.members.len(),
        roles = guild.roles.len(),
        "guild snapshot loaded",
    );
    Ok(Reconciler::new(directory, settings).run(&guild, source))
}

#[cfg(test)]
mod tests {
    use ranksync_core::{ManagedRoleSet, RoleCasing, UserId};
    use rstest::rstest;

    use crate::testing::{MemoryGuild, Mutation, StaticMembership};
    use crate::PassOutcome;

    use super::*;

    const GUILD: GuildId = GuildId(1);

    fn settings() -> ReconcileSettings {
        ReconcileSettings {
            managed_roles: ManagedRoleSet::new(["Squire", "Knight", "Owner"]),
            casing: RoleCasing::Title,
            create_missing_roles: true,
            strip_unassigned_roles: true,
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn promoted_member_swaps_squire_for_new_knight_role() {
        let guild = MemoryGuild::new(1).with_member(10, "Alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.outcome, PassOutcome::Completed);
        assert_eq!(report.updated, 1);
        assert_eq!(report.roles_created, names(&["Knight"]));
        assert_eq!(guild.roles_of(10), names(&["Knight"]));
        assert_eq!(
            guild.mutations(),
            vec![
                Mutation::CreateRole("Knight".to_string()),
                Mutation::Remove {
                    member: UserId(10),
                    roles: names(&["Squire"]),
                },
                Mutation::Add {
                    member: UserId(10),
                    role: "Knight".to_string(),
                },
            ]
        );
    }

    #[test]
    fn members_without_a_record_are_untouched() {
        let guild = MemoryGuild::new(1)
            .with_role("Knight")
            .with_member(10, "alice", "alice", &[])
            .with_member(11, "mallory", "mallory", &["Squire", "Owner"]);
        let source = StaticMembership::from_pairs(&[("alice", "knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.unmatched, 1);
        assert_eq!(guild.roles_of(11), names(&["Owner", "Squire"]));
        assert!(guild.mutations().iter().all(|m| match m {
            Mutation::Add { member, .. } | Mutation::Remove { member, .. } => *member != UserId(11),
            Mutation::CreateRole(_) => true,
        }));
    }

    #[test]
    fn second_pass_without_changes_is_a_noop() {
        let guild = MemoryGuild::new(1)
            .with_member(10, "alice", "alice", &["Squire"])
            .with_member(11, "bob", "bob", &["Owner", "Knight"])
            .with_member(12, "carol", "carol", &[]);
        let source =
            StaticMembership::from_pairs(&[("alice", "Knight"), ("bob", "Owner"), ("carol", "squire")]);

        let first = run(&guild, &source, GUILD, &settings()).expect("first");
        assert!(first.mutations() > 0);
        guild.clear_mutations();

        let second = run(&guild, &source, GUILD, &settings()).expect("second");
        assert_eq!(second.mutations(), 0);
        assert_eq!(second.updated, 0);
        assert!(guild.mutations().is_empty());
    }

    #[test]
    fn every_matched_member_ends_with_exactly_one_managed_role() {
        let guild = MemoryGuild::new(1)
            .with_member(10, "alice", "alice", &["Squire", "Raider"])
            .with_member(11, "bob", "bob", &["Owner"])
            .with_member(12, "carol", "carol", &["Knight"]);
        let source =
            StaticMembership::from_pairs(&[("alice", "Owner"), ("bob", "Squire"), ("carol", "Knight")]);

        run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(guild.roles_of(10), names(&["Owner", "Raider"]));
        assert_eq!(guild.roles_of(11), names(&["Squire"]));
        assert_eq!(guild.roles_of(12), names(&["Knight"]));
    }

    #[test]
    fn lookup_is_case_insensitive_across_rank_config_and_guild() {
        let guild = MemoryGuild::new(1)
            .with_role("KNIGHT")
            .with_member(10, "alice", "alice", &[]);
        let source = StaticMembership::from_pairs(&[("alice", "knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert!(report.roles_created.is_empty(), "existing KNIGHT must be reused");
        assert_eq!(guild.roles_of(10), names(&["KNIGHT"]));
    }

    #[rstest]
    #[case(RoleCasing::Title, "Squire")]
    #[case(RoleCasing::Lower, "squire")]
    #[case(RoleCasing::AsIs, "sQuire")]
    fn casing_mode_shapes_created_role(#[case] casing: RoleCasing, #[case] expected: &str) {
        let guild = MemoryGuild::new(1).with_member(10, "alice", "alice", &[]);
        let source = StaticMembership::from_pairs(&[("alice", "sQuire")]);
        let mut settings = settings();
        settings.casing = casing;

        let report = run(&guild, &source, GUILD, &settings).expect("run");

        assert_eq!(report.roles_created, names(&[expected]));
        assert_eq!(guild.roles_of(10), names(&[expected]));
    }

    #[test]
    fn missing_permission_aborts_before_any_mutation() {
        let guild = MemoryGuild::new(1)
            .without_manage_roles()
            .with_member(10, "alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.outcome, PassOutcome::MissingPermission);
        assert!(guild.mutations().is_empty());
        assert!(report.user_message().contains("Manage Roles"));
    }

    #[test]
    fn unavailable_membership_skips_the_cycle() {
        let guild = MemoryGuild::new(1).with_member(10, "alice", "alice", &["Squire"]);

        let report = run(&guild, &StaticMembership::unavailable(), GUILD, &settings())
            .expect("fetch failure must not surface as an error");

        assert_eq!(report.outcome, PassOutcome::NoMembershipData);
        assert!(guild.mutations().is_empty());
        assert_eq!(guild.roles_of(10), names(&["Squire"]));
    }

    #[test]
    fn unknown_guild_is_reported() {
        let guild = MemoryGuild::new(1);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);
        let err = run(&guild, &source, GuildId(2), &settings()).unwrap_err();
        assert!(matches!(err, SyncError::GuildNotFound(GuildId(2))), "got: {err}");
    }

    #[test]
    fn unmanaged_rank_is_skipped() {
        let guild = MemoryGuild::new(1).with_member(10, "alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Deputy Owner")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.skipped, 1);
        assert!(guild.mutations().is_empty());
    }

    #[test]
    fn missing_role_with_creation_disabled_skips_member() {
        let guild = MemoryGuild::new(1).with_member(10, "alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);
        let mut settings = settings();
        settings.create_missing_roles = false;

        let report = run(&guild, &source, GUILD, &settings).expect("run");

        assert_eq!(report.skipped, 1);
        assert!(guild.mutations().is_empty());
        assert_eq!(guild.roles_of(10), names(&["Squire"]));
    }

    #[test]
    fn stripping_disabled_keeps_previous_managed_roles() {
        let guild = MemoryGuild::new(1)
            .with_role("Knight")
            .with_member(10, "alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);
        let mut settings = settings();
        settings.strip_unassigned_roles = false;

        run(&guild, &source, GUILD, &settings).expect("run");

        assert_eq!(guild.roles_of(10), names(&["Knight", "Squire"]));
    }

    #[test]
    fn display_name_is_tried_before_login_name() {
        let guild = MemoryGuild::new(1).with_member(10, "Lancelot", "lance_42", &[]);
        let source = StaticMembership::from_pairs(&[("lancelot", "Owner"), ("lance_42", "Squire")]);

        run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(guild.roles_of(10), names(&["Owner"]));
    }

    #[test]
    fn failed_removal_still_attempts_add_and_continues() {
        let guild = MemoryGuild::new(1)
            .with_role("Knight")
            .failing_remove_for(10)
            .with_member(10, "alice", "alice", &["Squire"])
            .with_member(11, "bob", "bob", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight"), ("bob", "Knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.failures, 1);
        assert_eq!(report.updated, 2);
        assert_eq!(guild.roles_of(10), names(&["Knight", "Squire"]));
        assert_eq!(guild.roles_of(11), names(&["Knight"]));
    }

    #[test]
    fn failed_add_is_isolated_to_that_member() {
        let guild = MemoryGuild::new(1)
            .with_role("Owner")
            .failing_add_for(10)
            .with_member(10, "alice", "alice", &[])
            .with_member(11, "bob", "bob", &[]);
        let source = StaticMembership::from_pairs(&[("alice", "Owner"), ("bob", "Owner")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.failures, 1);
        assert_eq!(report.updated, 1);
        assert!(guild.roles_of(10).is_empty());
        assert_eq!(guild.roles_of(11), names(&["Owner"]));
    }

    #[test]
    fn failed_role_creation_skips_member_without_partial_changes() {
        let guild = MemoryGuild::new(1)
            .failing_role_creation()
            .with_member(10, "alice", "alice", &["Squire"]);
        let source = StaticMembership::from_pairs(&[("alice", "Knight")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.failures, 1);
        assert_eq!(report.skipped, 1);
        assert!(guild.mutations().is_empty());
        assert_eq!(guild.roles_of(10), names(&["Squire"]));
    }

    #[test]
    fn created_role_is_reused_within_the_pass() {
        let guild = MemoryGuild::new(1)
            .with_member(10, "alice", "alice", &[])
            .with_member(11, "bob", "bob", &[]);
        let source = StaticMembership::from_pairs(&[("alice", "knight"), ("bob", "KNIGHT")]);

        let report = run(&guild, &source, GUILD, &settings()).expect("run");

        assert_eq!(report.roles_created, names(&["Knight"]));
        assert_eq!(guild.role_names(), names(&["Knight"]));
        assert_eq!(report.updated, 2);
    }
}
