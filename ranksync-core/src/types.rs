//! Domain types shared by the reconciler, the remote clients and the daemon.
//!
//! Every value here is a per-pass snapshot; nothing is persisted.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric guild identifier (Discord snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(pub u64);

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for GuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque handle of a guild member, used to address mutation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque role handle owned by the guild directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for RoleId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Numeric group identifier on the membership source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for GroupId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// One external member and the rank assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Lowercased username.
    pub identity: String,
    pub rank: String,
}

impl MembershipRecord {
    pub fn new(identity: &str, rank: impl Into<String>) -> Self {
        Self {
            identity: identity.to_lowercase(),
            rank: rank.into(),
        }
    }
}

/// Lowercase identity → rank, one entry per known external member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipMap(HashMap<String, String>);

impl MembershipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record; a later record for the same identity wins.
    pub fn insert(&mut self, record: MembershipRecord) {
        self.0.insert(record.identity, record.rank);
    }

    /// Looks up a rank by identity, ignoring case.
    pub fn rank_of(&self, identity: &str) -> Option<&str> {
        self.0.get(&identity.to_lowercase()).map(String::as_str)
    }

    /// Resolves a guild member by display name first, then login name.
    pub fn rank_for(&self, member: &GuildMember) -> Option<&str> {
        self.rank_of(&member.display_name)
            .or_else(|| self.rank_of(&member.login_name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<MembershipRecord> for MembershipMap {
    fn from_iter<I: IntoIterator<Item = MembershipRecord>>(iter: I) -> Self {
        let mut map = Self::new();
        for record in iter {
            map.insert(record);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// Managed roles
// ---------------------------------------------------------------------------

/// Role names this system may create, assign and strip.
///
/// Names are matched case-insensitively; the configured spelling is kept for
/// display only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedRoleSet {
    folded: BTreeSet<String>,
    names: Vec<String>,
}

impl ManagedRoleSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if set.folded.insert(name.to_lowercase()) {
                set.names.push(name.to_string());
            }
        }
        set
    }

    pub fn contains(&self, name: &str) -> bool {
        self.folded.contains(&name.to_lowercase())
    }

    /// Configured spellings, in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Role casing
// ---------------------------------------------------------------------------

/// How a rank string is spelled when a missing role gets created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleCasing {
    Lower,
    Title,
    /// Rank string used verbatim. Also what an unset or unknown mode means.
    #[default]
    #[serde(rename = "as-is")]
    AsIs,
}

impl RoleCasing {
    /// Unknown or empty values fall back to [`RoleCasing::AsIs`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "lower" => Self::Lower,
            "title" => Self::Title,
            _ => Self::AsIs,
        }
    }

    pub fn apply(self, rank: &str) -> String {
        match self {
            Self::Lower => rank.to_lowercase(),
            Self::Title => title_case(rank),
            Self::AsIs => rank.to_string(),
        }
    }
}

impl fmt::Display for RoleCasing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleCasing::Lower => write!(f, "lower"),
            RoleCasing::Title => write!(f, "title"),
            RoleCasing::AsIs => write!(f, "as-is"),
        }
    }
}

/// Uppercases the first letter of every alphabetic run and lowercases the rest.
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_word = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Guild snapshot
// ---------------------------------------------------------------------------

/// A role as the guild directory reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: RoleId,
    pub name: String,
}

impl RoleRef {
    pub fn new(id: impl Into<RoleId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A guild member as read at sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    pub id: UserId,
    pub display_name: String,
    pub login_name: String,
    #[serde(default)]
    pub current_roles: Vec<RoleRef>,
}

impl GuildMember {
    pub fn has_role(&self, role: &RoleId) -> bool {
        self.current_roles.iter().any(|r| r.id == *role)
    }
}

/// One live read of a guild: members, roles and the acting identity's rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub id: GuildId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<GuildMember>,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    /// Whether the acting identity may create and assign roles.
    pub can_manage_roles: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
