//! Scope resolution: turn a viewer's context into a canonical visibility filter.
//!
//! A [`Scope`] is an immutable value object. Two scopes are equal iff their
//! fields are equal, and resolution is canonical (ordered, deduplicated
//! owner set), so equal logical contexts always share one subscription.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::model::{SpaceId, TaskRecord, UserId};

/// Personal/shared toggle of a viewer context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    /// Records owned by the viewer (and any watched owners).
    #[default]
    Personal,
    /// Records shared with everyone in the current space.
    Shared,
}

/// What the surrounding application knows about the current view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeContext {
    pub user_id: UserId,
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    /// Additional owners to follow, e.g. subscribed team members.
    #[serde(default)]
    pub watched_owner_ids: Vec<UserId>,
    #[serde(default)]
    pub sharing: SharingMode,
}

impl ScopeContext {
    pub fn personal(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            space_id: None,
            watched_owner_ids: Vec::new(),
            sharing: SharingMode::Personal,
        }
    }

    #[must_use]
    pub fn in_space(mut self, space_id: impl Into<SpaceId>) -> Self {
        self.space_id = Some(space_id.into());
        self
    }

    #[must_use]
    pub const fn shared(mut self) -> Self {
        self.sharing = SharingMode::Shared;
        self
    }

    #[must_use]
    pub fn watching(mut self, owners: impl IntoIterator<Item = impl Into<UserId>>) -> Self {
        self.watched_owner_ids
            .extend(owners.into_iter().map(Into::into));
        self
    }

    /// Resolve to a canonical [`Scope`]. Never fails: invalid contexts
    /// degrade to watching only the current user.
    #[must_use]
    pub fn resolve(&self) -> Scope {
        Scope::resolve(self)
    }
}

/// Canonical visibility filter over the record collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    watched_owner_ids: BTreeSet<UserId>,
    space_id: Option<SpaceId>,
    shared_only: bool,
}

/// The filter handed to the remote `read` / `subscribe` calls.
pub type ScopeFilter = Scope;

impl Scope {
    /// Resolve a context descriptor into a scope.
    #[must_use]
    pub fn resolve(ctx: &ScopeContext) -> Self {
        let mut watched = BTreeSet::new();
        if !ctx.user_id.is_empty() {
            watched.insert(normalize_id(&ctx.user_id));
        }

        let space_id = ctx
            .space_id
            .as_ref()
            .filter(|space| !space.is_empty())
            .map(|space| SpaceId::new(space.as_str().trim()));

        if ctx.sharing == SharingMode::Shared && space_id.is_none() {
            tracing::debug!(user = %ctx.user_id, "shared view without a space, watching self only");
            return Self {
                watched_owner_ids: watched,
                space_id: None,
                shared_only: false,
            };
        }

        if !watched.is_empty() {
            watched.extend(
                ctx.watched_owner_ids
                    .iter()
                    .filter(|owner| !owner.is_empty())
                    .map(normalize_id),
            );
        }

        Self {
            watched_owner_ids: watched,
            space_id,
            shared_only: ctx.sharing == SharingMode::Shared,
        }
    }

    #[must_use]
    pub const fn watched_owner_ids(&self) -> &BTreeSet<UserId> {
        &self.watched_owner_ids
    }

    #[must_use]
    pub const fn space_id(&self) -> Option<&SpaceId> {
        self.space_id.as_ref()
    }

    #[must_use]
    pub const fn shared_only(&self) -> bool {
        self.shared_only
    }

    /// The remote-facing filter for this scope.
    #[must_use]
    pub fn filter(&self) -> Self {
        self.clone()
    }

    /// Whether `record` is attributed to this scope.
    #[must_use]
    pub fn matches(&self, record: &TaskRecord) -> bool {
        if let Some(space) = &self.space_id
            && record.space_id.as_ref() != Some(space)
        {
            return false;
        }

        if self.shared_only {
            if !record.is_space_shared() {
                return false;
            }
            // Inside a space, shared records are visible to every member.
            return self.space_id.is_some() || self.watched_owner_ids.contains(&record.owner_id);
        }

        self.watched_owner_ids.contains(&record.owner_id)
    }
}

fn normalize_id(id: &UserId) -> UserId {
    UserId::new(id.as_str().trim())
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owners: Vec<&str> = self.watched_owner_ids.iter().map(UserId::as_str).collect();
        write!(f, "owners=[{}]", owners.join(","))?;
        if let Some(space) = &self.space_id {
            write!(f, " space={space}")?;
        }
        if self.shared_only {
            f.write_str(" shared")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, RecordId};
    use chrono::{TimeZone, Utc};

    fn task(owner: &str, space: Option<&str>, shared: bool) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut new = NewTask::new("t", owner);
        if let Some(space) = space {
            new = new.in_space(space, shared);
        }
        new.to_record(RecordId::new("t-1"), at)
    }

    #[test]
    fn equal_contexts_resolve_to_equal_scopes() {
        let a = ScopeContext::personal("alice").watching(["carol", "bob", "carol"]);
        let b = ScopeContext::personal("alice").watching(["bob", "carol", "alice"]);
        assert_eq!(a.resolve(), b.resolve());
        assert_eq!(a.resolve().watched_owner_ids().len(), 3);
    }

    #[test]
    fn self_is_always_watched() {
        let scope = ScopeContext::personal("alice").watching(["bob"]).resolve();
        assert!(scope.watched_owner_ids().contains(&UserId::new("alice")));
    }

    #[test]
    fn blank_extra_owners_are_dropped() {
        let scope = ScopeContext::personal("alice").watching(["", "  "]).resolve();
        assert_eq!(scope, ScopeContext::personal("alice").resolve());
    }

    #[test]
    fn shared_without_space_degrades_to_self() {
        let scope = ScopeContext::personal("alice")
            .watching(["bob"])
            .shared()
            .resolve();
        assert!(!scope.shared_only());
        assert!(scope.space_id().is_none());
        assert_eq!(scope.watched_owner_ids().len(), 1);
    }

    #[test]
    fn empty_user_matches_nothing_personal() {
        let scope = ScopeContext::personal("").watching(["bob"]).resolve();
        assert!(scope.watched_owner_ids().is_empty());
        assert!(!scope.matches(&task("bob", None, false)));
    }

    #[test]
    fn personal_scope_matches_watched_owners_everywhere() {
        let scope = ScopeContext::personal("alice").watching(["bob"]).resolve();
        assert!(scope.matches(&task("alice", None, false)));
        assert!(scope.matches(&task("bob", Some("s1"), true)));
        assert!(!scope.matches(&task("carol", None, false)));
    }

    #[test]
    fn space_scope_requires_the_space() {
        let scope = ScopeContext::personal("alice").in_space("s1").resolve();
        assert!(scope.matches(&task("alice", Some("s1"), false)));
        assert!(!scope.matches(&task("alice", Some("s2"), false)));
        assert!(!scope.matches(&task("alice", None, false)));
    }

    #[test]
    fn shared_space_scope_admits_any_owner() {
        let scope = ScopeContext::personal("alice").in_space("s1").shared().resolve();
        assert!(scope.matches(&task("dave", Some("s1"), true)));
        assert!(!scope.matches(&task("alice", Some("s1"), false)));
        assert!(!scope.matches(&task("dave", Some("s2"), true)));
    }

    #[test]
    fn display_is_compact() {
        let scope = ScopeContext::personal("alice")
            .watching(["bob"])
            .in_space("s1")
            .shared()
            .resolve();
        assert_eq!(scope.to_string(), "owners=[alice,bob] space=s1 shared");
    }
}
