//! Share groups and their created/destroyed partition.
//!
//! Native creation takes a "share with" handle that must belong to an
//! already-created peer. [`ContextShareSet`] keeps every registered context in
//! exactly one of two partitions of its group, `created` or `destroyed`, so a
//! valid peer can be picked without scanning all contexts.

use crate::buffer_size::BufferSizeTracker;
use crate::context::Context;
use common::{GlError, GlResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A context as seen by the share set.
pub trait SharedContext: Clone + Send + Sync {
    type Id: Copy + Ord + Hash + fmt::Debug + Send + Sync;

    fn context_id(&self) -> Self::Id;

    /// Whether the native handle is allocated.
    fn is_created(&self) -> bool;
}

#[derive(Debug)]
struct ShareGroup<C: SharedContext> {
    created: BTreeMap<C::Id, C>,
    destroyed: BTreeMap<C::Id, C>,
}

impl<C: SharedContext> ShareGroup<C> {
    fn new() -> Self {
        Self {
            created: BTreeMap::new(),
            destroyed: BTreeMap::new(),
        }
    }

    fn contains(&self, id: C::Id) -> bool {
        self.created.contains_key(&id) || self.destroyed.contains_key(&id)
    }

    fn insert(&mut self, context: C, created: bool) {
        let id = context.context_id();
        if self.contains(id) {
            return;
        }
        if created {
            self.created.insert(id, context);
        } else {
            self.destroyed.insert(id, context);
        }
    }

    fn members(&self) -> impl Iterator<Item = C::Id> + '_ {
        self.created.keys().chain(self.destroyed.keys()).copied()
    }
}

#[derive(Debug)]
struct ShareSetState<C: SharedContext> {
    next_group: u64,
    groups: HashMap<u64, ShareGroup<C>>,
    membership: HashMap<C::Id, u64>,
}

impl<C: SharedContext> ShareSetState<C> {
    fn group_of(&self, id: C::Id) -> Option<&ShareGroup<C>> {
        self.membership.get(&id).and_then(|group| self.groups.get(group))
    }
}

/// Process-wide map from context to share group.
pub struct ContextShareSet<C: SharedContext> {
    state: Mutex<ShareSetState<C>>,
    /// Panic on invariant violations instead of only returning them.
    strict: bool,
}

impl<C: SharedContext> Default for ContextShareSet<C> {
    fn default() -> Self {
        Self {
            state: Mutex::new(ShareSetState {
                next_group: 0,
                groups: HashMap::new(),
                membership: HashMap::new(),
            }),
            strict: cfg!(all(debug_assertions, not(test))),
        }
    }
}

impl<C: SharedContext> fmt::Debug for ContextShareSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ContextShareSet")
            .field("groups", &state.groups.len())
            .field("contexts", &state.membership.len())
            .finish()
    }
}

impl<C: SharedContext> ContextShareSet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether invariant violations panic. On by default in debug builds.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Put `a` and `b` into one group, merging existing groups.
    ///
    /// New members land in the partition matching their current creation state.
    pub fn register_sharing(&self, a: &C, b: &C) {
        let (a_created, b_created) = (a.is_created(), b.is_created());
        let (a_id, b_id) = (a.context_id(), b.context_id());
        let mut state = self.state.lock();

        let group = match (state.membership.get(&a_id).copied(), state.membership.get(&b_id).copied()) {
            (Some(ga), Some(gb)) if ga == gb => ga,
            (Some(ga), Some(gb)) => {
                let absorbed = state.groups.remove(&gb).unwrap_or_else(ShareGroup::new);
                for id in absorbed.members() {
                    state.membership.insert(id, ga);
                }
                if let Some(target) = state.groups.get_mut(&ga) {
                    target.created.extend(absorbed.created);
                    target.destroyed.extend(absorbed.destroyed);
                }
                tracing::debug!(into = ga, from = gb, "merged share groups");
                ga
            }
            (Some(group), None) | (None, Some(group)) => group,
            (None, None) => {
                state.next_group += 1;
                let group = state.next_group;
                state.groups.insert(group, ShareGroup::new());
                group
            }
        };

        state.membership.insert(a_id, group);
        state.membership.insert(b_id, group);
        if let Some(target) = state.groups.get_mut(&group) {
            target.insert(a.clone(), a_created);
            target.insert(b.clone(), b_created);
        }
        tracing::debug!(a = ?a_id, b = ?b_id, group, "registered sharing");
    }

    /// Move `context` from destroyed to created.
    ///
    /// Returns `Ok(false)` for contexts that share with nobody.
    pub fn context_created(&self, context: &C) -> GlResult<bool> {
        self.transfer(context, true)
    }

    /// Move `context` from created to destroyed.
    pub fn context_destroyed(&self, context: &C) -> GlResult<bool> {
        self.transfer(context, false)
    }

    fn transfer(&self, context: &C, to_created: bool) -> GlResult<bool> {
        let id = context.context_id();
        let mut state = self.state.lock();
        let Some(&group_id) = state.membership.get(&id) else {
            return Ok(false);
        };
        let Some(group) = state.groups.get_mut(&group_id) else {
            return Err(self.inconsistent(format!("{:?} maps to missing group {}", id, group_id)));
        };

        let (from, to) = if to_created {
            (&mut group.destroyed, &mut group.created)
        } else {
            (&mut group.created, &mut group.destroyed)
        };
        let Some(member) = from.remove(&id) else {
            return Err(self.inconsistent(format!(
                "{:?} is not in the {} partition",
                id,
                if to_created { "destroyed" } else { "created" }
            )));
        };
        if to.insert(id, member).is_some() {
            return Err(self.inconsistent(format!("{:?} was in both partitions", id)));
        }
        tracing::trace!(context = ?id, created = to_created, "share partition updated");
        Ok(true)
    }

    fn inconsistent(&self, message: String) -> GlError {
        tracing::error!(%message, "share set invariant violated");
        if self.strict {
            panic!("share set invariant violated: {message}");
        }
        GlError::inconsistent(message)
    }

    /// Remove the whole group of `last`, which must have no created members.
    pub fn unregister_sharing(&self, last: &C) -> GlResult<()> {
        let id = last.context_id();
        let mut state = self.state.lock();
        let Some(&group_id) = state.membership.get(&id) else {
            return Err(GlError::unknown_context(format!("{:?} is not registered for sharing", id)));
        };
        let Some(group) = state.groups.get(&group_id) else {
            return Err(self.inconsistent(format!("{:?} maps to missing group {}", id, group_id)));
        };
        if !group.created.is_empty() {
            return Err(GlError::leak(format!(
                "{} context(s) still created in the share group of {:?}: {:?}",
                group.created.len(),
                id,
                group.created.keys().collect::<Vec<_>>()
            )));
        }
        if group.destroyed.is_empty() {
            return Err(self.inconsistent(format!("share group of {:?} is empty", id)));
        }

        let members: Vec<C::Id> = group.members().collect();
        for member in &members {
            state.membership.remove(member);
        }
        state.groups.remove(&group_id);
        tracing::debug!(context = ?id, members = members.len(), "unregistered share group");
        Ok(())
    }

    /// An already-created peer of `context` to pass as the native share handle.
    pub fn share_context_for(&self, context: &C) -> Option<C> {
        let id = context.context_id();
        let state = self.state.lock();
        let group = state.group_of(id)?;
        group
            .created
            .iter()
            .find(|(member, _)| **member != id)
            .map(|(_, peer)| peer.clone())
    }

    pub fn is_shared(&self, context: &C) -> bool {
        self.state.lock().membership.contains_key(&context.context_id())
    }

    /// Whether any other member of the group is still created.
    pub fn has_created_shared_left(&self, context: &C) -> bool {
        let id = context.context_id();
        let state = self.state.lock();
        state
            .group_of(id)
            .is_some_and(|group| group.created.keys().any(|member| *member != id))
    }

    /// Created members of the group, excluding `context`.
    pub fn created_shares(&self, context: &C) -> Vec<C> {
        self.partition_of(context, true)
    }

    /// Destroyed members of the group, excluding `context`.
    pub fn destroyed_shares(&self, context: &C) -> Vec<C> {
        self.partition_of(context, false)
    }

    fn partition_of(&self, context: &C, created: bool) -> Vec<C> {
        let id = context.context_id();
        let state = self.state.lock();
        let Some(group) = state.group_of(id) else {
            return Vec::new();
        };
        let partition = if created { &group.created } else { &group.destroyed };
        partition
            .iter()
            .filter(|(member, _)| **member != id)
            .map(|(_, peer)| peer.clone())
            .collect()
    }

    /// Number of registered contexts across all groups.
    pub fn len(&self) -> usize {
        self.state.lock().membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every group.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.groups.clear();
        state.membership.clear();
    }
}


/// Give `newer` the buffer size tracker of its share group.
///
/// Buffer names are only unique within a share group, so `newer` adopts
/// `older`'s tracker; without an older peer it gets a fresh one.
pub fn synchronize_buffer_object_sharing(older: Option<&Context>, newer: &Context) {
    let tracker = older
        .and_then(Context::buffer_size_tracker)
        .unwrap_or_else(|| Arc::new(BufferSizeTracker::new()));
    newer.set_buffer_size_tracker(Some(tracker));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone, Debug)]
    struct Member {
        id: u32,
        created: Arc<AtomicBool>,
    }

    impl Member {
        fn new(id: u32) -> Self {
            Self {
                id,
                created: Arc::new(AtomicBool::new(false)),
            }
        }

        fn set_created(&self, created: bool) {
            self.created.store(created, Ordering::SeqCst);
        }
    }

    impl SharedContext for Member {
        type Id = u32;

        fn context_id(&self) -> u32 {
            self.id
        }

        fn is_created(&self) -> bool {
            self.created.load(Ordering::SeqCst)
        }
    }

    fn ids(members: Vec<Member>) -> Vec<u32> {
        members.into_iter().map(|m| m.id).collect()
    }

    fn create(set: &ContextShareSet<Member>, member: &Member) {
        member.set_created(true);
        assert!(set.context_created(member).unwrap());
    }

    fn destroy(set: &ContextShareSet<Member>, member: &Member) {
        member.set_created(false);
        assert!(set.context_destroyed(member).unwrap());
    }

    #[test]
    fn test_share_lifecycle_end_to_end() {
        let set = ContextShareSet::new();
        let a = Member::new(5);
        let b = Member::new(6);

        set.register_sharing(&a, &b);
        assert!(set.share_context_for(&b).is_none());

        create(&set, &a);
        assert_eq!(set.share_context_for(&b).map(|m| m.id), Some(5));
        assert!(set.share_context_for(&a).is_none());

        create(&set, &b);
        assert_eq!(set.share_context_for(&a).map(|m| m.id), Some(6));

        destroy(&set, &a);
        assert!(matches!(set.unregister_sharing(&b), Err(GlError::ShareSetLeak(_))));
        destroy(&set, &b);

        set.unregister_sharing(&b).unwrap();
        assert!(!set.is_shared(&a));
        assert!(!set.is_shared(&b));
        assert!(matches!(set.unregister_sharing(&b), Err(GlError::UnknownContext(_))));
    }

    #[test]
    fn test_register_places_created_members() {
        let set = ContextShareSet::new();
        let a = Member::new(1);
        let b = Member::new(2);
        a.set_created(true);

        set.register_sharing(&a, &b);
        assert_eq!(ids(set.created_shares(&b)), vec![1]);
        assert_eq!(ids(set.destroyed_shares(&a)), vec![2]);
        assert!(set.has_created_shared_left(&b));
        assert!(!set.has_created_shared_left(&a));
    }

    #[test]
    fn test_double_create_is_inconsistent() {
        let set = ContextShareSet::new();
        let a = Member::new(1);
        let b = Member::new(2);
        set.register_sharing(&a, &b);

        create(&set, &a);
        assert!(matches!(set.context_created(&a), Err(GlError::ShareSetInconsistent(_))));
        assert!(matches!(set.context_destroyed(&b), Err(GlError::ShareSetInconsistent(_))));
    }

    #[test]
    #[should_panic(expected = "share set invariant violated")]
    fn test_strict_set_panics_on_double_create() {
        let set = ContextShareSet::new().with_strict(true);
        assert!(set.is_strict());
        let a = Member::new(1);
        let b = Member::new(2);
        set.register_sharing(&a, &b);

        create(&set, &a);
        let _ = set.context_created(&a);
    }

    #[test]
    fn test_unshared_context_is_ignored() {
        let set = ContextShareSet::new();
        let lone = Member::new(9);
        assert!(!set.context_created(&lone).unwrap());
        assert!(!set.is_shared(&lone));
        assert!(set.created_shares(&lone).is_empty());
    }

    #[test]
    fn test_merge_groups() {
        let set = ContextShareSet::new();
        let members: Vec<Member> = (1..=4).map(Member::new).collect();
        set.register_sharing(&members[0], &members[1]);
        set.register_sharing(&members[2], &members[3]);
        set.register_sharing(&members[1], &members[2]);

        assert_eq!(ids(set.destroyed_shares(&members[0])), vec![2, 3, 4]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_partition_invariant_under_random_transitions() {
        let set = ContextShareSet::new();
        let members: Vec<Member> = (0..6).map(Member::new).collect();
        for pair in members.windows(2) {
            set.register_sharing(&pair[0], &pair[1]);
        }

        // Deterministic pseudo-random walk over create/destroy.
        let mut seed = 0x2545_f491_u32;
        for _ in 0..200 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let member = &members[(seed % 6) as usize];
            if member.is_created() {
                destroy(&set, member);
            } else {
                create(&set, member);
            }

            let created = set.created_shares(member).len() + usize::from(member.is_created());
            let destroyed = set.destroyed_shares(member).len() + usize::from(!member.is_created());
            assert_eq!(created + destroyed, members.len());
            let live = members.iter().filter(|m| m.is_created()).count();
            assert_eq!(created, live);
        }
    }
}
