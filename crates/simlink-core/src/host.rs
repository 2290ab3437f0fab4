//! Host-side ordering of per-step work.
//!
//! Every endpoint contributes two tick functions per step (pre-update and
//! post-update), every collaborator one. Endpoints declare "my pre-update
//! runs before this collaborator" and "my post-update runs after it" through
//! [`OrderingHost`]; [`TickGraph`] turns the declarations into a
//! deterministic execution order.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::{Error, Result};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

/// Identity of a collaborator object, derived from its allocation.
///
/// Only meaningful while the object is alive; registrations prune dead
/// entries before comparing identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollaboratorId(usize);

impl CollaboratorId {
    #[must_use]
    pub fn of<C: ?Sized>(collaborator: &Rc<RefCell<C>>) -> Self {
        Self(Rc::as_ptr(collaborator).cast::<()>() as usize)
    }
}

/// One schedulable unit of work within a host step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TickId {
    EndpointPre(EndpointId),
    EndpointPost(EndpointId),
    Collaborator(CollaboratorId),
}

/// The ordering-constraint API a host exposes to endpoints.
pub trait OrderingHost {
    /// Require `before` to run before `after` within every step.
    fn declare_ordering(&mut self, before: TickId, after: TickId);

    /// Drop a constraint added with [`declare_ordering`](Self::declare_ordering).
    fn retract_ordering(&mut self, before: TickId, after: TickId);
}

/// Dependency graph of tick functions with a stable topological order.
///
/// Among units that are ready at the same time, the smallest [`TickId`]
/// runs first, so the order never depends on hash state.
#[derive(Debug, Default)]
pub struct TickGraph {
    nodes: BTreeSet<TickId>,
    /// Edge multiplicities; the same constraint may be declared twice.
    edges: BTreeMap<(TickId, TickId), usize>,
}

impl TickGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: TickId) {
        self.nodes.insert(id);
    }

    /// Add both tick functions of an endpoint, pre-update first.
    pub fn add_endpoint(&mut self, id: EndpointId) {
        self.declare_ordering(TickId::EndpointPre(id), TickId::EndpointPost(id));
    }

    /// Remove a unit together with every constraint that mentions it.
    pub fn remove_node(&mut self, id: TickId) {
        self.nodes.remove(&id);
        self.edges.retain(|(a, b), _| *a != id && *b != id);
    }

    pub fn remove_endpoint(&mut self, id: EndpointId) {
        self.remove_node(TickId::EndpointPre(id));
        self.remove_node(TickId::EndpointPost(id));
    }

    #[must_use]
    pub fn contains(&self, id: TickId) -> bool {
        self.nodes.contains(&id)
    }

    #[must_use]
    pub fn has_ordering(&self, before: TickId, after: TickId) -> bool {
        self.edges.contains_key(&(before, after))
    }

    #[must_use]
    pub fn constraint_count(&self) -> usize {
        self.edges.len()
    }

    /// Execution order for one step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderingCycle`] with the units that could not be
    /// placed if the constraints are cyclic.
    pub fn order(&self) -> Result<Vec<TickId>> {
        let mut indegree: BTreeMap<TickId, usize> = self.nodes.iter().map(|&n| (n, 0)).collect();
        let mut successors: BTreeMap<TickId, Vec<TickId>> = BTreeMap::new();
        for &(before, after) in self.edges.keys() {
            *indegree.entry(after).or_default() += 1;
            indegree.entry(before).or_default();
            successors.entry(before).or_default().push(after);
        }

        let mut ready: BTreeSet<TickId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(&n, _)| n)
            .collect();
        let mut order = Vec::with_capacity(indegree.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for succ in successors.get(&next).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(succ) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*succ);
                    }
                }
            }
        }

        if order.len() < indegree.len() {
            let stuck = indegree
                .into_iter()
                .filter(|(n, _)| !order.contains(n))
                .map(|(n, _)| n)
                .collect();
            return Err(Error::OrderingCycle(stuck));
        }
        Ok(order)
    }
}

impl OrderingHost for TickGraph {
    fn declare_ordering(&mut self, before: TickId, after: TickId) {
        trace!("Ordering {before:?} -> {after:?}");
        self.nodes.insert(before);
        self.nodes.insert(after);
        *self.edges.entry((before, after)).or_default() += 1;
    }

    fn retract_ordering(&mut self, before: TickId, after: TickId) {
        trace!("Retracting {before:?} -> {after:?}");
        if let Some(count) = self.edges.get_mut(&(before, after)) {
            *count -= 1;
            if *count == 0 {
                self.edges.remove(&(before, after));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collab(n: usize) -> TickId {
        TickId::Collaborator(CollaboratorId(n))
    }

    #[test]
    fn test_endpoint_pre_runs_before_post() {
        let mut graph = TickGraph::new();
        let ep = EndpointId::next();
        graph.add_endpoint(ep);

        assert_eq!(
            graph.order().unwrap(),
            vec![TickId::EndpointPre(ep), TickId::EndpointPost(ep)]
        );
    }

    #[test]
    fn test_collaborator_sandwiched_between_phases() {
        let mut graph = TickGraph::new();
        let ep = EndpointId::next();
        graph.add_endpoint(ep);
        graph.add_node(collab(7));
        graph.declare_ordering(TickId::EndpointPre(ep), collab(7));
        graph.declare_ordering(collab(7), TickId::EndpointPost(ep));

        assert_eq!(
            graph.order().unwrap(),
            vec![TickId::EndpointPre(ep), collab(7), TickId::EndpointPost(ep)]
        );
    }

    #[test]
    fn test_unconstrained_collaborator_may_run_first() {
        let mut graph = TickGraph::new();
        let ep = EndpointId::next();
        graph.add_endpoint(ep);
        graph.add_node(collab(1));

        let order = graph.order().unwrap();
        assert_eq!(order.len(), 3);
        let pre = order.iter().position(|t| *t == TickId::EndpointPre(ep)).unwrap();
        let post = order.iter().position(|t| *t == TickId::EndpointPost(ep)).unwrap();
        assert!(pre < post);
    }

    #[test]
    fn test_retract_counts_declarations() {
        let mut graph = TickGraph::new();
        graph.declare_ordering(collab(1), collab(2));
        graph.declare_ordering(collab(1), collab(2));

        graph.retract_ordering(collab(1), collab(2));
        assert!(graph.has_ordering(collab(1), collab(2)));

        graph.retract_ordering(collab(1), collab(2));
        assert!(!graph.has_ordering(collab(1), collab(2)));
        assert!(graph.contains(collab(1)));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = TickGraph::new();
        graph.declare_ordering(collab(1), collab(2));
        graph.declare_ordering(collab(2), collab(1));
        graph.add_node(collab(3));

        let Err(Error::OrderingCycle(stuck)) = graph.order() else {
            panic!("expected a cycle");
        };
        assert_eq!(stuck, vec![collab(1), collab(2)]);
    }

    #[test]
    fn test_remove_node_drops_its_edges() {
        let mut graph = TickGraph::new();
        graph.declare_ordering(collab(1), collab(2));
        graph.remove_node(collab(2));

        assert_eq!(graph.constraint_count(), 0);
        assert_eq!(graph.order().unwrap(), vec![collab(1)]);
    }

    #[test]
    fn test_collaborator_id_ignores_unsizing() {
        trait Marker {}
        struct Thing;
        impl Marker for Thing {}

        let concrete = Rc::new(RefCell::new(Thing));
        let erased: Rc<RefCell<dyn Marker>> = concrete.clone();
        assert_eq!(CollaboratorId::of(&concrete), CollaboratorId::of(&erased));
    }
}
