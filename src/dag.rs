//! The model graph and its touch/keep/restore protocol.
//!
//! Nodes live in an arena owned by [`Dag`] and are addressed by [`NodeId`].
//! Parent and child ids are plain indices: they never own anything, so a
//! node can be shared by any number of children without lifetime games.
//!
//! A proposal is a small transaction. `touch` snapshots the perturbed node
//! and invalidates everything that depends on it, `keep` commits the
//! recomputed state and `restore` puts the snapshots back.

use crate::constant::ConstantNode;
use crate::deterministic::{DeterministicNode, FnFunction, Function};
use crate::distributions::{LogLikelihood, Sampleable};
use crate::error::{DagError, Result};
use crate::node::{DagNode, NodeKind};
use crate::params::{Args, Dirty, Params};
use crate::stochastic::{Family, StochasticNode};
use crate::value::Value;
use rand_pcg::Pcg64;
use std::{fmt::Debug, marker::PhantomData, sync::Arc};
use tinyset::Set64;

pub type NodeId = u32;
pub type NodeSet = Set64<u32>;
pub type IndexSet = Set64<usize>;

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef<A>(pub NodeId, PhantomData<A>);
impl<A> NodeRef<A> {
    pub fn new(x: NodeId) -> Self {
        Self(x, PhantomData)
    }
    pub fn id(&self) -> NodeId {
        self.0
    }
}
impl<A> Clone for NodeRef<A> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<A> Copy for NodeRef<A> {}
impl<A> Debug for NodeRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeRef").field(&self.0).finish()
    }
}
impl<A> From<NodeRef<A>> for NodeId {
    fn from(r: NodeRef<A>) -> Self {
        r.0
    }
}

#[derive(Clone)]
pub(crate) struct Slot {
    pub(crate) name: String,
    pub(crate) parents: NodeSet,
    pub(crate) children: NodeSet,
    pub(crate) touched_elements: IndexSet,
    // set when the node was touched as a whole; element indices are ignored
    pub(crate) whole: bool,
    // None only while the payload is being refreshed
    pub(crate) node: Option<Box<dyn DagNode>>,
}

impl Slot {
    fn new(name: String, node: Box<dyn DagNode>) -> Self {
        Self {
            name,
            parents: NodeSet::new(),
            children: NodeSet::new(),
            touched_elements: IndexSet::new(),
            whole: false,
            node: Some(node),
        }
    }

    fn clear_touched(&mut self) {
        self.touched_elements = IndexSet::new();
        self.whole = false;
    }
}

#[derive(Clone, Default)]
pub struct Dag {
    pub(crate) slots: Vec<Option<Slot>>,
}

impl Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag").field("nodes", &self.len()).finish()
    }
}

impl Dag {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: impl Into<NodeId>) -> bool {
        self.slot(id.into()).is_ok()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as NodeId)
    }

    pub(crate) fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id as usize)
            .and_then(|s| s.as_ref())
            .ok_or(DagError::NodeNotFound(id))
    }

    pub(crate) fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id as usize)
            .and_then(|s| s.as_mut())
            .ok_or(DagError::NodeNotFound(id))
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&dyn DagNode> {
        // a missing payload means the node is its own ancestor
        self.slot(id)?.node.as_deref().ok_or(DagError::Cycle(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Box<dyn DagNode>> {
        self.slot_mut(id)?.node.as_mut().ok_or(DagError::Cycle(id))
    }

    pub(crate) fn insert(&mut self, slot: Slot) -> NodeId {
        let id = self.slots.len() as NodeId;
        for p in slot.parents.iter() {
            if let Some(Some(parent)) = self.slots.get_mut(p as usize) {
                parent.children.insert(id);
            }
        }
        self.slots.push(Some(slot));
        id
    }

    fn add_node(&mut self, name: &str, params: &Params, node: Box<dyn DagNode>) -> NodeId {
        let mut slot = Slot::new(name.to_string(), node);
        for p in params.nodes() {
            slot.parents.insert(p);
        }
        let id = self.insert(slot);
        log::debug!("new node {} ({})", id, name);
        id
    }

    fn refresh_params(&mut self, params: &Params) -> Result<()> {
        for p in params.nodes() {
            self.refresh(p)?;
        }
        Ok(())
    }

    // --- construction ---

    pub fn constant<A: Value>(&mut self, name: &str, value: A) -> NodeRef<A> {
        let id = self.add_node(name, &Params::new(), Box::new(ConstantNode::new(value)));
        NodeRef::new(id)
    }

    pub fn deterministic<A, F>(&mut self, name: &str, params: Params, f: F) -> Result<NodeRef<A>>
    where
        A: Value,
        F: Fn(&Args<'_>) -> Result<A> + Send + Sync + 'static,
    {
        self.deterministic_with(name, params, FnFunction(f))
    }

    pub fn deterministic_with<A: Value>(
        &mut self,
        name: &str,
        params: Params,
        function: impl Function<A> + 'static,
    ) -> Result<NodeRef<A>> {
        self.refresh_params(&params)?;
        let function: Arc<dyn Function<A>> = Arc::new(function);
        let next = self.slots.len() as NodeId;
        let value = function.compute(&Args::new(self, next, &params))?;
        let node = DeterministicNode::new(value, params.clone(), function);
        let id = self.add_node(name, &params, Box::new(node));
        Ok(NodeRef::new(id))
    }

    /// A stochastic node whose initial value is drawn from its distribution.
    pub fn stochastic<A, F>(
        &mut self,
        name: &str,
        params: Params,
        family: F,
        g: &mut Pcg64,
    ) -> Result<NodeRef<A>>
    where
        A: Value,
        F: Fn(&Args<'_>) -> Result<Box<dyn Sampleable<A>>> + Send + Sync + 'static,
    {
        self.refresh_params(&params)?;
        let family: Family<A> = Arc::new(family);
        let next = self.slots.len() as NodeId;
        let (value, ll) = family(&Args::new(self, next, &params))?.sample(g);
        let node = StochasticNode::new(value, ll, false, params.clone(), family);
        let id = self.add_node(name, &params, Box::new(node));
        Ok(NodeRef::new(id))
    }

    /// A stochastic node clamped to observed data.
    pub fn observed<A, F>(
        &mut self,
        name: &str,
        params: Params,
        family: F,
        value: A,
    ) -> Result<NodeRef<A>>
    where
        A: Value,
        F: Fn(&Args<'_>) -> Result<Box<dyn Sampleable<A>>> + Send + Sync + 'static,
    {
        self.refresh_params(&params)?;
        let family: Family<A> = Arc::new(family);
        let next = self.slots.len() as NodeId;
        let ll = family(&Args::new(self, next, &params))?.log_density(&value);
        let node = StochasticNode::new(value, ll, true, params.clone(), family);
        let id = self.add_node(name, &params, Box::new(node));
        Ok(NodeRef::new(id))
    }

    // --- node attributes ---

    pub fn name(&self, id: impl Into<NodeId>) -> Result<&str> {
        Ok(&self.slot(id.into())?.name)
    }

    pub fn set_name(&mut self, id: impl Into<NodeId>, name: &str) -> Result<()> {
        self.slot_mut(id.into())?.name = name.to_string();
        Ok(())
    }

    pub fn parents(&self, id: impl Into<NodeId>) -> Result<&NodeSet> {
        Ok(&self.slot(id.into())?.parents)
    }

    pub fn children(&self, id: impl Into<NodeId>) -> Result<&NodeSet> {
        Ok(&self.slot(id.into())?.children)
    }

    pub fn number_of_children(&self, id: impl Into<NodeId>) -> Result<usize> {
        Ok(self.slot(id.into())?.children.len())
    }

    pub fn first_child(&self, id: impl Into<NodeId>) -> Result<Option<NodeId>> {
        Ok(self.slot(id.into())?.children.iter().min())
    }

    pub fn params(&self, id: impl Into<NodeId>) -> Result<Option<&Params>> {
        Ok(self.node(id.into())?.params())
    }

    /// Element indices touched in the current cycle; empty means all of them.
    pub fn touched_elements(&self, id: impl Into<NodeId>) -> Result<&IndexSet> {
        Ok(&self.slot(id.into())?.touched_elements)
    }

    pub fn kind(&self, id: impl Into<NodeId>) -> Result<NodeKind> {
        Ok(self.node(id.into())?.kind())
    }

    pub fn is_constant(&self, id: impl Into<NodeId>) -> Result<bool> {
        Ok(self.kind(id)? == NodeKind::Constant)
    }

    pub fn is_stochastic(&self, id: impl Into<NodeId>) -> Result<bool> {
        Ok(self.kind(id)? == NodeKind::Stochastic)
    }

    pub fn is_clamped(&self, id: impl Into<NodeId>) -> Result<bool> {
        Ok(self.node(id.into())?.is_clamped())
    }

    pub fn is_touched(&self, id: impl Into<NodeId>) -> Result<bool> {
        Ok(self.node(id.into())?.is_touched())
    }

    /// Holds a stale value or log-probability that the next read recomputes.
    pub fn is_dirty(&self, id: impl Into<NodeId>) -> Result<bool> {
        Ok(self.node(id.into())?.needs_update())
    }

    pub fn type_name(&self, id: impl Into<NodeId>) -> Result<&'static str> {
        Ok(self.node(id.into())?.type_name())
    }

    pub fn stochastic_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids()
            .filter(|&id| matches!(self.node(id).map(|n| n.kind()), Ok(NodeKind::Stochastic)))
    }

    pub(crate) fn dirty_elements(&self, id: NodeId) -> Result<Dirty> {
        let slot = self.slot(id)?;
        let node = slot.node.as_deref().ok_or(DagError::Cycle(id))?;
        if !node.is_touched() && !node.needs_update() {
            Ok(Dirty::Clean)
        } else if slot.whole || slot.touched_elements.len() == 0 {
            Ok(Dirty::All)
        } else {
            let mut indices: Vec<usize> = slot.touched_elements.iter().collect();
            indices.sort_unstable();
            Ok(Dirty::Elements(indices))
        }
    }

    // --- values ---

    /// The cached value, without recomputing.
    pub(crate) fn value_ref<A: Value>(&self, id: NodeId) -> Result<&A> {
        let node = self.node(id)?;
        node.value_any()
            .downcast_ref::<A>()
            .ok_or(DagError::TypeMismatch {
                node: id,
                expected: std::any::type_name::<A>(),
                found: node.type_name(),
            })
    }

    /// Brings a node and every stale ancestor up to date.
    pub(crate) fn refresh(&mut self, id: NodeId) -> Result<()> {
        for n in self.stale_ancestry(id)? {
            self.refresh_one(n)?;
        }
        Ok(())
    }

    /// `id` and the stale ancestors it reads from, parents before children.
    fn stale_ancestry(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        if !self.node(id)?.needs_update() {
            return Ok(order);
        }
        let mut done = NodeSet::new();
        // (node, parents already pushed)
        let mut stack = vec![(id, false)];
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                order.push(n);
                continue;
            }
            if !done.insert(n) {
                continue;
            }
            stack.push((n, true));
            for p in self.slot(n)?.parents.iter() {
                if !done.contains(p) && self.node(p)?.needs_update() {
                    stack.push((p, false));
                }
            }
        }
        Ok(order)
    }

    fn refresh_one(&mut self, id: NodeId) -> Result<()> {
        if !self.node(id)?.needs_update() {
            return Ok(());
        }
        let mut node = self.slot_mut(id)?.node.take().ok_or(DagError::Cycle(id))?;
        let changed = node.refresh(self, id);
        let slot = self.slot_mut(id)?;
        slot.node = Some(node);
        match changed? {
            Dirty::Clean => {}
            Dirty::All => {
                slot.whole = true;
                slot.touched_elements = IndexSet::new();
            }
            Dirty::Elements(indices) if !slot.whole => {
                for i in indices {
                    slot.touched_elements.insert(i);
                }
            }
            Dirty::Elements(_) => {}
        }
        log::trace!("refreshed node {} ({})", id, slot.name);
        Ok(())
    }

    /// The current value, recomputing it first if it is stale.
    pub fn value<A: Value>(&mut self, r: NodeRef<A>) -> Result<&A> {
        self.refresh(r.0)?;
        self.value_ref(r.0)
    }

    /// Assigns a constant or an unclamped stochastic node, touching it first.
    pub fn set_value<A: Value>(&mut self, r: NodeRef<A>, value: A) -> Result<()> {
        self.check_assignable(r.0)?;
        self.value_ref::<A>(r.0)?;
        self.touch(r)?;
        *self.value_mut(r)? = value;
        Ok(())
    }

    /// Assigns one element of a vector-valued node, touching only that element.
    pub fn set_element<T: Value>(&mut self, r: NodeRef<Vec<T>>, index: usize, x: T) -> Result<()> {
        self.check_assignable(r.0)?;
        let len = self.value_ref::<Vec<T>>(r.0)?.len();
        if index >= len {
            return Err(DagError::structural(
                r.0,
                format!("element {} out of range for length {}", index, len),
            ));
        }
        self.touch_elements(r, &[index])?;
        self.value_mut(r)?[index] = x;
        Ok(())
    }

    fn check_assignable(&self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        match node.kind() {
            NodeKind::Deterministic => Err(DagError::structural(
                id,
                "deterministic nodes are computed from their parents",
            )),
            NodeKind::Stochastic if node.is_clamped() => {
                Err(DagError::structural(id, "node is clamped to observed data"))
            }
            _ => Ok(()),
        }
    }

    fn value_mut<A: Value>(&mut self, r: NodeRef<A>) -> Result<&mut A> {
        let node = self.node_mut(r.0)?;
        let found = node.type_name();
        let mismatch = DagError::TypeMismatch {
            node: r.0,
            expected: std::any::type_name::<A>(),
            found,
        };
        let any = node.as_any_mut();
        if any.is::<ConstantNode<A>>() {
            any.downcast_mut::<ConstantNode<A>>()
                .map(|n| n.value_mut())
                .ok_or(mismatch)
        } else {
            any.downcast_mut::<StochasticNode<A>>()
                .map(|n| n.value_mut())
                .ok_or(mismatch)
        }
    }

    /// Fixes a stochastic node to observed data and commits the change.
    pub fn clamp<A: Value>(&mut self, r: NodeRef<A>, value: A) -> Result<()> {
        if !self.is_stochastic(r)? {
            return Err(DagError::structural(r.0, "only stochastic nodes can be clamped"));
        }
        self.value_ref::<A>(r.0)?;
        self.touch(r)?;
        *self.value_mut(r)? = value;
        self.keep(r)?;
        self.stochastic_mut::<A>(r.0)?.set_clamped(true);
        log::debug!("clamped node {}", r.0);
        Ok(())
    }

    pub fn unclamp<A: Value>(&mut self, r: NodeRef<A>) -> Result<()> {
        self.stochastic_mut::<A>(r.0)?.set_clamped(false);
        Ok(())
    }

    fn stochastic_mut<A: Value>(&mut self, id: NodeId) -> Result<&mut StochasticNode<A>> {
        let node = self.node_mut(id)?;
        let found = node.type_name();
        node.as_any_mut()
            .downcast_mut::<StochasticNode<A>>()
            .ok_or(DagError::TypeMismatch {
                node: id,
                expected: std::any::type_name::<A>(),
                found,
            })
    }

    /// Draws a fresh value for an unclamped stochastic node.
    ///
    /// The node is touched first, so the draw can be kept or restored like
    /// any other proposal. Other nodes are left alone.
    pub fn redraw(&mut self, id: impl Into<NodeId>, g: &mut Pcg64) -> Result<()> {
        let id = id.into();
        let node = self.node(id)?;
        if node.kind() != NodeKind::Stochastic || node.is_clamped() {
            return Ok(());
        }
        self.touch(id)?;
        let parents: Vec<NodeId> = self.slot(id)?.parents.iter().collect();
        for p in parents {
            self.refresh(p)?;
        }
        let mut node = self.slot_mut(id)?.node.take().ok_or(DagError::Cycle(id))?;
        let drawn = node.redraw(self, id, g);
        self.slot_mut(id)?.node = Some(node);
        drawn
    }

    pub fn print_value(
        &mut self,
        id: impl Into<NodeId>,
        out: &mut dyn std::fmt::Write,
        index: Option<usize>,
    ) -> Result<()> {
        let id = id.into();
        self.refresh(id)?;
        self.node(id)?.print_value(out, index)?;
        Ok(())
    }

    // --- touch / keep / restore ---

    /// Marks a node as changed by the current proposal.
    pub fn touch(&mut self, id: impl Into<NodeId>) -> Result<()> {
        self.touch_with(id.into(), None)
    }

    /// Marks only some elements of a vector-valued node as changed.
    pub fn touch_elements(&mut self, id: impl Into<NodeId>, indices: &[usize]) -> Result<()> {
        self.touch_with(id.into(), Some(indices))
    }

    fn touch_with(&mut self, id: NodeId, indices: Option<&[usize]>) -> Result<()> {
        let slot = self.slot_mut(id)?;
        let node = slot.node.as_mut().ok_or(DagError::Cycle(id))?;
        let was_touched = node.is_touched();
        node.touch_me();
        match indices {
            Some(indices) if !indices.is_empty() => {
                if !was_touched || !slot.whole {
                    for &i in indices {
                        slot.touched_elements.insert(i);
                    }
                }
            }
            _ => {
                slot.whole = true;
                slot.touched_elements = IndexSet::new();
            }
        }
        log::debug!("touched node {} ({})", id, slot.name);
        self.touch_affected(id)?;
        Ok(())
    }

    /// Invalidates the dependents of `id`.
    ///
    /// A child already waiting for recomputation is skipped, so each node is
    /// visited at most once however many paths lead to it. Stochastic
    /// children only lose their log-probability: their value is unchanged,
    /// so the walk stops there. Returns the number of nodes visited.
    pub(crate) fn touch_affected(&mut self, id: NodeId) -> Result<usize> {
        let mut visited = 0;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let children: Vec<NodeId> = self.slot(n)?.children.iter().collect();
            for c in children {
                let node = self.node_mut(c)?;
                if node.needs_update() {
                    continue;
                }
                node.touch_me();
                visited += 1;
                if node.kind() == NodeKind::Deterministic {
                    stack.push(c);
                }
            }
        }
        Ok(visited)
    }

    /// Touched nodes reachable from `id` through touched children, `id` first.
    fn touched_component(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        if !self.node(id)?.is_touched() {
            return Ok(order);
        }
        let mut seen = NodeSet::new();
        let mut stack = vec![id];
        seen.insert(id);
        while let Some(n) = stack.pop() {
            order.push(n);
            for c in self.slot(n)?.children.iter() {
                if !seen.contains(c) && self.node(c)?.is_touched() {
                    seen.insert(c);
                    stack.push(c);
                }
            }
        }
        Ok(order)
    }

    /// Commits the current proposal downstream of `id`.
    pub fn keep(&mut self, id: impl Into<NodeId>) -> Result<()> {
        let id = id.into();
        let touched = self.touched_component(id)?;
        // recompute before dropping any snapshot, so partial updates still
        // see which parent elements changed
        for &n in &touched {
            self.refresh(n)?;
        }
        for &n in &touched {
            let slot = self.slot_mut(n)?;
            if let Some(node) = slot.node.as_mut() {
                node.keep_me();
            }
            slot.clear_touched();
        }
        log::debug!("kept {} nodes from {}", touched.len(), id);
        Ok(())
    }

    /// Rolls the current proposal back downstream of `id`.
    pub fn restore(&mut self, id: impl Into<NodeId>) -> Result<()> {
        let id = id.into();
        let touched = self.touched_component(id)?;
        for &n in &touched {
            let slot = self.slot_mut(n)?;
            if let Some(node) = slot.node.as_mut() {
                node.restore_me();
            }
            slot.clear_touched();
        }
        log::debug!("restored {} nodes from {}", touched.len(), id);
        Ok(())
    }

    // --- probabilities ---

    pub fn ln_probability(&mut self, id: impl Into<NodeId>) -> Result<LogLikelihood> {
        let id = id.into();
        self.refresh(id)?;
        Ok(self.node(id)?.ln_probability())
    }

    /// Change of the log-probability since the node was touched; zero if it
    /// has not been touched in this cycle.
    pub fn ln_probability_ratio(&mut self, id: impl Into<NodeId>) -> Result<LogLikelihood> {
        let id = id.into();
        if !self.node(id)?.is_touched() {
            return Ok(0.0);
        }
        self.refresh(id)?;
        let node = self.node(id)?;
        Ok(node.ln_probability() - node.stored_ln_probability())
    }

    /// Collects the stochastic nodes whose log-probability depends on the
    /// value of `id`, looking through deterministic nodes.
    pub fn affected_nodes(&self, id: impl Into<NodeId>, affected: &mut NodeSet) -> Result<()> {
        let mut visited = NodeSet::new();
        let mut stack = vec![id.into()];
        while let Some(n) = stack.pop() {
            for c in self.slot(n)?.children.iter() {
                if !visited.insert(c) {
                    continue;
                }
                match self.node(c)?.kind() {
                    NodeKind::Stochastic => {
                        affected.insert(c);
                    }
                    NodeKind::Deterministic => stack.push(c),
                    NodeKind::Constant => {}
                }
            }
        }
        Ok(())
    }
}
