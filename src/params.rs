//! Parameter bindings of deterministic and stochastic nodes.
//!
//! A node does not reinterpret its parents by runtime type. Each parent it
//! reads is bound to a [`Role`], and the node's function or distribution
//! looks the parent up by role through [`Args`].

use std::collections::HashMap;

use crate::dag::{Dag, NodeId};
use crate::error::{DagError, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Positional argument of a user function.
    Arg(u8),
    Mean,
    StdDev,
    Rate,
    Probability,
    Lower,
    Upper,
    Weights,
    Tree,
}

/// Ordered `(role, parent)` pairs. A parent may fill several roles.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(Vec<(Role, NodeId)>);

impl Params {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, role: Role, node: impl Into<NodeId>) -> Self {
        self.bind(role, node.into());
        self
    }

    /// Binds `role`, replacing any previous binding of the same role.
    pub fn bind(&mut self, role: Role, node: NodeId) {
        match self.0.iter_mut().find(|(r, _)| *r == role) {
            Some(slot) => slot.1 = node,
            None => self.0.push((role, node)),
        }
    }

    pub fn get(&self, role: Role) -> Option<NodeId> {
        self.0.iter().find(|(r, _)| *r == role).map(|&(_, n)| n)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.0.iter().any(|&(_, n)| n == node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.0.iter().map(|&(_, n)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, NodeId)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rebinds every role held by `old` to `new`; returns how many changed.
    pub fn swap(&mut self, old: NodeId, new: NodeId) -> usize {
        let mut swapped = 0;
        for (_, n) in self.0.iter_mut().filter(|(_, n)| *n == old) {
            *n = new;
            swapped += 1;
        }
        swapped
    }

    pub(crate) fn remap(&mut self, map: &HashMap<NodeId, NodeId>) {
        for (_, n) in self.0.iter_mut() {
            if let Some(&m) = map.get(n) {
                *n = m;
            }
        }
    }
}

/// What changed in a value since the start of the current proposal.
#[derive(Clone, Debug, PartialEq)]
pub enum Dirty {
    Clean,
    Elements(Vec<usize>),
    All,
}

/// Read access to the parameters of the node being evaluated.
pub struct Args<'a> {
    dag: &'a Dag,
    owner: NodeId,
    params: &'a Params,
}

impl<'a> Args<'a> {
    pub(crate) fn new(dag: &'a Dag, owner: NodeId, params: &'a Params) -> Self {
        Self { dag, owner, params }
    }

    /// The node whose parameters these are.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn node(&self, role: Role) -> Result<NodeId> {
        self.params.get(role).ok_or(DagError::RoleNotBound {
            node: self.owner,
            role,
        })
    }

    pub fn get<T: Value>(&self, role: Role) -> Result<&'a T> {
        let id = self.node(role)?;
        self.dag.value_ref::<T>(id)
    }

    /// Like [`Args::get`] but copies the value out.
    pub fn copied<T: Value + Copy>(&self, role: Role) -> Result<T> {
        self.get::<T>(role).copied()
    }

    pub fn dirty(&self, role: Role) -> Result<Dirty> {
        let id = self.node(role)?;
        self.dag.dirty_elements(id)
    }
}
