//! Wiring of the model graph.
//!
//! Every operation keeps `b ∈ children(a) ⟺ a ∈ parents(b)` and refuses to
//! close a cycle, so the touch walk and cloning can rely on a DAG.

use std::collections::VecDeque;

use crate::dag::{Dag, NodeId, NodeSet};
use crate::error::{DagError, Result};

impl Dag {
    /// True if `to` can be reached from `from` by following children.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> Result<bool> {
        let mut seen = NodeSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return Ok(true);
            }
            for c in self.slot(n)?.children.iter() {
                if seen.insert(c) {
                    stack.push(c);
                }
            }
        }
        Ok(false)
    }

    fn check_edge(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.slot(parent)?;
        self.slot(child)?;
        if self.reaches(child, parent)? {
            return Err(DagError::Cycle(child));
        }
        Ok(())
    }

    fn link(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.slot_mut(parent)?.children.insert(child);
        self.slot_mut(child)?.parents.insert(parent);
        Ok(())
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.slot_mut(parent)?.children.remove(&child);
        self.slot_mut(child)?.parents.remove(&parent);
        Ok(())
    }

    fn binds(&self, node: NodeId, parent: NodeId) -> Result<bool> {
        Ok(self
            .node(node)?
            .params()
            .is_some_and(|p| p.contains(parent)))
    }

    /// Adds a plain dependency edge without a parameter role.
    pub fn add_parent(&mut self, child: impl Into<NodeId>, parent: impl Into<NodeId>) -> Result<()> {
        let (child, parent) = (child.into(), parent.into());
        self.check_edge(parent, child)?;
        self.link(parent, child)?;
        log::debug!("linked {} -> {}", parent, child);
        Ok(())
    }

    pub fn add_child(&mut self, parent: impl Into<NodeId>, child: impl Into<NodeId>) -> Result<()> {
        self.add_parent(child, parent)
    }

    /// Removes a dependency edge. Removing an edge that does not exist is a
    /// no-op; removing one the child still reads through a role is an error.
    pub fn remove_parent(
        &mut self,
        child: impl Into<NodeId>,
        parent: impl Into<NodeId>,
    ) -> Result<()> {
        let (child, parent) = (child.into(), parent.into());
        if !self.slot(child)?.parents.contains(parent) {
            return Ok(());
        }
        if self.binds(child, parent)? {
            return Err(DagError::structural(
                child,
                format!("parent {} is still bound to a parameter", parent),
            ));
        }
        self.unlink(parent, child)?;
        log::debug!("unlinked {} -> {}", parent, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: impl Into<NodeId>, child: impl Into<NodeId>) -> Result<()> {
        self.remove_parent(child, parent)
    }

    fn check_same_type(&self, old: NodeId, new: NodeId) -> Result<()> {
        let (o, n) = (self.node(old)?, self.node(new)?);
        if o.value_type() != n.value_type() {
            return Err(DagError::TypeMismatch {
                node: new,
                expected: o.type_name(),
                found: n.type_name(),
            });
        }
        Ok(())
    }

    // moves the edge old -> node to new -> node and rebinds roles
    fn rewire(&mut self, node: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        self.unlink(old, node)?;
        self.link(new, node)?;
        let swapped = self.node_mut(node)?.swap_parameter(old, new);
        log::debug!(
            "node {} now reads {} instead of {} ({} roles)",
            node,
            new,
            old,
            swapped
        );
        Ok(())
    }

    /// Replaces parameter `old` of `node` with `new`, then commits the
    /// recomputation of `node` and everything depending on it.
    pub fn swap_parent(
        &mut self,
        node: impl Into<NodeId>,
        old: impl Into<NodeId>,
        new: impl Into<NodeId>,
    ) -> Result<()> {
        let (node, old, new) = (node.into(), old.into(), new.into());
        if !self.binds(node, old)? {
            return Err(DagError::ParameterNotFound { node, parent: old });
        }
        if old == new {
            return Ok(());
        }
        self.check_same_type(old, new)?;
        self.check_edge(new, node)?;
        self.rewire(node, old, new)?;
        self.touch(node)?;
        self.keep(node)
    }

    /// Substitutes `new` for `old` everywhere `old` is a parent. Afterwards
    /// `old` has no children.
    pub fn replace(&mut self, old: impl Into<NodeId>, new: impl Into<NodeId>) -> Result<()> {
        let (old, new) = (old.into(), new.into());
        self.slot(new)?;
        if old == new {
            return Ok(());
        }
        let children: Vec<NodeId> = self.slot(old)?.children.iter().collect();
        // validate everything before touching the graph
        for &c in &children {
            if self.binds(c, old)? {
                self.check_same_type(old, new)?;
            }
            self.check_edge(new, c)?;
        }
        for &c in &children {
            self.rewire(c, old, new)?;
        }
        for &c in &children {
            self.touch(c)?;
            self.keep(c)?;
        }
        log::debug!("replaced {} by {} in {} children", old, new, children.len());
        Ok(())
    }

    /// Detaches a node from its parents and children and frees its slot.
    pub fn remove(&mut self, id: impl Into<NodeId>) -> Result<()> {
        let id = id.into();
        let slot = self.slot(id)?;
        for c in slot.children.iter() {
            if self.binds(c, id)? {
                return Err(DagError::structural(
                    id,
                    format!("node {} still reads it as a parameter", c),
                ));
            }
        }
        let parents: Vec<NodeId> = slot.parents.iter().collect();
        let children: Vec<NodeId> = slot.children.iter().collect();
        for p in parents {
            self.unlink(p, id)?;
        }
        for c in children {
            self.unlink(id, c)?;
        }
        let name = self
            .slots
            .get_mut(id as usize)
            .and_then(|s| s.take())
            .map(|s| s.name);
        log::debug!("removed node {} ({:?})", id, name);
        Ok(())
    }

    /// All live nodes, parents before children.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let ids: Vec<NodeId> = self.node_ids().collect();
        let mut in_degree = vec![0usize; self.slots.len()];
        let mut queue = VecDeque::new();
        for &id in &ids {
            let degree = self.slot(id)?.parents.len();
            in_degree[id as usize] = degree;
            if degree == 0 {
                queue.push_back(id);
            }
        }
        let mut order = Vec::with_capacity(ids.len());
        while let Some(n) = queue.pop_front() {
            order.push(n);
            for c in self.slot(n)?.children.iter() {
                in_degree[c as usize] -= 1;
                if in_degree[c as usize] == 0 {
                    queue.push_back(c);
                }
            }
        }
        if order.len() != ids.len() {
            let stuck = ids
                .into_iter()
                .find(|&id| in_degree[id as usize] > 0)
                .unwrap_or_default();
            return Err(DagError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::NodeRef;
    use crate::params::{Params, Role};

    fn consistent(dag: &Dag) -> bool {
        dag.node_ids().all(|a| {
            let slot = dag.slot(a).unwrap();
            slot.children
                .iter()
                .all(|b| dag.slot(b).unwrap().parents.contains(a))
                && slot
                    .parents
                    .iter()
                    .all(|b| dag.slot(b).unwrap().children.contains(a))
        })
    }

    fn sum(dag: &mut Dag, name: &str, x: NodeId, y: NodeId) -> NodeRef<f64> {
        let params = Params::new().with(Role::Arg(0), x).with(Role::Arg(1), y);
        dag.deterministic(name, params, |args| {
            Ok(args.copied::<f64>(Role::Arg(0))? + args.copied::<f64>(Role::Arg(1))?)
        })
        .unwrap()
    }

    #[test]
    fn wiring_keeps_both_directions() {
        let mut dag = Dag::new();
        let a = dag.constant("a", 1.0);
        let b = dag.constant("b", 2.0);
        let s = sum(&mut dag, "s", a.id(), b.id());
        let c = dag.constant("c", 3.0);
        assert!(consistent(&dag));

        dag.add_child(c, s).unwrap();
        assert!(dag.parents(s).unwrap().contains(c.id()));
        assert!(consistent(&dag));

        dag.remove_parent(s, c).unwrap();
        assert!(!dag.children(c).unwrap().contains(s.id()));
        // already gone
        dag.remove_child(c, s).unwrap();
        assert!(consistent(&dag));

        assert!(matches!(
            dag.remove_parent(s, a),
            Err(DagError::Structural { .. })
        ));
        assert!(consistent(&dag));
    }

    #[test]
    fn cycles_are_refused() {
        let mut dag = Dag::new();
        let a = dag.constant("a", 1.0);
        let b = dag.constant("b", 2.0);
        let s = sum(&mut dag, "s", a.id(), b.id());
        let t = sum(&mut dag, "t", s.id(), b.id());
        assert!(matches!(dag.add_parent(a, t), Err(DagError::Cycle(_))));
        assert!(matches!(dag.add_parent(s, s), Err(DagError::Cycle(_))));
        assert!(matches!(dag.swap_parent(s, a, t), Err(DagError::Cycle(_))));
        assert!(consistent(&dag));

        let order = dag.topological_order().unwrap();
        let pos = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a.id()) < pos(s.id()));
        assert!(pos(s.id()) < pos(t.id()));
        assert!(pos(b.id()) < pos(t.id()));
    }

    #[test]
    fn swap_parent_rebinds_and_recomputes() {
        let mut dag = Dag::new();
        let a = dag.constant("a", 1.0);
        let b = dag.constant("b", 2.0);
        let c = dag.constant("c", 10.0);
        let s = sum(&mut dag, "s", a.id(), b.id());
        let t = sum(&mut dag, "t", s.id(), s.id());
        assert_eq!(*dag.value(t).unwrap(), 6.0);

        dag.swap_parent(s, a, c).unwrap();
        assert!(consistent(&dag));
        assert!(dag.children(a).unwrap().len() == 0);
        assert_eq!(dag.params(s).unwrap().unwrap().get(Role::Arg(0)), Some(c.id()));
        assert!(!dag.is_touched(s).unwrap());
        assert_eq!(*dag.value(s).unwrap(), 12.0);
        assert_eq!(*dag.value(t).unwrap(), 24.0);

        assert!(matches!(
            dag.swap_parent(s, a, c),
            Err(DagError::ParameterNotFound { .. })
        ));
        let flag = dag.constant("flag", true);
        assert!(matches!(
            dag.swap_parent(s, c, flag),
            Err(DagError::TypeMismatch { .. })
        ));
        assert!(consistent(&dag));
    }

    #[test]
    fn replace_moves_every_child() {
        let mut dag = Dag::new();
        let a = dag.constant("a", 1.0);
        let b = dag.constant("b", 2.0);
        let s = sum(&mut dag, "s", a.id(), b.id());
        let t = sum(&mut dag, "t", a.id(), a.id());
        let extra = dag.constant("extra", 0.0);
        dag.add_parent(extra, a).unwrap();

        let a2 = dag.constant("a2", 5.0);
        dag.replace(a, a2).unwrap();
        assert!(consistent(&dag));
        assert_eq!(dag.children(a).unwrap().len(), 0);
        assert_eq!(dag.children(a2).unwrap().len(), 3);
        assert_eq!(*dag.value(s).unwrap(), 7.0);
        assert_eq!(*dag.value(t).unwrap(), 10.0);
        assert!(dag.parents(extra).unwrap().contains(a2.id()));

        // a child that would become its own ancestor stops the whole replace
        let before: Vec<NodeId> = dag.children(a2).unwrap().iter().collect();
        assert!(matches!(dag.replace(a2, t), Err(DagError::Cycle(_))));
        let after: Vec<NodeId> = dag.children(a2).unwrap().iter().collect();
        assert_eq!(before, after);
        assert!(consistent(&dag));
    }

    #[test]
    fn remove_detaches() {
        let mut dag = Dag::new();
        let a = dag.constant("a", 1.0);
        let b = dag.constant("b", 2.0);
        let s = sum(&mut dag, "s", a.id(), b.id());
        let note = dag.constant("note", 0u32);
        dag.add_parent(note, s).unwrap();

        assert!(matches!(dag.remove(a), Err(DagError::Structural { .. })));
        dag.remove(s).unwrap();
        assert!(!dag.contains(s));
        assert_eq!(dag.len(), 3);
        assert_eq!(dag.children(a).unwrap().len(), 0);
        assert_eq!(dag.parents(note).unwrap().len(), 0);
        assert!(consistent(&dag));
        dag.remove(a).unwrap();
        assert!(matches!(dag.remove(a), Err(DagError::NodeNotFound(_))));
    }
}
