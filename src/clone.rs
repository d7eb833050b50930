//! Structure-preserving copies of parts of a model graph.

use std::collections::HashMap;

use crate::dag::{Dag, NodeId, NodeSet, Slot};
use crate::error::{DagError, Result};

/// Original node → its clone.
pub type NodeMap = HashMap<NodeId, NodeId>;

impl Dag {
    /// Clones `id` and all of its ancestors into `target`.
    ///
    /// Nodes already present in `map` are reused, so an ancestor reached
    /// through several paths is cloned exactly once and the clone shares it
    /// the same way the original does.
    pub fn clone_dag(
        &self,
        id: impl Into<NodeId>,
        target: &mut Dag,
        map: &mut NodeMap,
    ) -> Result<NodeId> {
        let id = id.into();
        // (node, parents already pushed); a node is cloned once all of its
        // parents have clones
        let mut stack = vec![(id, false)];
        while let Some((n, expanded)) = stack.pop() {
            if map.contains_key(&n) {
                continue;
            }
            let slot = self.slot(n)?;
            if !expanded {
                stack.push((n, true));
                for p in slot.parents.iter() {
                    if !map.contains_key(&p) {
                        stack.push((p, false));
                    }
                }
                continue;
            }
            let mut parents = NodeSet::new();
            for p in slot.parents.iter() {
                parents.insert(*map.get(&p).ok_or(DagError::NodeNotFound(p))?);
            }
            let mut node = self.node(n)?.box_clone();
            node.remap_parameters(map);
            let cloned = target.insert(Slot {
                name: slot.name.clone(),
                parents,
                children: NodeSet::new(),
                touched_elements: slot.touched_elements.clone(),
                whole: slot.whole,
                node: Some(node),
            });
            map.insert(n, cloned);
            log::trace!("cloned node {} as {}", n, cloned);
        }
        map.get(&id).copied().ok_or(DagError::NodeNotFound(id))
    }

    /// Clones `id`, everything downstream of it, and the ancestors those
    /// nodes read from.
    pub fn clone_downstream_dag(
        &self,
        id: impl Into<NodeId>,
        target: &mut Dag,
        map: &mut NodeMap,
    ) -> Result<NodeId> {
        let id = id.into();
        let mut downstream = NodeSet::new();
        self.collect_downstream_graph(id, &mut downstream)?;
        let mut nodes: Vec<NodeId> = downstream.iter().collect();
        // stable numbering in the target
        nodes.sort_unstable();
        for n in nodes {
            self.clone_dag(n, target, map)?;
        }
        self.clone_dag(id, target, map)
    }

    /// Collects `id` and every node reachable from it through children.
    pub fn collect_downstream_graph(
        &self,
        id: impl Into<NodeId>,
        nodes: &mut NodeSet,
    ) -> Result<()> {
        let id = id.into();
        self.slot(id)?;
        let mut stack = vec![id];
        nodes.insert(id);
        while let Some(n) = stack.pop() {
            for c in self.slot(n)?.children.iter() {
                if nodes.insert(c) {
                    stack.push(c);
                }
            }
        }
        Ok(())
    }
}
