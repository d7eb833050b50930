use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::Write;

use rand_pcg::Pcg64;

use crate::dag::{Dag, NodeId};
use crate::distributions::LogLikelihood;
use crate::error::Result;
use crate::params::{Dirty, Params};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Constant,
    Deterministic,
    Stochastic,
}

/// Behaviour shared by every node payload stored in a [`Dag`].
///
/// The graph owns adjacency and touched elements; a payload only knows its
/// value, its parameter bindings and its own transaction state.
pub(crate) trait DagNode: Send + Sync {
    fn kind(&self) -> NodeKind;
    fn value_any(&self) -> &dyn Any;
    fn value_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn params(&self) -> Option<&Params> {
        None
    }
    fn params_mut(&mut self) -> Option<&mut Params> {
        None
    }

    /// Touched since the last keep/restore.
    fn is_touched(&self) -> bool;
    /// Holds a stale value or log-probability.
    fn needs_update(&self) -> bool {
        false
    }
    /// Snapshots on the first touch of a cycle and invalidates the cache.
    fn touch_me(&mut self);
    /// Recomputes whatever is stale. Parents must already be up to date.
    fn refresh(&mut self, _dag: &Dag, _id: NodeId) -> Result<Dirty> {
        Ok(Dirty::Clean)
    }
    fn keep_me(&mut self);
    fn restore_me(&mut self);

    fn ln_probability(&self) -> LogLikelihood {
        0.0
    }
    fn stored_ln_probability(&self) -> LogLikelihood {
        0.0
    }
    fn is_clamped(&self) -> bool {
        false
    }
    fn redraw(&mut self, _dag: &Dag, _id: NodeId, _g: &mut Pcg64) -> Result<()> {
        Ok(())
    }

    fn print_value(&self, out: &mut dyn Write, index: Option<usize>) -> std::fmt::Result;
    fn box_clone(&self) -> Box<dyn DagNode>;

    fn swap_parameter(&mut self, old: NodeId, new: NodeId) -> usize {
        self.params_mut().map_or(0, |p| p.swap(old, new))
    }
    fn remap_parameters(&mut self, map: &HashMap<NodeId, NodeId>) {
        if let Some(p) = self.params_mut() {
            p.remap(map);
        }
    }
}

impl Clone for Box<dyn DagNode> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
