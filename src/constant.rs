use std::any::{Any, TypeId};
use std::fmt::Write;

use crate::node::{DagNode, NodeKind};
use crate::value::Value;

/// A parentless leaf. Its value never goes stale, but a reassignment by the
/// model builder is still snapshotted so a proposal can roll it back.
#[derive(Clone, Debug)]
pub(crate) struct ConstantNode<A: Value> {
    value: A,
    stored: Option<A>,
}

impl<A: Value> ConstantNode<A> {
    pub(crate) fn new(value: A) -> Self {
        Self {
            value,
            stored: None,
        }
    }

    pub(crate) fn value_mut(&mut self) -> &mut A {
        &mut self.value
    }
}

impl<A: Value> DagNode for ConstantNode<A> {
    fn kind(&self) -> NodeKind {
        NodeKind::Constant
    }
    fn value_any(&self) -> &dyn Any {
        &self.value
    }
    fn value_type(&self) -> TypeId {
        TypeId::of::<A>()
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_touched(&self) -> bool {
        self.stored.is_some()
    }
    fn touch_me(&mut self) {
        if self.stored.is_none() {
            self.stored = Some(self.value.clone());
        }
    }
    fn keep_me(&mut self) {
        self.stored = None;
    }
    fn restore_me(&mut self) {
        if let Some(v) = self.stored.take() {
            self.value = v;
        }
    }

    fn print_value(&self, out: &mut dyn Write, index: Option<usize>) -> std::fmt::Result {
        self.value.print(out, index)
    }
    fn box_clone(&self) -> Box<dyn DagNode> {
        Box::new(self.clone())
    }
}
