use std::any::{Any, TypeId};
use std::fmt::Write;
use std::sync::Arc;

use crate::dag::{Dag, NodeId};
use crate::error::Result;
use crate::node::{DagNode, NodeKind};
use crate::params::{Args, Dirty, Params, Role};
use crate::value::Value;

/// The pure function behind a deterministic node.
pub trait Function<A>: Send + Sync {
    fn compute(&self, args: &Args<'_>) -> Result<A>;

    /// Brings `value` up to date and reports which elements changed.
    /// Functions that cannot exploit partial dirtiness recompute everything.
    fn update(&self, args: &Args<'_>, value: &mut A) -> Result<Dirty> {
        *value = self.compute(args)?;
        Ok(Dirty::All)
    }
}

pub(crate) struct FnFunction<F>(pub(crate) F);

impl<A, F> Function<A> for FnFunction<F>
where
    F: Fn(&Args<'_>) -> Result<A> + Send + Sync,
{
    fn compute(&self, args: &Args<'_>) -> Result<A> {
        (self.0)(args)
    }
}

/// Applies a scalar function to every element of one vector parameter.
///
/// When only some elements of the input are touched, only those elements are
/// recomputed, and they become this node's touched elements in turn.
#[derive(Clone, Copy, Debug)]
pub struct Elementwise {
    role: Role,
    f: fn(f64) -> f64,
}

impl Elementwise {
    pub fn new(role: Role, f: fn(f64) -> f64) -> Self {
        Self { role, f }
    }
}

impl Function<Vec<f64>> for Elementwise {
    fn compute(&self, args: &Args<'_>) -> Result<Vec<f64>> {
        let input = args.get::<Vec<f64>>(self.role)?;
        Ok(input.iter().map(|&x| (self.f)(x)).collect())
    }

    fn update(&self, args: &Args<'_>, value: &mut Vec<f64>) -> Result<Dirty> {
        let input = args.get::<Vec<f64>>(self.role)?;
        match args.dirty(self.role)? {
            Dirty::Elements(indices)
                if input.len() == value.len() && indices.iter().all(|&i| i < value.len()) =>
            {
                for &i in &indices {
                    value[i] = (self.f)(input[i]);
                }
                log::trace!("elementwise update of {} elements", indices.len());
                Ok(Dirty::Elements(indices))
            }
            Dirty::Clean if input.len() == value.len() => Ok(Dirty::Clean),
            _ => {
                *value = self.compute(args)?;
                Ok(Dirty::All)
            }
        }
    }
}

pub(crate) struct DeterministicNode<A: Value> {
    value: A,
    stored: Option<A>,
    dirty: bool,
    params: Params,
    function: Arc<dyn Function<A>>,
}

impl<A: Value> Clone for DeterministicNode<A> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            stored: self.stored.clone(),
            dirty: self.dirty,
            params: self.params.clone(),
            function: self.function.clone(),
        }
    }
}

impl<A: Value> DeterministicNode<A> {
    pub(crate) fn new(value: A, params: Params, function: Arc<dyn Function<A>>) -> Self {
        Self {
            value,
            stored: None,
            dirty: false,
            params,
            function,
        }
    }
}

impl<A: Value> DagNode for DeterministicNode<A> {
    fn kind(&self) -> NodeKind {
        NodeKind::Deterministic
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
    fn params(&self) -> Option<&Params> {
        Some(&self.params)
    }
    fn params_mut(&mut self) -> Option<&mut Params> {
        Some(&mut self.params)
    }

    fn is_touched(&self) -> bool {
        self.stored.is_some()
    }
    fn needs_update(&self) -> bool {
        self.dirty
    }
    fn touch_me(&mut self) {
        if self.stored.is_none() {
            self.stored = Some(self.value.clone());
        }
        self.dirty = true;
    }
    fn refresh(&mut self, dag: &Dag, id: NodeId) -> Result<Dirty> {
        if !self.dirty {
            return Ok(Dirty::Clean);
        }
        let args = Args::new(dag, id, &self.params);
        let changed = self.function.update(&args, &mut self.value)?;
        self.dirty = false;
        Ok(changed)
    }
    fn keep_me(&mut self) {
        self.stored = None;
    }
    fn restore_me(&mut self) {
        if let Some(v) = self.stored.take() {
            self.value = v;
        }
        self.dirty = false;
    }

    fn print_value(&self, out: &mut dyn Write, index: Option<usize>) -> std::fmt::Result {
        self.value.print(out, index)
    }
    fn box_clone(&self) -> Box<dyn DagNode> {
        Box::new(self.clone())
    }
}
