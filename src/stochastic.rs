use std::any::{Any, TypeId};
use std::fmt::Write;
use std::sync::Arc;

use rand_pcg::Pcg64;

use crate::dag::{Dag, NodeId};
use crate::distributions::{LogLikelihood, Sampleable};
use crate::error::Result;
use crate::node::{DagNode, NodeKind};
use crate::params::{Args, Dirty, Params};
use crate::value::Value;

/// Builds the concrete distribution of a stochastic node from its parameters.
pub type Family<A> = Arc<dyn Fn(&Args<'_>) -> Result<Box<dyn Sampleable<A>>> + Send + Sync>;

pub(crate) struct StochasticNode<A: Value> {
    value: A,
    stored: Option<A>,
    ln_prob: LogLikelihood,
    stored_ln_prob: LogLikelihood,
    prob_dirty: bool,
    touched: bool,
    clamped: bool,
    params: Params,
    family: Family<A>,
}

impl<A: Value> Clone for StochasticNode<A> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            stored: self.stored.clone(),
            ln_prob: self.ln_prob,
            stored_ln_prob: self.stored_ln_prob,
            prob_dirty: self.prob_dirty,
            touched: self.touched,
            clamped: self.clamped,
            params: self.params.clone(),
            family: self.family.clone(),
        }
    }
}

impl<A: Value> StochasticNode<A> {
    pub(crate) fn new(
        value: A,
        ln_prob: LogLikelihood,
        clamped: bool,
        params: Params,
        family: Family<A>,
    ) -> Self {
        Self {
            value,
            stored: None,
            ln_prob,
            stored_ln_prob: ln_prob,
            prob_dirty: false,
            touched: false,
            clamped,
            params,
            family,
        }
    }

    pub(crate) fn value_mut(&mut self) -> &mut A {
        self.prob_dirty = true;
        &mut self.value
    }

    pub(crate) fn set_clamped(&mut self, clamped: bool) {
        self.clamped = clamped;
    }
}

impl<A: Value> DagNode for StochasticNode<A> {
    fn kind(&self) -> NodeKind {
        NodeKind::Stochastic
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
        self.touched
    }
    fn needs_update(&self) -> bool {
        self.prob_dirty
    }
    fn touch_me(&mut self) {
        if !self.touched {
            self.stored = Some(self.value.clone());
            self.stored_ln_prob = self.ln_prob;
            self.touched = true;
        }
        self.prob_dirty = true;
    }
    fn refresh(&mut self, dag: &Dag, id: NodeId) -> Result<Dirty> {
        if self.prob_dirty {
            let args = Args::new(dag, id, &self.params);
            let dist = (self.family)(&args)?;
            self.ln_prob = dist.log_density(&self.value);
            self.prob_dirty = false;
            log::trace!("node {} ln probability {}", id, self.ln_prob);
        }
        Ok(Dirty::Clean)
    }
    fn keep_me(&mut self) {
        self.stored = None;
        self.touched = false;
    }
    fn restore_me(&mut self) {
        if let Some(v) = self.stored.take() {
            self.value = v;
        }
        self.ln_prob = self.stored_ln_prob;
        self.prob_dirty = false;
        self.touched = false;
    }

    fn ln_probability(&self) -> LogLikelihood {
        self.ln_prob
    }
    fn stored_ln_probability(&self) -> LogLikelihood {
        self.stored_ln_prob
    }
    fn is_clamped(&self) -> bool {
        self.clamped
    }
    fn redraw(&mut self, dag: &Dag, id: NodeId, g: &mut Pcg64) -> Result<()> {
        if self.clamped {
            return Ok(());
        }
        let args = Args::new(dag, id, &self.params);
        let dist = (self.family)(&args)?;
        let (value, ll) = dist.sample(g);
        self.value = value;
        self.ln_prob = ll;
        self.prob_dirty = false;
        Ok(())
    }

    fn print_value(&self, out: &mut dyn Write, index: Option<usize>) -> std::fmt::Result {
        self.value.print(out, index)
    }
    fn box_clone(&self) -> Box<dyn DagNode> {
        Box::new(self.clone())
    }
}
