//! Dependency and invalidation engine for probabilistic model graphs.
//!
//! A model is a DAG of constant, deterministic and stochastic nodes. A
//! sampler perturbs a stochastic node, asks which stochastic nodes are
//! affected and how much their log-probability changed, then keeps or
//! restores the proposal. Only the affected subgraph is ever recomputed.

pub mod builder;
pub mod clone;
mod constant;
pub mod dag;
pub mod deterministic;
pub mod distributions;
pub mod error;
mod node;
pub mod params;
pub mod stochastic;
mod topology;
pub mod value;

pub use builder::Model;
pub use clone::NodeMap;
pub use dag::{Dag, IndexSet, NodeId, NodeRef, NodeSet};
pub use deterministic::{Elementwise, Function};
pub use error::{DagError, Result};
pub use node::NodeKind;
pub use params::{Args, Dirty, Params, Role};
pub use stochastic::Family;
pub use value::Value;
