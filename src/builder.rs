use crate::dag::{Dag, NodeId, NodeRef};
use crate::distributions::{
    Bernoulli, Categorical, Dirac, Exponential, LogLikelihood, Normal, Sampleable, Uniform,
};
use crate::error::{DagError, Result};
use crate::params::{Args, Params, Role};
use crate::value::Value;
use rand::SeedableRng;
use rand_pcg::Pcg64;

fn normal_s(args: &Args<'_>) -> Result<Box<dyn Sampleable<f64>>> {
    let dist: Box<dyn Sampleable<f64>> = Box::new(Normal::new(
        args.copied(Role::Mean)?,
        args.copied(Role::StdDev)?,
    ));
    Ok(dist)
}
fn uniform_s(args: &Args<'_>) -> Result<Box<dyn Sampleable<f64>>> {
    let dist: Box<dyn Sampleable<f64>> = Box::new(Uniform::new(
        args.copied(Role::Lower)?,
        args.copied(Role::Upper)?,
    ));
    Ok(dist)
}
fn exponential_s(args: &Args<'_>) -> Result<Box<dyn Sampleable<f64>>> {
    let dist: Box<dyn Sampleable<f64>> = Box::new(Exponential::new(args.copied(Role::Rate)?));
    Ok(dist)
}
fn bern_s(args: &Args<'_>) -> Result<Box<dyn Sampleable<bool>>> {
    let dist: Box<dyn Sampleable<bool>> = Box::new(Bernoulli::new(args.copied(Role::Probability)?));
    Ok(dist)
}

/// One model instance: the graph that owns every node, and the RNG its
/// stochastic nodes draw from.
///
/// Independent chains each get their own `Model` via [`Model::replicate`].
#[derive(Debug)]
pub struct Model {
    dag: Dag,
    g: Pcg64,
}
impl Model {
    pub fn new(seed: u64) -> Self {
        Self {
            dag: Dag::new(),
            g: Pcg64::seed_from_u64(seed),
        }
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn dag_mut(&mut self) -> &mut Dag {
        &mut self.dag
    }

    pub fn rng(&mut self) -> &mut Pcg64 {
        &mut self.g
    }

    pub fn parts(&mut self) -> (&mut Dag, &mut Pcg64) {
        (&mut self.dag, &mut self.g)
    }

    pub fn val<A: Value>(&mut self, name: &str, a: A) -> NodeRef<A> {
        self.dag.constant(name, a)
    }

    pub fn map<A: Value, B: Value>(
        &mut self,
        name: &str,
        x: NodeRef<A>,
        f: fn(&A) -> B,
    ) -> Result<NodeRef<B>> {
        let params = Params::new().with(Role::Arg(0), x);
        self.dag
            .deterministic(name, params, move |args| Ok(f(args.get::<A>(Role::Arg(0))?)))
    }

    pub fn map2<A: Value, B: Value, C: Value>(
        &mut self,
        name: &str,
        x: NodeRef<A>,
        y: NodeRef<B>,
        f: fn(&A, &B) -> C,
    ) -> Result<NodeRef<C>> {
        let params = Params::new().with(Role::Arg(0), x).with(Role::Arg(1), y);
        self.dag.deterministic(name, params, move |args| {
            Ok(f(args.get::<A>(Role::Arg(0))?, args.get::<B>(Role::Arg(1))?))
        })
    }

    pub fn normal(
        &mut self,
        name: &str,
        mean: NodeRef<f64>,
        sd: NodeRef<f64>,
    ) -> Result<NodeRef<f64>> {
        let params = Params::new().with(Role::Mean, mean).with(Role::StdDev, sd);
        self.dag.stochastic(name, params, normal_s, &mut self.g)
    }

    pub fn uniform(
        &mut self,
        name: &str,
        lower: NodeRef<f64>,
        upper: NodeRef<f64>,
    ) -> Result<NodeRef<f64>> {
        let params = Params::new().with(Role::Lower, lower).with(Role::Upper, upper);
        self.dag.stochastic(name, params, uniform_s, &mut self.g)
    }

    pub fn exponential(&mut self, name: &str, rate: NodeRef<f64>) -> Result<NodeRef<f64>> {
        let params = Params::new().with(Role::Rate, rate);
        self.dag.stochastic(name, params, exponential_s, &mut self.g)
    }

    pub fn flip(&mut self, name: &str, p: NodeRef<f64>) -> Result<NodeRef<bool>> {
        let params = Params::new().with(Role::Probability, p);
        self.dag.stochastic(name, params, bern_s, &mut self.g)
    }

    /// Draws one of `outcomes` with probabilities proportional to `weights`.
    pub fn categorical<A: Value + PartialEq>(
        &mut self,
        name: &str,
        outcomes: Vec<A>,
        weights: NodeRef<Vec<f64>>,
    ) -> Result<NodeRef<A>> {
        let params = Params::new().with(Role::Weights, weights);
        self.dag.stochastic(
            name,
            params,
            move |args| {
                let weights = args.get::<Vec<f64>>(Role::Weights)?;
                let list = outcomes.iter().cloned().zip(weights.iter().copied()).collect();
                let categorical = Categorical::new(list).ok_or_else(|| {
                    DagError::structural(args.owner(), "categorical needs at least one outcome")
                })?;
                let dist: Box<dyn Sampleable<A>> = Box::new(categorical);
                Ok(dist)
            },
            &mut self.g,
        )
    }

    /// A stochastic node pinned to the value of `x`; any other value has
    /// zero probability.
    pub fn point<A: Value + PartialEq>(&mut self, name: &str, x: NodeRef<A>) -> Result<NodeRef<A>> {
        let params = Params::new().with(Role::Arg(0), x);
        self.dag.stochastic(
            name,
            params,
            |args| {
                let dist: Box<dyn Sampleable<A>> =
                    Box::new(Dirac::new(args.get::<A>(Role::Arg(0))?.clone()));
                Ok(dist)
            },
            &mut self.g,
        )
    }

    /// Clamps a stochastic node to observed data.
    pub fn observe<A: Value>(&mut self, node: NodeRef<A>, value: A) -> Result<()> {
        self.dag.clamp(node, value)
    }

    pub fn redraw(&mut self, id: impl Into<NodeId>) -> Result<()> {
        self.dag.redraw(id, &mut self.g)
    }

    /// Joint log-probability of every stochastic node.
    pub fn ln_probability(&mut self) -> Result<LogLikelihood> {
        let ids: Vec<NodeId> = self.dag.stochastic_nodes().collect();
        ids.into_iter().map(|id| self.dag.ln_probability(id)).sum()
    }

    /// An independent copy of the whole model with its own RNG.
    pub fn replicate(&self, seed: u64) -> Model {
        log::debug!("replicating model of {} nodes", self.dag.len());
        Model {
            dag: self.dag.clone(),
            g: Pcg64::seed_from_u64(seed),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dag::NodeSet;
    use crate::distributions::rejected_ll;

    #[test]
    fn joint_probability_tracks_changes() {
        let mut model = Model::new(1337);
        let zero = model.val("zero", 0.0);
        let one = model.val("one", 1.0);
        let mu = model.normal("mu", zero, one).unwrap();
        let x = model.normal("x", mu, one).unwrap();
        model.observe(x, 0.5).unwrap();

        let total = model.ln_probability().unwrap();
        let m = *model.dag_mut().value(mu).unwrap();
        let expected =
            Normal::new(0.0, 1.0).log_density(&m) + Normal::new(m, 1.0).log_density(&0.5);
        assert!((total - expected).abs() < 1e-12);

        // the local ratio equals the change of the joint density
        model.redraw(mu).unwrap();
        let mut affected = NodeSet::new();
        model.dag().affected_nodes(mu, &mut affected).unwrap();
        let mut ratio = model.dag_mut().ln_probability_ratio(mu).unwrap();
        for s in affected.iter() {
            ratio += model.dag_mut().ln_probability_ratio(s).unwrap();
        }
        let new_total = model.ln_probability().unwrap();
        assert!((new_total - total - ratio).abs() < 1e-9);
        model.dag_mut().restore(mu).unwrap();
        assert_eq!(model.ln_probability().unwrap(), total);
    }

    #[test]
    fn builders_wire_roles() {
        let mut model = Model::new(2);
        let half = model.val("half", 0.5);
        let coin = model.flip("coin", half).unwrap();
        let rate = model.val("rate", 2.0);
        let wait = model.exponential("wait", rate).unwrap();
        let lo = model.val("lo", -1.0);
        let hi = model.val("hi", 1.0);
        let u = model.uniform("u", lo, hi).unwrap();

        let neg = model.map("neg", u, |x| -x).unwrap();
        let both = model.map2("both", coin, wait, |c, w| if *c { *w } else { 0.0 }).unwrap();

        let dag = model.dag_mut();
        assert_eq!(dag.params(coin).unwrap().unwrap().get(Role::Probability), Some(half.id()));
        assert!(*dag.value(wait).unwrap() >= 0.0);
        let x = *dag.value(u).unwrap();
        assert!((-1.0..1.0).contains(&x));
        assert_eq!(*dag.value(neg).unwrap(), -x);
        let expected = if *dag.value(coin).unwrap() { *dag.value(wait).unwrap() } else { 0.0 };
        assert_eq!(*dag.value(both).unwrap(), expected);
    }

    #[test]
    fn categorical_follows_weights() {
        let mut model = Model::new(4);
        let weights = model.val("weights", vec![0.0, 1.0]);
        let pick = model
            .categorical("pick", vec![10u32, 20], weights)
            .unwrap();
        assert_eq!(*model.dag_mut().value(pick).unwrap(), 20);
        model.dag_mut().set_value(weights, vec![1.0, 0.0]).unwrap();
        assert_eq!(
            model.dag_mut().ln_probability(pick).unwrap(),
            f64::NEG_INFINITY
        );
        model.dag_mut().restore(weights).unwrap();
        assert_eq!(model.dag_mut().ln_probability(pick).unwrap(), 0.0);
    }

    #[test]
    fn point_follows_its_parameter() {
        let mut model = Model::new(6);
        let x = model.val("x", 3i64);
        let p = model.point("p", x).unwrap();
        assert_eq!(*model.dag_mut().value(p).unwrap(), 3);
        assert_eq!(model.dag_mut().ln_probability(p).unwrap(), 0.0);

        model.dag_mut().set_value(p, 4).unwrap();
        assert!(rejected_ll(model.dag_mut().ln_probability(p).unwrap()));
        model.dag_mut().restore(p).unwrap();

        model.dag_mut().set_value(x, 5).unwrap();
        assert!(rejected_ll(model.dag_mut().ln_probability(p).unwrap()));
        model.redraw(p).unwrap();
        assert_eq!(*model.dag_mut().value(p).unwrap(), 5);
        assert_eq!(model.dag_mut().ln_probability(p).unwrap(), 0.0);
    }

    #[test]
    fn bad_parameters_do_not_panic() {
        let mut model = Model::new(8);
        let weights = model.val("weights", vec![1.0]);
        let before = model.dag().len();
        assert!(matches!(
            model.categorical::<u32>("none", vec![], weights),
            Err(DagError::Structural { .. })
        ));
        assert_eq!(model.dag().len(), before);

        let two = model.val("two", 2.0);
        let coin = model.flip("coin", two).unwrap();
        assert!(rejected_ll(model.dag_mut().ln_probability(coin).unwrap()));
        let u = model.uniform("u", two, two).unwrap();
        assert!(rejected_ll(model.dag_mut().ln_probability(u).unwrap()));
    }

    #[test]
    fn replicas_run_on_their_own_threads() {
        let mut model = Model::new(21);
        let zero = model.val("zero", 0.0);
        let one = model.val("one", 1.0);
        let mu = model.normal("mu", zero, one).unwrap();
        let start = *model.dag_mut().value(mu).unwrap();

        let handles: Vec<_> = (0..4u64)
            .map(|seed| {
                let mut replica = model.replicate(seed);
                std::thread::spawn(move || {
                    replica.redraw(mu).unwrap();
                    replica.dag_mut().keep(mu).unwrap();
                    *replica.dag_mut().value(mu).unwrap()
                })
            })
            .collect();
        let chains: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(*model.dag_mut().value(mu).unwrap(), start);
        assert!(chains.iter().all(|&x| x != start));
        assert_ne!(chains[0], chains[1]);
    }
}
