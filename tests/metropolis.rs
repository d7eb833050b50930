//! A small Metropolis sampler driving the graph through its public API,
//! the way an external move scheduler would.

use anyhow::{Context, ensure};
use probdag::distributions::rejected_ll;
use probdag::{Model, NodeId, NodeRef, NodeSet};
use rand::Rng;

struct Sampler {
    model: Model,
    // random-walk moves
    sliding: Vec<NodeRef<f64>>,
    // independence moves drawing from the prior
    redrawn: Vec<NodeId>,
    window: f64,
}

impl Sampler {
    fn step(&mut self) -> anyhow::Result<bool> {
        let (dag, g) = self.model.parts();
        let n = self.sliding.len() + self.redrawn.len();
        let i = g.random_range(0..n);
        let (origin, mut ratio) = if i < self.sliding.len() {
            let r = self.sliding[i];
            let x = *dag.value(r)?;
            let step = g.random_range(-self.window..self.window);
            dag.set_value(r, x + step)?;
            (r.id(), dag.ln_probability_ratio(r)?)
        } else {
            // the prior term cancels against the proposal density
            let id = self.redrawn[i - self.sliding.len()];
            dag.redraw(id, g)?;
            (id, 0.0)
        };
        let mut affected = NodeSet::new();
        dag.affected_nodes(origin, &mut affected)?;
        for s in affected.iter() {
            ratio += dag.ln_probability_ratio(s)?;
        }
        let accept = !rejected_ll(ratio) && (ratio >= 0.0 || g.random::<f64>() < ratio.exp());
        if accept {
            dag.keep(origin)?;
        } else {
            dag.restore(origin)?;
        }
        Ok(accept)
    }
}

#[test]
fn normal_mean_posterior() -> anyhow::Result<()> {
    let mut model = Model::new(1337);
    let zero = model.val("zero", 0.0);
    let one = model.val("one", 1.0);
    let mu = model.normal("mu", zero, one)?;
    let data = [1.0, 2.0, 1.5, 0.5];
    for (i, &x) in data.iter().enumerate() {
        let obs = model.normal(&format!("x{}", i), mu, one)?;
        model.observe(obs, x)?;
    }

    let mut sampler = Sampler {
        model,
        sliding: vec![mu],
        redrawn: vec![],
        window: 1.0,
    };
    let mut total = 0.0;
    let mut accepted = 0;
    for i in 0..22000 {
        accepted += sampler.step()? as u32;
        if i >= 2000 {
            total += *sampler.model.dag_mut().value(mu)?;
        }
        for id in sampler.model.dag().node_ids() {
            ensure!(!sampler.model.dag().is_touched(id)?, "node {} left touched", id);
        }
    }
    let mean = total / 20000.0;
    // conjugate posterior mean: sum(x) / (n + 1)
    let expected = data.iter().sum::<f64>() / (data.len() as f64 + 1.0);
    ensure!((mean - expected).abs() < 0.1, "mean: {}, expected: {}", mean, expected);
    ensure!(accepted > 2000, "accepted only {}", accepted);
    Ok(())
}

#[test]
fn conjunction_of_flips() -> anyhow::Result<()> {
    let mut model = Model::new(1337);
    let lo = model.val("lo", 0.0);
    let hi = model.val("hi", 1.0);
    let half = model.val("half", 0.5);
    let c = model.uniform("c", lo, hi)?;
    let d = model.flip("d", half)?;
    let e = model.flip("e", c)?;
    let result = model.map2("result", d, e, |a, b| *a && *b)?;

    let mut sampler = Sampler {
        model,
        sliding: vec![],
        redrawn: vec![c.id(), d.id(), e.id()],
        window: 0.0,
    };
    let mut hits = 0;
    for i in 0..6000 {
        sampler.step()?;
        if i >= 2000 && *sampler.model.dag_mut().value(result)? {
            hits += 1;
        }
    }
    let delta = (hits as f64 - 1000.0).abs() / 4000.0;
    ensure!(delta < 0.05, "delta: {}, hits: {}", delta, hits);
    Ok(())
}

#[test]
fn rejected_proposals_leave_no_trace() -> anyhow::Result<()> {
    let mut model = Model::new(99);
    let zero = model.val("zero", 0.0);
    let tiny = model.val("tiny", 0.01);
    let mu = model.normal("mu", zero, tiny)?;
    let shifted = model.map("shifted", mu, |m| m + 10.0)?;
    let obs = model.normal("obs", shifted, tiny)?;
    model.observe(obs, 10.0)?;

    let before_mu = *model.dag_mut().value(mu)?;
    let before_ll = model.ln_probability()?;
    let mut sampler = Sampler {
        model,
        sliding: vec![mu],
        redrawn: vec![],
        window: 1000.0,
    };
    // a window this wide against sd 0.01 is essentially always rejected
    let accepted = (0..20).map(|_| sampler.step()).collect::<anyhow::Result<Vec<bool>>>()?;
    let accepted = accepted.iter().filter(|&&a| a).count();
    ensure!(accepted == 0, "accepted {} proposals", accepted);

    let dag = sampler.model.dag_mut();
    ensure!(*dag.value(mu)? == before_mu);
    ensure!(*dag.value(shifted)? == before_mu + 10.0);
    let after_ll = sampler.model.ln_probability().context("joint density")?;
    ensure!(after_ll.to_bits() == before_ll.to_bits());
    Ok(())
}
