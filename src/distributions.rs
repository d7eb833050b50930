use std::f64::consts::PI;
use std::fmt::Debug;

use rand::Rng;
use rand_pcg::Pcg64;

pub type LogLikelihood = f64;

/// A concrete distribution with its parameters already resolved.
///
/// Stochastic nodes rebuild one of these from their parents' current values
/// whenever the log-density has to be recomputed.
pub trait Sampleable<A> {
    fn log_density(&self, x: &A) -> LogLikelihood;
    fn sample(&self, g: &mut Pcg64) -> (A, LogLikelihood);
}
impl<A> Debug for dyn Sampleable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Distribution<{:?}>", std::any::type_name::<A>())
    }
}

pub fn rejected_ll(ll: LogLikelihood) -> bool {
    (ll.is_infinite() && ll.is_sign_negative()) || ll.is_nan()
}

#[derive(Clone, Debug)]
pub struct Dirac<A: PartialEq + Clone>(A);
impl<A: PartialEq + Clone> Dirac<A> {
    pub fn new(a: A) -> Self {
        Self(a)
    }
}
impl<A: PartialEq + Clone> Sampleable<A> for Dirac<A> {
    fn sample(&self, _: &mut Pcg64) -> (A, LogLikelihood) {
        (self.0.clone(), 0.0)
    }
    fn log_density(&self, x: &A) -> LogLikelihood {
        if *x == self.0 { 0.0 } else { f64::NEG_INFINITY }
    }
}

#[derive(Clone, Debug)]
pub struct Bernoulli {
    p: f64,
    ll1: LogLikelihood,
    ll0: LogLikelihood,
}
impl Bernoulli {
    pub fn new(p: f64) -> Self {
        let ll1 = p.ln();
        let ll0 = (1.0 - p).ln();
        Self { p, ll1, ll0 }
    }
}
impl Sampleable<bool> for Bernoulli {
    fn sample(&self, g: &mut Pcg64) -> (bool, LogLikelihood) {
        if !(0.0..=1.0).contains(&self.p) {
            return (false, f64::NAN);
        }
        let x = g.random_bool(self.p);
        if x {
            (true, self.ll1)
        } else {
            (false, self.ll0)
        }
    }
    fn log_density(&self, x: &bool) -> LogLikelihood {
        if *x { self.ll1 } else { self.ll0 }
    }
}

#[derive(Clone, Debug)]
pub struct Categorical<A: Clone + PartialEq>(Vec<(A, f64)>);
impl<A: Clone + PartialEq> Categorical<A> {
    /// `None` when there is nothing to draw from.
    pub fn new(list: Vec<(A, f64)>) -> Option<Self> {
        if list.is_empty() {
            return None;
        }
        let total = list.iter().map(|(_, p)| p).sum::<f64>();
        let norm_list = list.into_iter().map(|(a, p)| (a, p / total)).collect();
        Some(Self(norm_list))
    }
}
impl<A: Clone + PartialEq> Sampleable<A> for Categorical<A> {
    fn sample(&self, g: &mut Pcg64) -> (A, LogLikelihood) {
        let mut r = g.random::<f64>();
        for (a, p) in &self.0 {
            r -= p;
            if r < 0.0 {
                return (a.clone(), p.ln());
            }
        }
        // rounding left a sliver above the last bucket; `new` never builds
        // an empty list
        let (a, p) = &self.0[self.0.len() - 1];
        (a.clone(), p.ln())
    }
    fn log_density(&self, x: &A) -> LogLikelihood {
        let item = self.0.iter().find(|(a, _)| a == x);
        match item {
            Some((_, p)) => p.ln(),
            None => f64::NEG_INFINITY,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Uniform {
    lower: f64,
    upper: f64,
    range_ll: LogLikelihood,
}
impl Uniform {
    pub fn new(lower: f64, upper: f64) -> Self {
        let range_ll = -(upper - lower).ln();
        Self {
            lower,
            upper,
            range_ll,
        }
    }
}
impl Sampleable<f64> for Uniform {
    fn sample(&self, g: &mut Pcg64) -> (f64, LogLikelihood) {
        if !(self.lower < self.upper && (self.upper - self.lower).is_finite()) {
            return (f64::NAN, f64::NAN);
        }
        let x = g.random_range(self.lower..self.upper);
        (x, self.range_ll)
    }
    fn log_density(&self, x: &f64) -> LogLikelihood {
        if *x >= self.lower && *x <= self.upper {
            self.range_ll
        } else {
            f64::NEG_INFINITY
        }
    }
}

#[derive(Clone, Debug)]
pub struct Normal {
    mean: f64,
    sd: f64,
    norm_ll: LogLikelihood,
}
impl Normal {
    pub fn new(mean: f64, sd: f64) -> Self {
        let norm_ll = -0.5 * (2.0 * PI).ln() - sd.ln();
        Self { mean, sd, norm_ll }
    }
}
impl Sampleable<f64> for Normal {
    fn sample(&self, g: &mut Pcg64) -> (f64, LogLikelihood) {
        // Box-Muller; 1 - u keeps the log argument away from zero
        let u1 = 1.0 - g.random::<f64>();
        let u2 = g.random::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        let x = self.mean + self.sd * z;
        (x, self.log_density(&x))
    }
    fn log_density(&self, x: &f64) -> LogLikelihood {
        if self.sd <= 0.0 {
            return f64::NAN;
        }
        let z = (x - self.mean) / self.sd;
        self.norm_ll - 0.5 * z * z
    }
}

#[derive(Clone, Debug)]
pub struct Exponential {
    rate: f64,
    rate_ll: LogLikelihood,
}
impl Exponential {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            rate_ll: rate.ln(),
        }
    }
}
impl Sampleable<f64> for Exponential {
    fn sample(&self, g: &mut Pcg64) -> (f64, LogLikelihood) {
        let u = 1.0 - g.random::<f64>();
        let x = -u.ln() / self.rate;
        (x, self.log_density(&x))
    }
    fn log_density(&self, x: &f64) -> LogLikelihood {
        if *x < 0.0 {
            f64::NEG_INFINITY
        } else {
            self.rate_ll - self.rate * x
        }
    }
}
