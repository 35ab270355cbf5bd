use nalgebra::*;
use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::mixture::*;

/// Gibbs sampling over labels, component parameters and gating weights.
pub mod gibbs;

/// Mean-field coordinate ascent on the variational lower bound.
pub mod meanfield;

/// Stochastic (minibatch) natural-gradient variational updates.
pub mod svi;

/// Runs independent fits over a set of seeds in worker threads.
pub mod pool;

pub use gibbs::Gibbs;

pub use meanfield::{Meanfield, MeanfieldOutcome};

pub use svi::Stochastic;

/// Trait shared by the inference passes. Each pass mutates the component and gating posteriors
/// (and the labels) of a mixture holding data, and reports a pass-specific trace. Passes are
/// interchangeable: a caller may run any sequence of them over the same mixture, and all the
/// randomness they consume comes from the informed generator.
pub trait Estimator<C>
where
    C : Component
{

    type Trace;

    fn fit<R>(&self, mixture : &mut Mixture<C>, rng : &mut R) -> Result<Self::Trace, BayesError>
    where
        R : Rng + ?Sized;

}

/// Numerically stable ln sum exp(v). Returns negative infinity for an empty or all-negative-infinity input.
pub fn logsumexp<I>(v : I) -> f64
where
    I : IntoIterator<Item=f64>
{
    let v : Vec<f64> = v.into_iter().collect();
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + v.iter().map(|s| (s - max).exp() ).sum::<f64>().ln()
}

/// Exponentiates and normalizes each row of a log-score matrix, subtracting the row maximum first.
/// Rows without any finite score are spread uniformly.
pub fn normalize_rows(scores : &DMatrix<f64>) -> DMatrix<f64> {
    let mut probs = DMatrix::zeros(scores.nrows(), scores.ncols());
    for (i, row) in scores.row_iter().enumerate() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            probs.row_mut(i).fill(1. / scores.ncols() as f64);
            continue;
        }
        let exp = row.map(|s| (s - max).exp() );
        let total = exp.sum();
        probs.row_mut(i).copy_from(&exp.unscale(total));
    }
    probs
}

/// Zeroes the rows of a responsibility matrix not flagged as observed.
pub(crate) fn mask_rows(mut resp : DMatrix<f64>, observed : &[bool]) -> DMatrix<f64> {
    for (i, o) in observed.iter().enumerate() {
        if !*o {
            resp.row_mut(i).fill(0.);
        }
    }
    resp
}

pub(crate) fn argmax_rows(resp : &DMatrix<f64>) -> Vec<usize> {
    resp.row_iter().map(|row| row.transpose().imax() ).collect()
}

/// Iteration counts, minibatch sizes and tolerances of the super-iteration protocol. Each
/// super-iteration runs the Gibbs, stochastic and mean-field passes in this order (any of them
/// may be disabled with a zero iteration count), and optionally promotes posteriors to priors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {

    pub super_iters : usize,

    pub gibbs_iters : usize,

    pub svi_iters : usize,

    pub svi_batch_size : usize,

    pub svi_step_size : f64,

    pub vi_iters : usize,

    pub vi_tolerance : f64,

    /// Promote posteriors to priors between super-iterations.
    pub promote : bool,

    pub seed : u64

}

impl Default for Schedule {

    fn default() -> Self {
        Self {
            super_iters : 1,
            gibbs_iters : 50,
            svi_iters : 0,
            svi_batch_size : 64,
            svi_step_size : 5E-1,
            vi_iters : 500,
            vi_tolerance : 1E-8,
            promote : false,
            seed : 1337
        }
    }

}

impl Schedule {

    pub fn gibbs(&self) -> Gibbs {
        Gibbs { iters : self.gibbs_iters }
    }

    pub fn stochastic(&self) -> Stochastic {
        Stochastic {
            iters : self.svi_iters,
            batch_size : self.svi_batch_size,
            step_size : self.svi_step_size
        }
    }

    pub fn meanfield(&self) -> Meanfield {
        Meanfield { tolerance : self.vi_tolerance, maxiter : self.vi_iters }
    }

}

/// Runs the schedule over a mixture holding data, returning the outcome of every mean-field pass.
pub fn run<C, R>(mixture : &mut Mixture<C>, schedule : &Schedule, rng : &mut R) -> Result<Vec<MeanfieldOutcome>, BayesError>
where
    C : Component,
    R : Rng + ?Sized
{
    if !mixture.has_data() {
        return Err(BayesError::NoData);
    }
    let mut outcomes = Vec::new();
    for it in 0..schedule.super_iters {
        if schedule.gibbs_iters > 0 {
            schedule.gibbs().fit(mixture, rng)?;
        }
        if schedule.svi_iters > 0 {
            schedule.stochastic().fit(mixture, rng)?;
        }
        if schedule.vi_iters > 0 {
            outcomes.push(schedule.meanfield().fit(mixture, rng)?);
        }
        log::info!("Super-iteration {} finished with {} used components", it, mixture.used_labels().len());
        if schedule.promote && it + 1 < schedule.super_iters {
            mixture.promote();
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {

    use super::*;

    const EPS : f64 = 1E-10;

    #[test]
    fn stable_logsumexp() {
        let v = vec![1000., 1000.];
        assert!((logsumexp(v.iter().cloned()) - (1000. + 2f64.ln())).abs() < EPS);
        let empty : Vec<f64> = Vec::new();
        assert_eq!(logsumexp(empty.iter().cloned()), f64::NEG_INFINITY);
        let scores = DMatrix::from_row_slice(2, 2, &[0., 0., f64::NEG_INFINITY, 3.]);
        assert!((logsumexp(scores.row(0).iter().cloned()) - 2f64.ln()).abs() < EPS);
        assert!((logsumexp(scores.row(1).iter().cloned()) - 3.).abs() < EPS);
    }

    #[test]
    fn normalized_rows_are_stochastic() {
        let scores = DMatrix::from_row_slice(3, 3, &[
            -1000., -1001., -1002.,
            0., f64::NEG_INFINITY, 1.,
            f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY
        ]);
        let probs = normalize_rows(&scores);
        for row in probs.row_iter() {
            assert!((row.sum() - 1.).abs() < EPS);
        }
        assert_eq!(probs[(1, 1)], 0.);
        assert_eq!(argmax_rows(&probs)[0], 0);
    }

}
