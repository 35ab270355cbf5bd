use rand::Rng;
use rand::seq::index;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::mixture::*;
use super::*;

/// Stochastic variational inference: iters natural-gradient steps, each on batch_size rows drawn
/// without replacement from the attached data, with a constant step size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Stochastic {

    pub iters : usize,

    pub batch_size : usize,

    pub step_size : f64

}

impl<C> Estimator<C> for Stochastic
where
    C : Component
{

    type Trace = ();

    fn fit<R>(&self, mixture : &mut Mixture<C>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        mixture.meanfield_stochastic_descent(self.iters, self.step_size, self.batch_size, rng)
    }

}

impl<C> Mixture<C>
where
    C : Component
{

    fn sgdstep_batch(&mut self, batch : &Batch, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        if !(prob > 0. && prob <= 1.) {
            return Err(BayesError::InvalidHyperparameter(format!("Minibatch inclusion probability {}", prob)));
        }
        if !(stepsize > 0. && stepsize <= 1.) {
            return Err(BayesError::InvalidHyperparameter(format!("Step size {}", stepsize)));
        }
        let (scores, observed) = self.expected_log_scores(batch);
        let resp = mask_rows(normalize_rows(&scores), &observed);
        for (k, c) in self.components.iter_mut().enumerate() {
            let stats = c.sufficient_statistics(batch, &resp.column(k).clone_owned());
            c.stochastic_step(&stats, prob, stepsize)?;
        }
        let counts = resp.row_sum().transpose();
        self.gating.meanfield_sgdstep(&counts, prob, stepsize)
    }

    /// One natural-gradient step on a minibatch supplied by the caller, drawn from the full
    /// dataset with inclusion probability prob. The minibatch is not attached to the mixture.
    pub fn meanfield_sgdstep_on(
        &mut self,
        target : DMatrix<f64>,
        input : Option<DMatrix<f64>>,
        prob : f64,
        stepsize : f64
    ) -> Result<(), BayesError> {
        let batch = self.prepare(target, input)?;
        self.sgdstep_batch(&batch, prob, stepsize)
    }

    /// One natural-gradient step on batch_size rows drawn uniformly without replacement
    /// from the attached data; prob is batch_size over the total row count.
    pub fn meanfield_sgdstep<R>(&mut self, batch_size : usize, stepsize : f64, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let total = self.nb_rows();
        if total == 0 {
            return Err(BayesError::NoData);
        }
        let size = batch_size.max(1).min(total);
        let offsets : Vec<usize> = self.batches.iter()
            .scan(0, |acc, b| { let start = *acc; *acc += b.len(); Some(start) })
            .collect();
        let mut rows : Vec<(usize, usize)> = index::sample(rng, total, size).into_iter().map(|global| {
            let b = offsets.iter().rposition(|start| *start <= global ).unwrap_or(0);
            (b, global - offsets[b])
        }).collect();
        rows.sort();
        let minibatch = Batch::gather(&self.batches, &rows);
        self.sgdstep_batch(&minibatch, size as f64 / total as f64, stepsize)
    }

    /// Runs maxiter minibatch steps, then sets the labels to the most responsible components.
    pub fn meanfield_stochastic_descent<R>(
        &mut self,
        maxiter : usize,
        stepsize : f64,
        batch_size : usize,
        rng : &mut R
    ) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        for it in 0..maxiter {
            self.meanfield_sgdstep(batch_size, stepsize, rng)?;
            log::debug!("Stochastic step {} done", it);
        }
        self.labels = self.meanfield_responsibilities().iter().map(argmax_rows).collect();
        Ok(())
    }

}
