use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::mixture::*;
use crate::prob::sample_index;
use super::*;

/// Runs a fixed number of Gibbs sweeps. Convergence is not checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Gibbs {

    pub iters : usize

}

impl<C> Estimator<C> for Gibbs
where
    C : Component
{

    type Trace = ();

    fn fit<R>(&self, mixture : &mut Mixture<C>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        mixture.resample_model(self.iters, rng)
    }

}

impl<C> Mixture<C>
where
    C : Component
{

    /// One Gibbs sweep: component parameters given the labels, gating weights given the
    /// label counts, then every label given the new parameters. Without data, components
    /// and gating are drawn from their priors.
    pub fn resample<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let weights = self.label_weights();
        let stats = self.component_statistics(&weights);
        for (c, s) in self.components.iter_mut().zip(stats.iter()) {
            c.gibbs_step(s, rng)?;
        }
        let counts = self.weight_counts(&weights);
        self.gating.resample(&counts, rng)?;
        self.resample_labels(rng)
    }

    /// Redraws every label from the normalized joint scores under the current samples.
    pub fn resample_labels<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let mut labels = Vec::with_capacity(self.batches.len());
        for batch in self.batches.iter() {
            labels.push(self.sample_labels(batch, rng)?);
        }
        self.labels = labels;
        Ok(())
    }

    /// Runs maxiter Gibbs sweeps.
    pub fn resample_model<R>(&mut self, maxiter : usize, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        for it in 0..maxiter {
            self.resample(rng)?;
            log::debug!("Gibbs sweep {}: {} used components", it, self.used_labels().len());
        }
        Ok(())
    }

    /// Gibbs-step responsibilities (normalized joint scores under the current samples) per batch.
    pub fn responsibilities(&self) -> Vec<DMatrix<f64>> {
        self.batches.iter()
            .map(|b| normalize_rows(&self.log_scores(b).0) )
            .collect()
    }

    /// Draws one label for each row of a batch from the current responsibilities,
    /// without attaching the batch.
    pub fn sample_labels_for<R>(&self, target : DMatrix<f64>, input : Option<DMatrix<f64>>, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        let batch = self.prepare(target, input)?;
        let probs = normalize_rows(&self.log_scores(&batch).0);
        probs.row_iter()
            .map(|row| sample_index(row.transpose().as_slice(), rng) )
            .collect()
    }

}
