use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::mixture::*;
use super::*;

/// Mean-field coordinate ascent, stopping when consecutive lower bounds differ by less than
/// tolerance or after maxiter iterations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Meanfield {

    pub tolerance : f64,

    pub maxiter : usize

}

/// Lower bounds seen by a mean-field pass, one per iteration, and whether the pass stopped
/// by tolerance (rather than by reaching the iteration cap).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeanfieldOutcome {

    pub iterations : usize,

    pub lowerbounds : Vec<f64>,

    pub converged : bool

}

impl MeanfieldOutcome {

    pub fn lowerbound(&self) -> Option<f64> {
        self.lowerbounds.last().cloned()
    }

}

impl<C> Estimator<C> for Meanfield
where
    C : Component
{

    type Trace = MeanfieldOutcome;

    fn fit<R>(&self, mixture : &mut Mixture<C>, _rng : &mut R) -> Result<MeanfieldOutcome, BayesError>
    where
        R : Rng + ?Sized
    {
        mixture.meanfield_coordinate_descent(self.tolerance, self.maxiter)
    }

}

impl<C> Mixture<C>
where
    C : Component
{

    /// Mean-field responsibilities (normalized expected joint scores) per batch. Every row,
    /// including rows with missing values (scored by the gating alone), sums to one.
    pub fn meanfield_responsibilities(&self) -> Vec<DMatrix<f64>> {
        self.batches.iter()
            .map(|b| normalize_rows(&self.expected_log_scores(b).0) )
            .collect()
    }

    /// Responsibilities with missing rows zeroed, and the data term of the lower bound:
    /// the sum over observed rows of ln sum_k exp(E[ln pi_k] + E[ln p(row | theta_k)]).
    fn meanfield_local(&self) -> (Vec<DMatrix<f64>>, Vec<DMatrix<f64>>, f64) {
        let mut masked = Vec::with_capacity(self.batches.len());
        let mut resps = Vec::with_capacity(self.batches.len());
        let mut data_term = 0.0;
        for b in self.batches.iter() {
            let (scores, observed) = self.expected_log_scores(b);
            data_term += scores.row_iter()
                .zip(observed.iter())
                .filter(|(_, o)| **o )
                .map(|(row, _)| logsumexp(row.iter().cloned()) )
                .sum::<f64>();
            let resp = normalize_rows(&scores);
            masked.push(mask_rows(resp.clone(), &observed));
            resps.push(resp);
        }
        (masked, resps, data_term)
    }

    fn meanfield_global(&mut self, masked : &[DMatrix<f64>]) -> Result<(), BayesError> {
        let stats = self.component_statistics(masked);
        for (c, s) in self.components.iter_mut().zip(stats.iter()) {
            c.meanfield_step(s)?;
        }
        let counts = self.weight_counts(masked);
        self.gating.meanfield_update(&counts)
    }

    fn prior_lowerbound(&self) -> f64 {
        self.components.iter().map(|c| c.lowerbound() ).sum::<f64>() + self.gating.variational_lowerbound()
    }

    /// Variational lower bound at the current posteriors, with the responsibilities at their optimum.
    pub fn variational_lowerbound(&self) -> f64 {
        let (_, _, data_term) = self.meanfield_local();
        data_term + self.prior_lowerbound()
    }

    /// One coordinate-ascent step: responsibilities from the current posteriors, then component
    /// and gating posteriors from the responsibility-weighted statistics. Labels are set to the
    /// most responsible component of each row.
    pub fn meanfield_update(&mut self) -> Result<(), BayesError> {
        let (masked, resps, _) = self.meanfield_local();
        self.meanfield_global(&masked)?;
        self.labels = resps.iter().map(argmax_rows).collect();
        Ok(())
    }

    pub fn meanfield_coordinate_descent(&mut self, tolerance : f64, maxiter : usize) -> Result<MeanfieldOutcome, BayesError> {
        if !self.has_data() {
            return Err(BayesError::NoData);
        }
        let mut lowerbounds : Vec<f64> = Vec::new();
        let mut converged = false;
        for it in 0..maxiter {
            let (masked, resps, data_term) = self.meanfield_local();
            let vlb = data_term + self.prior_lowerbound();
            log::debug!("Mean-field iteration {}: lower bound {}", it, vlb);
            let stop = lowerbounds.last().map(|prev| (vlb - prev).abs() < tolerance ).unwrap_or(false);
            lowerbounds.push(vlb);
            self.labels = resps.iter().map(argmax_rows).collect();
            if stop {
                converged = true;
                break;
            }
            self.meanfield_global(&masked)?;
        }
        if converged {
            log::info!("Mean-field converged after {} iterations", lowerbounds.len());
        } else {
            log::info!("Mean-field reached the iteration cap ({})", maxiter);
        }
        Ok(MeanfieldOutcome { iterations : lowerbounds.len(), lowerbounds, converged })
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::prob::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn lowerbound_is_monotone() {
        let mut rng = StdRng::seed_from_u64(31);
        let mut y = standard_normal(80, 2, &mut rng);
        for i in 40..80 {
            y[(i, 1)] += 6.;
        }
        y[(3, 0)] = f64::NAN;
        let prior = NormalWishart::new(DVector::zeros(2), 0.01, DMatrix::identity(2, 2), 3.).unwrap();
        let mut mix = MixtureOfGaussians::with_prior(Gating::new(GatingKind::StickBreaking, 4, 1.).unwrap(), prior).unwrap();
        mix.add_data(y, None, false, LabelInit::Prior, &mut rng).unwrap();
        mix.resample_model(3, &mut rng).unwrap();
        let outcome = mix.meanfield_coordinate_descent(1E-10, 100).unwrap();
        for w in outcome.lowerbounds.windows(2) {
            assert!(w[1] >= w[0] - 1E-6);
        }
        for resp in mix.meanfield_responsibilities() {
            for row in resp.row_iter() {
                assert!((row.sum() - 1.).abs() < 1E-10);
            }
        }
    }

    #[test]
    fn empty_mixture_reports_no_data() {
        let prior = NormalWishart::new(DVector::zeros(1), 1., DMatrix::identity(1, 1), 2.).unwrap();
        let mut mix = MixtureOfGaussians::with_prior(Gating::new(GatingKind::Dirichlet, 2, 1.).unwrap(), prior).unwrap();
        assert!(mix.meanfield_coordinate_descent(1E-6, 10).is_err());
    }

}
