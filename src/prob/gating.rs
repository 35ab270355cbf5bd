use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use rand::distributions::WeightedIndex;
use rand_distr::Distribution;

/// Categorical distribution over mixture components, paired with a conjugate prior over its
/// weights. Gating statistics are per-component (hard or soft) assignment counts; each prior
/// family maps them into its own natural parameter layout.
pub trait GatingDistribution
where
    Self : Debug + Clone + Sized
{

    type Prior : ConjugatePrior;

    fn prior(&self) -> &Self::Prior;

    fn posterior(&self) -> &Self::Prior;

    fn set_posterior(&mut self, posterior : Self::Prior);

    fn promote(&mut self);

    /// Number of components (truncation level).
    fn size(&self) -> usize;

    /// Weights sampled at the last Gibbs step (or the prior mean before any sampling).
    fn probs(&self) -> &DVector<f64>;

    fn sample_probs<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized;

    /// Draws a weight vector from the prior, leaving the state untouched.
    fn sample_prior_probs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized;

    /// Maps per-component counts into the natural parameter layout of the prior.
    fn statistics(&self, counts : &DVector<f64>) -> DVector<f64>;

    /// E[ln pi_k] under the posterior.
    fn expected_log_probs(&self) -> DVector<f64>;

    /// Posterior mean of the weights.
    fn mean(&self) -> DVector<f64>;

    /// ln pi_k for the sampled weights.
    fn log_likelihood(&self) -> DVector<f64> {
        self.probs().map(|p| p.ln() )
    }

    /// Draws n component labels from the sampled weights.
    fn rvs<R>(&self, n : usize, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        let distr = WeightedIndex::new(self.probs().iter())
            .map_err(|e| BayesError::InvalidHyperparameter(format!("{}", e)) )?;
        Ok((0..n).map(|_| distr.sample(rng) ).collect())
    }

    /// Draws n labels from weights drawn from the prior.
    fn rvs_from_prior<R>(&self, n : usize, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        let probs = self.sample_prior_probs(rng)?;
        (0..n).map(|_| sample_index(probs.as_slice(), rng) ).collect()
    }

    fn resample<R>(&mut self, counts : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        BayesError::check_dim(self.size(), counts.nrows())?;
        let eta = self.prior().link() + self.statistics(counts);
        let post = posterior_or_prior(self.prior(), &eta);
        self.set_posterior(post);
        self.sample_probs(rng)
    }

    fn meanfield_update(&mut self, counts : &DVector<f64>) -> Result<(), BayesError> {
        BayesError::check_dim(self.size(), counts.nrows())?;
        let eta = self.prior().link() + self.statistics(counts);
        let post = posterior_or_prior(self.prior(), &eta);
        self.set_posterior(post);
        Ok(())
    }

    fn meanfield_sgdstep(&mut self, counts : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        BayesError::check_dim(self.size(), counts.nrows())?;
        let stats = self.statistics(counts);
        let eta = natural_gradient_step(&self.posterior().link(), &self.prior().link(), &stats, prob, stepsize);
        match self.posterior().link_inverse(&eta) {
            Ok(post) => self.set_posterior(post),
            Err(e) => log::warn!("Rejected gating step leaving the parameter domain ({})", e)
        }
        Ok(())
    }

    fn variational_lowerbound(&self) -> f64 {
        -self.posterior().kl_divergence(self.prior())
    }

}

/// Draws an index from unnormalized non-negative weights.
pub(crate) fn sample_index<R>(weights : &[f64], rng : &mut R) -> Result<usize, BayesError>
where
    R : Rng + ?Sized
{
    let distr = WeightedIndex::new(weights)
        .map_err(|e| BayesError::InvalidHyperparameter(format!("{}", e)) )?;
    Ok(distr.sample(rng))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GatingKind {
    Dirichlet,
    StickBreaking
}

/// The gating variants a mixture can carry. The Dirichlet variant assumes a fixed
/// number of components; the stick-breaking variant is the truncated Dirichlet-process prior,
/// which leaves surplus components unused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Gating {
    Dirichlet(CategoricalWithDirichlet),
    StickBreaking(CategoricalWithStickBreaking)
}

macro_rules! dispatch {
    ($self:expr, $g:ident => $body:expr) => {
        match $self {
            Gating::Dirichlet($g) => $body,
            Gating::StickBreaking($g) => $body
        }
    }
}

impl Gating {

    /// Dirichlet gating with concentration alpha on every component, or truncated stick-breaking
    /// with unit gammas and deltas equal to alpha.
    pub fn new(kind : GatingKind, size : usize, alpha : f64) -> Result<Self, BayesError> {
        if size == 0 {
            return Err(BayesError::InvalidComponentCount);
        }
        match kind {
            GatingKind::Dirichlet => Ok(Gating::Dirichlet(CategoricalWithDirichlet::new(Dirichlet::symmetric(size, alpha)?))),
            GatingKind::StickBreaking => Ok(Gating::StickBreaking(CategoricalWithStickBreaking::new(StickBreaking::truncated(size, alpha)?)))
        }
    }

    pub fn kind(&self) -> GatingKind {
        match self {
            Gating::Dirichlet(_) => GatingKind::Dirichlet,
            Gating::StickBreaking(_) => GatingKind::StickBreaking
        }
    }

    pub fn size(&self) -> usize {
        dispatch!(self, g => g.size())
    }

    pub fn probs(&self) -> &DVector<f64> {
        dispatch!(self, g => g.probs())
    }

    pub fn log_likelihood(&self) -> DVector<f64> {
        dispatch!(self, g => g.log_likelihood())
    }

    pub fn expected_log_likelihood(&self) -> DVector<f64> {
        dispatch!(self, g => g.expected_log_probs())
    }

    pub fn mean(&self) -> DVector<f64> {
        dispatch!(self, g => g.mean())
    }

    pub fn rvs<R>(&self, n : usize, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        dispatch!(self, g => g.rvs(n, rng))
    }

    pub fn rvs_from_prior<R>(&self, n : usize, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        dispatch!(self, g => g.rvs_from_prior(n, rng))
    }

    pub fn resample<R>(&mut self, counts : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        dispatch!(self, g => g.resample(counts, rng))
    }

    pub fn meanfield_update(&mut self, counts : &DVector<f64>) -> Result<(), BayesError> {
        dispatch!(self, g => g.meanfield_update(counts))
    }

    pub fn meanfield_sgdstep(&mut self, counts : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        dispatch!(self, g => g.meanfield_sgdstep(counts, prob, stepsize))
    }

    pub fn variational_lowerbound(&self) -> f64 {
        dispatch!(self, g => g.variational_lowerbound())
    }

    pub fn promote(&mut self) {
        dispatch!(self, g => g.promote())
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn gating_variants_share_behavior() {
        let mut rng = StdRng::seed_from_u64(7);
        let counts = DVector::from_vec(vec![50., 0., 0., 0.]);
        for kind in [GatingKind::Dirichlet, GatingKind::StickBreaking].iter() {
            let mut gating = Gating::new(*kind, 4, 1.).unwrap();
            gating.resample(&counts, &mut rng).unwrap();
            assert!((gating.probs().sum() - 1.).abs() < 1E-10);
            gating.meanfield_update(&counts).unwrap();
            let mean = gating.mean();
            assert!(mean[0] > 0.8);
            let labels = gating.rvs(10, &mut rng).unwrap();
            assert!(labels.iter().all(|l| *l < 4 ));
            assert!(gating.variational_lowerbound() <= 0.);
        }
        assert!(Gating::new(GatingKind::Dirichlet, 0, 1.).is_err());
    }

    #[test]
    fn promoted_prior_keeps_divergence_at_zero() {
        let mut gating = Gating::new(GatingKind::StickBreaking, 3, 2.).unwrap();
        gating.meanfield_update(&DVector::from_vec(vec![4., 2., 1.])).unwrap();
        gating.promote();
        assert!(gating.variational_lowerbound().abs() < 1E-10);
    }

}
