use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use rand_distr::Distribution;

/// Dirichlet distribution over the K-simplex. Natural parameter alpha paired with the
/// statistic ln pi (the base measure 1 / prod pi does not depend on alpha).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dirichlet {

    alphas : DVector<f64>

}

impl Dirichlet {

    pub fn new(alphas : DVector<f64>) -> Result<Self, BayesError> {
        if alphas.nrows() == 0 {
            return Err(BayesError::InvalidComponentCount);
        }
        if alphas.iter().any(|a| !(*a > 0.) || !a.is_finite() ) {
            return Err(BayesError::InvalidHyperparameter(format!("Dirichlet concentrations {}", alphas)));
        }
        Ok(Self { alphas })
    }

    /// Symmetric Dirichlet with concentration alpha on every component.
    pub fn symmetric(size : usize, alpha : f64) -> Result<Self, BayesError> {
        Self::new(DVector::from_element(size, alpha))
    }

    pub fn alphas(&self) -> &DVector<f64> {
        &self.alphas
    }

    pub fn size(&self) -> usize {
        self.alphas.nrows()
    }

    pub fn mean(&self) -> DVector<f64> {
        self.alphas.unscale(self.alphas.sum())
    }

    /// E[ln pi_k] = digamma(alpha_k) - digamma(sum alpha)
    pub fn expected_log(&self) -> DVector<f64> {
        let total = self.alphas.sum().digamma();
        self.alphas.map(|a| a.digamma() - total )
    }

    pub fn rvs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        let mut draws = DVector::zeros(self.size());
        for (k, a) in self.alphas.iter().enumerate() {
            let distr = rand_distr::Gamma::new(*a, 1.)
                .map_err(|e| BayesError::InvalidHyperparameter(format!("{:?}", e)) )?;
            draws[k] = distr.sample(rng);
        }
        let total = draws.sum();
        if total > 0. && total.is_finite() {
            Ok(draws.unscale(total))
        } else {
            Ok(self.mean())
        }
    }

}

impl ConjugatePrior for Dirichlet {

    fn link(&self) -> DVector<f64> {
        self.alphas.clone()
    }

    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError> {
        BayesError::check_dim(self.size(), eta.nrows())?;
        Dirichlet::new(eta.clone())
    }

    fn log_partition(&self) -> f64 {
        self.alphas.iter().map(|a| a.ln_gamma().0 ).sum::<f64>() - self.alphas.sum().ln_gamma().0
    }

    fn expected_statistics(&self) -> DVector<f64> {
        self.expected_log()
    }

}

/// Categorical gating over a fixed number of components with a Dirichlet prior over the weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalWithDirichlet {

    prior : Dirichlet,

    posterior : Dirichlet,

    probs : DVector<f64>

}

impl CategoricalWithDirichlet {

    pub fn new(prior : Dirichlet) -> Self {
        let probs = prior.mean();
        Self { posterior : prior.clone(), prior, probs }
    }

}

impl GatingDistribution for CategoricalWithDirichlet {

    type Prior = Dirichlet;

    fn prior(&self) -> &Dirichlet {
        &self.prior
    }

    fn posterior(&self) -> &Dirichlet {
        &self.posterior
    }

    fn set_posterior(&mut self, posterior : Dirichlet) {
        self.posterior = posterior;
    }

    fn promote(&mut self) {
        self.prior = self.posterior.clone();
    }

    fn size(&self) -> usize {
        self.prior.size()
    }

    fn probs(&self) -> &DVector<f64> {
        &self.probs
    }

    fn sample_probs<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        self.probs = self.posterior.rvs(rng)?;
        Ok(())
    }

    fn sample_prior_probs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        self.prior.rvs(rng)
    }

    fn statistics(&self, counts : &DVector<f64>) -> DVector<f64> {
        counts.clone()
    }

    fn expected_log_probs(&self) -> DVector<f64> {
        self.posterior.expected_log()
    }

    fn mean(&self) -> DVector<f64> {
        self.posterior.mean()
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn dirichlet_posterior_counts() {
        let mut gating = CategoricalWithDirichlet::new(Dirichlet::new(DVector::from_element(3, 1.)).unwrap());
        gating.meanfield_update(&DVector::from_vec(vec![3., 0., 1.])).unwrap();
        assert_eq!(gating.posterior().alphas(), &DVector::from_vec(vec![4., 1., 2.]));
        let mean = gating.mean();
        assert!((mean.sum() - 1.).abs() < 1E-12);
        assert!(gating.variational_lowerbound() < 0.);
    }

    #[test]
    fn symmetric_prior_repeats_concentration() {
        let prior = Dirichlet::symmetric(4, 2.5).unwrap();
        assert_eq!(prior.alphas(), &DVector::from_element(4, 2.5));
        assert!(Dirichlet::symmetric(3, 0.).is_err());
    }

}
