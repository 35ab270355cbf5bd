use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use rand_distr::Distribution;

/// Vector of independent Gamma distributions with shapes alphas and rates betas,
/// used as the hyperprior over automatic relevance precisions.
/// Natural parameter [alpha - 1 | -beta] paired with statistic [ln x | x].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gamma {

    alphas : DVector<f64>,

    betas : DVector<f64>

}

impl Gamma {

    pub fn new(alphas : DVector<f64>, betas : DVector<f64>) -> Result<Self, BayesError> {
        BayesError::check_dim(alphas.nrows(), betas.nrows())?;
        if alphas.iter().chain(betas.iter()).any(|v| !(*v > 0.) || !v.is_finite() ) {
            return Err(BayesError::InvalidHyperparameter(format!("Gamma shapes {} and rates {}", alphas, betas)));
        }
        Ok(Self { alphas, betas })
    }

    /// Shares the same shape and rate over dim independent entries.
    pub fn isotropic(dim : usize, alpha : f64, beta : f64) -> Result<Self, BayesError> {
        Self::new(DVector::from_element(dim, alpha), DVector::from_element(dim, beta))
    }

    pub fn dim(&self) -> usize {
        self.alphas.nrows()
    }

    pub fn alphas(&self) -> &DVector<f64> {
        &self.alphas
    }

    pub fn betas(&self) -> &DVector<f64> {
        &self.betas
    }

    pub fn mean(&self) -> DVector<f64> {
        self.alphas.component_div(&self.betas)
    }

    pub fn expected_log(&self) -> DVector<f64> {
        self.alphas.map(|a| a.digamma() ) - self.betas.map(|b| b.ln() )
    }

    pub fn rvs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        let mut draws = DVector::zeros(self.dim());
        for i in 0..self.dim() {
            let distr = rand_distr::Gamma::new(self.alphas[i], 1. / self.betas[i])
                .map_err(|e| BayesError::InvalidHyperparameter(format!("{:?}", e)) )?;
            draws[i] = distr.sample(rng);
        }
        Ok(draws)
    }

}

impl ConjugatePrior for Gamma {

    fn link(&self) -> DVector<f64> {
        let n = self.dim();
        let mut eta = DVector::zeros(2 * n);
        eta.rows_mut(0, n).copy_from(&self.alphas.add_scalar(-1.));
        eta.rows_mut(n, n).copy_from(&(-&self.betas));
        eta
    }

    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError> {
        let n = self.dim();
        BayesError::check_dim(2 * n, eta.nrows())?;
        Gamma::new(eta.rows(0, n).add_scalar(1.), -eta.rows(n, n))
    }

    fn log_partition(&self) -> f64 {
        self.alphas.iter().zip(self.betas.iter())
            .map(|(a, b)| a.ln_gamma().0 - a * b.ln() )
            .sum()
    }

    fn expected_statistics(&self) -> DVector<f64> {
        let n = self.dim();
        let mut stats = DVector::zeros(2 * n);
        stats.rows_mut(0, n).copy_from(&self.expected_log());
        stats.rows_mut(n, n).copy_from(&self.mean());
        stats
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn gamma_divergence() {
        let p = Gamma::isotropic(2, 1., 1.).unwrap();
        let q = Gamma::isotropic(2, 3., 2.).unwrap();
        assert!(p.kl_divergence(&p).abs() < 1E-10);

        // Closed form KL(Gamma(3, 2) || Gamma(1, 1)) per entry.
        let entry = 2. * 3f64.digamma() - 1.5;
        assert!((q.kl_divergence(&p) - 2. * entry).abs() < 1E-8);
    }

}
