use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};

/// Multivariate Student-t distribution with location mu, scale matrix sigma and df degrees of
/// freedom. Arises as the posterior predictive of the Gaussian families under their conjugate priors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiStudentT {

    mu : DVector<f64>,

    sigma : DMatrix<f64>,

    df : f64,

    sigma_inv : DMatrix<f64>,

    log_det_sigma : f64

}

impl MultiStudentT {

    pub fn new(mu : DVector<f64>, sigma : DMatrix<f64>, df : f64) -> Result<Self, BayesError> {
        BayesError::check_dim(mu.nrows(), sigma.nrows())?;
        if !(df > 0.) {
            return Err(BayesError::InvalidHyperparameter(format!("Student-t degrees of freedom {}", df)));
        }
        let sigma = symmetrize(&sigma);
        let sigma_inv = invert_pd(&sigma, "Student-t scale")?;
        let log_det_sigma = log_det_pd(&sigma, "Student-t scale")?;
        Ok(Self { mu, sigma, df, sigma_inv, log_det_sigma })
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn scale(&self) -> &DMatrix<f64> {
        &self.sigma
    }

    pub fn df(&self) -> f64 {
        self.df
    }

    /// Covariance sigma * df / (df - 2). For df <= 2 the covariance is undefined,
    /// and the scale matrix is returned instead.
    pub fn cov(&self) -> DMatrix<f64> {
        if self.df > 2. {
            self.sigma.scale(self.df / (self.df - 2.))
        } else {
            self.sigma.clone()
        }
    }

    pub fn log_prob(&self, x : &DVector<f64>) -> f64 {
        let d = self.mu.nrows() as f64;
        let err = x - &self.mu;
        let maha = err.dot(&(&self.sigma_inv * &err));
        let half_df = self.df / 2.;
        (half_df + d / 2.).ln_gamma().0 - half_df.ln_gamma().0 -
            d / 2. * (self.df * std::f64::consts::PI).ln() - 0.5 * self.log_det_sigma -
            (half_df + d / 2.) * (1. + maha / self.df).ln()
    }

}
