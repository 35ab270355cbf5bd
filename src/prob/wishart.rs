use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use rand_distr::{Distribution, ChiSquared};
use std::f64::consts::LN_2;

/// A Wishart distribution W(psi, nu) over symmetric positive-definite precision matrices,
/// with density proportional to |L|^{(nu - d - 1)/2} exp(-tr(psi^{-1} L) / 2).
/// The sampled matrices have mean nu * psi.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wishart {

    psi : DMatrix<f64>,

    nu : f64,

    /// Set at construction, since psi is immutable.
    log_det_psi : f64,

    psi_lower : DMatrix<f64>,

    psi_inv : DMatrix<f64>

}

impl Wishart {

    pub fn new(psi : DMatrix<f64>, nu : f64) -> Result<Self, BayesError> {
        let d = psi.nrows();
        BayesError::check_dim(d, psi.ncols())?;
        if !(nu > d as f64 - 1.) {
            return Err(BayesError::InvalidHyperparameter(
                format!("Wishart degrees of freedom {} should be greater than {}", nu, d as f64 - 1.)
            ));
        }
        let psi = symmetrize(&psi);
        let psi_lower = cholesky_lower(&psi, "Wishart scale")?;
        let log_det_psi = 2. * psi_lower.diagonal().iter().map(|d| d.ln() ).sum::<f64>();
        let psi_inv = invert_pd(&psi, "Wishart scale")?;
        Ok(Self { psi, nu, log_det_psi, psi_lower, psi_inv })
    }

    pub fn dim(&self) -> usize {
        self.psi.nrows()
    }

    pub fn psi(&self) -> &DMatrix<f64> {
        &self.psi
    }

    pub fn psi_inv(&self) -> &DMatrix<f64> {
        &self.psi_inv
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn log_det_psi(&self) -> f64 {
        self.log_det_psi
    }

    pub fn mean(&self) -> DMatrix<f64> {
        self.psi.scale(self.nu)
    }

    /// E[ln |L|] = psi_d(nu/2) + d ln 2 + ln |psi|
    pub fn expected_log_det(&self) -> f64 {
        let d = self.dim();
        multi_digamma(self.nu / 2., d) + d as f64 * LN_2 + self.log_det_psi
    }

    /// Bartlett decomposition: L = (C A)(C A)^T, where C is the lower Cholesky factor of psi,
    /// A is lower-triangular with chi-square distributed squared diagonal entries and standard
    /// normal entries below the diagonal.
    pub fn sample<R>(&self, rng : &mut R) -> Result<DMatrix<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        let d = self.dim();
        let mut a = standard_normal(d, d, rng).lower_triangle();
        for i in 0..d {
            let chi = ChiSquared::new(self.nu - i as f64)
                .map_err(|e| BayesError::InvalidHyperparameter(format!("{:?}", e)) )?;
            a[(i, i)] = chi.sample(rng).sqrt();
        }
        let ca = &self.psi_lower * a;
        Ok(symmetrize(&(&ca * ca.transpose())))
    }

    /// Log-density of a precision matrix.
    pub fn log_prob(&self, lmbda : &DMatrix<f64>) -> Result<f64, BayesError> {
        let d = self.dim();
        let df = d as f64;
        let log_det = log_det_pd(lmbda, "precision")?;
        let trace = (&self.psi_inv * lmbda).trace();
        Ok((self.nu - df - 1.) / 2. * log_det - trace / 2. - self.nu * df / 2. * LN_2 -
            self.nu / 2. * self.log_det_psi - ln_multi_gamma(self.nu / 2., d))
    }

}
