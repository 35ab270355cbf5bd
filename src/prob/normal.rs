use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::{PI, LN_2};

/// Normal-Wishart distribution over a mean vector mu and precision matrix L:
/// L ~ W(psi, nu), mu | L ~ N(m, (kappa L)^{-1}).
///
/// The natural parameter is laid out as
/// [kappa m (d) | kappa (1) | vec(psi^{-1} + kappa m m^T) (d*d) | nu - d (1)], paired with
/// the sufficient statistic [L mu | -mu^T L mu / 2 | -L / 2 | ln|L| / 2]. Under this layout, the
/// per-observation statistic of a Gaussian likelihood is [x | 1 | x x^T | 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalWishart {

    mu : DVector<f64>,

    kappa : f64,

    wishart : Wishart

}

impl NormalWishart {

    pub fn new(mu : DVector<f64>, kappa : f64, psi : DMatrix<f64>, nu : f64) -> Result<Self, BayesError> {
        BayesError::check_dim(mu.nrows(), psi.nrows())?;
        if !(kappa > 0.) || !kappa.is_finite() {
            return Err(BayesError::InvalidHyperparameter(format!("Normal-Wishart kappa {}", kappa)));
        }
        let wishart = Wishart::new(psi, nu)?;
        Ok(Self { mu, kappa, wishart })
    }

    pub fn dim(&self) -> usize {
        self.mu.nrows()
    }

    pub fn mu(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn psi(&self) -> &DMatrix<f64> {
        self.wishart.psi()
    }

    pub fn nu(&self) -> f64 {
        self.wishart.nu()
    }

    pub fn wishart(&self) -> &Wishart {
        &self.wishart
    }

    /// Joint mode (m, (nu - d) psi).
    pub fn mode(&self) -> (DVector<f64>, DMatrix<f64>) {
        let d = self.dim() as f64;
        let lmbda = if self.nu() > d {
            self.psi().scale(self.nu() - d)
        } else {
            self.wishart.mean()
        };
        (self.mu.clone(), lmbda)
    }

    pub fn rvs<R>(&self, rng : &mut R) -> Result<(DVector<f64>, DMatrix<f64>), BayesError>
    where
        R : Rng + ?Sized
    {
        let lmbda = self.wishart.sample(rng)?;
        let cov = invert_pd(&lmbda.scale(self.kappa), "precision")?;
        let lower = cholesky_lower(&cov, "covariance")?;
        let mu = &self.mu + lower * standard_normal(self.dim(), 1, rng).column(0);
        Ok((mu, lmbda))
    }

    /// Posterior predictive St(m, (kappa + 1) / (kappa (nu - d + 1)) psi^{-1}, nu - d + 1).
    pub fn posterior_predictive(&self) -> Result<MultiStudentT, BayesError> {
        let d = self.dim() as f64;
        let df = self.nu() - d + 1.;
        let sigma = self.wishart.psi_inv().scale((self.kappa + 1.) / (self.kappa * df));
        MultiStudentT::new(self.mu.clone(), sigma, df)
    }

    /// Expected Gaussian log-density of x: -d/2 ln 2pi + E[ln|L|] / 2 - (d / kappa + nu (x - m)^T psi (x - m)) / 2.
    pub fn expected_log_density(&self, x : &DVector<f64>) -> f64 {
        let d = self.dim() as f64;
        let err = x - &self.mu;
        let maha = err.dot(&(self.psi() * &err));
        -d / 2. * (2. * PI).ln() + 0.5 * self.wishart.expected_log_det() -
            0.5 * (d / self.kappa + self.nu() * maha)
    }

}

impl ConjugatePrior for NormalWishart {

    fn link(&self) -> DVector<f64> {
        let d = self.dim();
        let mut eta = DVector::zeros(d * d + d + 2);
        eta.rows_mut(0, d).copy_from(&self.mu.scale(self.kappa));
        eta[d] = self.kappa;
        let outer = self.wishart.psi_inv() + (&self.mu * self.mu.transpose()).scale(self.kappa);
        let end = write_block(&mut eta, d + 1, &outer);
        eta[end] = self.nu() - d as f64;
        eta
    }

    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError> {
        let d = self.dim();
        BayesError::check_dim(d * d + d + 2, eta.nrows())?;
        let kappa = eta[d];
        if !(kappa > 0.) {
            return Err(BayesError::InvalidHyperparameter(format!("Normal-Wishart kappa {}", kappa)));
        }
        let mu = eta.rows(0, d).unscale(kappa);
        let outer = read_block(eta, d + 1, d, d);
        let psi_inv = outer - (&mu * mu.transpose()).scale(kappa);
        let psi = invert_pd(&psi_inv, "Normal-Wishart scale")?;
        let nu = eta[d * d + d + 1] + d as f64;
        NormalWishart::new(mu, kappa, psi, nu)
    }

    fn log_partition(&self) -> f64 {
        let d = self.dim() as f64;
        let nu = self.nu();
        d / 2. * (2. * PI).ln() - d / 2. * self.kappa.ln() + nu * d / 2. * LN_2 +
            nu / 2. * self.wishart.log_det_psi() + ln_multi_gamma(nu / 2., self.dim())
    }

    fn expected_statistics(&self) -> DVector<f64> {
        let d = self.dim();
        let nu = self.nu();
        let psi_mu = self.psi() * &self.mu;
        let mut stats = DVector::zeros(d * d + d + 2);
        stats.rows_mut(0, d).copy_from(&psi_mu.scale(nu));
        stats[d] = -0.5 * (d as f64 / self.kappa + nu * self.mu.dot(&psi_mu));
        let end = write_block(&mut stats, d + 1, &self.psi().scale(-nu / 2.));
        stats[end] = 0.5 * self.wishart.expected_log_det();
        stats
    }

}

/// Multivariate Gaussian likelihood N(mu, L^{-1}) under a Normal-Wishart prior over (mu, L).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianWithNormalWishart {

    prior : NormalWishart,

    posterior : NormalWishart,

    mu : DVector<f64>,

    lmbda : DMatrix<f64>,

    log_det_lmbda : f64

}

impl GaussianWithNormalWishart {

    /// Starts with posterior equal to the prior, and parameters at the prior mode.
    pub fn new(prior : NormalWishart) -> Result<Self, BayesError> {
        let (mu, lmbda) = prior.mode();
        let log_det_lmbda = log_det_pd(&lmbda, "precision")?;
        Ok(Self { posterior : prior.clone(), prior, mu, lmbda, log_det_lmbda })
    }

    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.lmbda
    }

    pub fn set_parameters(&mut self, mu : DVector<f64>, lmbda : DMatrix<f64>) -> Result<(), BayesError> {
        BayesError::check_dim(self.dim(), mu.nrows())?;
        BayesError::check_dim(self.dim(), lmbda.nrows())?;
        self.log_det_lmbda = log_det_pd(&lmbda, "precision")?;
        self.mu = mu;
        self.lmbda = lmbda;
        Ok(())
    }

    /// Log posterior predictive density of each row of y (missing rows yield negative infinity).
    pub fn log_posterior_predictive(&self, y : DMatrixSlice<'_, f64>) -> Result<DVector<f64>, BayesError> {
        let st = self.posterior.posterior_predictive()?;
        Ok(DVector::from_iterator(y.nrows(), y.row_iter().map(|row| {
            if is_observed(&row) {
                st.log_prob(&row.transpose())
            } else {
                f64::NEG_INFINITY
            }
        })))
    }

}

impl Conjugate for GaussianWithNormalWishart {

    type Prior = NormalWishart;

    fn prior(&self) -> &NormalWishart {
        &self.prior
    }

    fn posterior(&self) -> &NormalWishart {
        &self.posterior
    }

    fn set_posterior(&mut self, posterior : NormalWishart) {
        self.posterior = posterior;
    }

    fn promote(&mut self) {
        self.prior = self.posterior.clone();
    }

    fn statistics(
        &self,
        y : DMatrixSlice<'_, f64>,
        _x : Option<DMatrixSlice<'_, f64>>,
        weights : Option<&DVector<f64>>
    ) -> DVector<f64> {
        let d = self.dim();
        let mut sum_x = DVector::zeros(d);
        let mut sum_xx = DMatrix::zeros(d, d);
        let mut n = 0.0;
        for (i, row) in y.row_iter().enumerate() {
            let w = row_weight(weights, i);
            if w == 0. || !is_observed(&row) {
                continue;
            }
            let x = row.transpose();
            sum_xx += (&x * x.transpose()).scale(w);
            sum_x += x.scale(w);
            n += w;
        }
        let mut stats = DVector::zeros(d * d + d + 2);
        stats.rows_mut(0, d).copy_from(&sum_x);
        stats[d] = n;
        let end = write_block(&mut stats, d + 1, &sum_xx);
        stats[end] = n;
        stats
    }

    fn log_likelihood(&self, y : DMatrixSlice<'_, f64>, _x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64> {
        let d = self.dim() as f64;
        let norm = -d / 2. * (2. * PI).ln() + 0.5 * self.log_det_lmbda;
        DVector::from_iterator(y.nrows(), y.row_iter().map(|row| {
            if is_observed(&row) {
                let err = row.transpose() - &self.mu;
                norm - 0.5 * err.dot(&(&self.lmbda * &err))
            } else {
                f64::NEG_INFINITY
            }
        }))
    }

    fn expected_log_likelihood(&self, y : DMatrixSlice<'_, f64>, _x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64> {
        DVector::from_iterator(y.nrows(), y.row_iter().map(|row| {
            if is_observed(&row) {
                self.posterior.expected_log_density(&row.transpose())
            } else {
                f64::NEG_INFINITY
            }
        }))
    }

    fn sample_parameters<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let (mu, lmbda) = self.posterior.rvs(rng)?;
        self.set_parameters(mu, lmbda)
    }

    fn rvs<R>(&self, n : usize, _x : Option<DMatrixSlice<'_, f64>>, rng : &mut R) -> Result<DMatrix<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        let cov = invert_pd(&self.lmbda, "precision")?;
        let lower = cholesky_lower(&cov, "covariance")?;
        let z = standard_normal(n, self.dim(), rng);
        let mut y = z * lower.transpose();
        for mut row in y.row_iter_mut() {
            row += self.mu.transpose();
        }
        Ok(y)
    }

}
