use nalgebra::*;
use rand::Rng;
use std::fmt::Debug;
use std::f64::consts::PI;
use special::Gamma as _;
use crate::error::BayesError;

mod wishart;

pub use wishart::*;

mod student;

pub use student::*;

mod normal;

pub use normal::*;

mod linear;

pub use linear::*;

mod gamma;

pub use gamma::*;

mod dirichlet;

pub use dirichlet::*;

mod stick;

pub use stick::*;

mod gating;

pub use gating::*;

/// Trait shared by the prior/posterior families (Normal-Wishart, Matrix-Normal-Wishart,
/// Dirichlet, Stick-breaking, Gamma). Every family is a member of the exponential family
/// with density exp(eta^T T(theta) - A(eta)) with respect to a base measure that does not
/// depend on eta. The natural parameter vector is laid out so that the sufficient statistics
/// of the conjugate likelihood add to it directly: the posterior natural parameter is always
/// the prior natural parameter plus the (possibly weighted) sum of data statistics.
pub trait ConjugatePrior
where
    Self : Debug + Clone + Sized
{

    /// Transforms the canonical hyperparameters into the flat natural parameter vector.
    fn link(&self) -> DVector<f64>;

    /// Builds a distribution with the same dimensionality as self from a natural parameter
    /// vector. Fails when the vector maps outside the parameter domain (e.g. a scale matrix
    /// that is not positive-definite).
    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError>;

    /// Log-normalizer A(eta).
    fn log_partition(&self) -> f64;

    /// Expected value of the sufficient statistic T(theta) under self, laid out as link().
    fn expected_statistics(&self) -> DVector<f64>;

    /// KL(self || other) between two members of the same family:
    /// (eta_self - eta_other)^T E_self[T] - A(eta_self) + A(eta_other).
    fn kl_divergence(&self, other : &Self) -> f64 {
        (self.link() - other.link()).dot(&self.expected_statistics()) -
            self.log_partition() + other.log_partition()
    }

}

/// A likelihood paired with its conjugate prior. Implementors hold an immutable-by-inference
/// prior, a posterior of the same family, and the current parameter sample (drawn by Gibbs
/// sampling, or set at the posterior mode on construction).
///
/// Observations are arranged over rows of y. Distributions over y alone (the Gaussian) ignore x;
/// conditional distributions (the linear-Gaussian) require x with the same number of rows.
/// Rows holding any non-finite entry are treated as missing: they receive a
/// negative-infinity log-likelihood and never contribute to sufficient statistics.
pub trait Conjugate
where
    Self : Debug + Clone + Sized
{

    type Prior : ConjugatePrior;

    fn prior(&self) -> &Self::Prior;

    fn posterior(&self) -> &Self::Prior;

    fn set_posterior(&mut self, posterior : Self::Prior);

    /// Replaces the prior with a deep copy of the posterior, so that the next round of
    /// inference starts from the current state of knowledge.
    fn promote(&mut self);

    /// Weighted sum of the per-row sufficient statistics, laid out as the natural parameter
    /// of the prior. Missing rows (and rows with zero weight) are skipped.
    fn statistics(
        &self,
        y : DMatrixSlice<'_, f64>,
        x : Option<DMatrixSlice<'_, f64>>,
        weights : Option<&DVector<f64>>
    ) -> DVector<f64>;

    /// Per-row log-density under the current parameter sample.
    fn log_likelihood(&self, y : DMatrixSlice<'_, f64>, x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64>;

    /// Per-row expected log-density under the posterior (the mean-field "score").
    fn expected_log_likelihood(&self, y : DMatrixSlice<'_, f64>, x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64>;

    /// Draws a new parameter sample from the current posterior.
    fn sample_parameters<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized;

    /// Samples n observations (conditional on the rows of x, if any) from the current parameters.
    fn rvs<R>(&self, n : usize, x : Option<DMatrixSlice<'_, f64>>, rng : &mut R) -> Result<DMatrix<f64>, BayesError>
    where
        R : Rng + ?Sized;

    /// Gibbs step: posterior = prior + stats, followed by a parameter draw. A posterior that
    /// cannot be represented (numerically degenerate) falls back to the prior.
    fn resample_statistics<R>(&mut self, stats : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let eta = self.prior().link() + stats;
        let post = posterior_or_prior(self.prior(), &eta);
        self.set_posterior(post);
        self.sample_parameters(rng)
    }

    /// Mean-field step: posterior = prior + expected (responsibility-weighted) stats.
    fn meanfield_statistics(&mut self, stats : &DVector<f64>) -> Result<(), BayesError> {
        let eta = self.prior().link() + stats;
        let post = posterior_or_prior(self.prior(), &eta);
        self.set_posterior(post);
        Ok(())
    }

    /// Stochastic natural-gradient step on a minibatch drawn with inclusion probability prob:
    /// eta <- (1 - stepsize) eta + stepsize (eta_prior + stats / prob).
    fn meanfield_sgdstep_statistics(&mut self, stats : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        let eta = natural_gradient_step(
            &self.posterior().link(),
            &self.prior().link(),
            stats,
            prob,
            stepsize
        );
        if let Ok(post) = self.posterior().link_inverse(&eta) {
            self.set_posterior(post);
        } else {
            log::warn!("Rejected stochastic step leaving the parameter domain");
        }
        Ok(())
    }

    fn resample<R>(
        &mut self,
        y : DMatrixSlice<'_, f64>,
        x : Option<DMatrixSlice<'_, f64>>,
        rng : &mut R
    ) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let stats = self.statistics(y, x, None);
        self.resample_statistics(&stats, rng)
    }

    fn meanfield_update(
        &mut self,
        y : DMatrixSlice<'_, f64>,
        x : Option<DMatrixSlice<'_, f64>>,
        weights : &DVector<f64>
    ) -> Result<(), BayesError> {
        let stats = self.statistics(y, x, Some(weights));
        self.meanfield_statistics(&stats)
    }

    fn meanfield_sgdstep(
        &mut self,
        y : DMatrixSlice<'_, f64>,
        x : Option<DMatrixSlice<'_, f64>>,
        weights : &DVector<f64>,
        prob : f64,
        stepsize : f64
    ) -> Result<(), BayesError> {
        let stats = self.statistics(y, x, Some(weights));
        self.meanfield_sgdstep_statistics(&stats, prob, stepsize)
    }

    /// Contribution of this factor to the variational lower bound: -KL(posterior || prior).
    fn variational_lowerbound(&self) -> f64 {
        -self.posterior().kl_divergence(self.prior())
    }

}

pub(crate) fn natural_gradient_step(
    current : &DVector<f64>,
    prior : &DVector<f64>,
    stats : &DVector<f64>,
    prob : f64,
    stepsize : f64
) -> DVector<f64> {
    let target = prior + stats.unscale(prob);
    current.scale(1. - stepsize) + target.scale(stepsize)
}

pub(crate) fn posterior_or_prior<P>(prior : &P, eta : &DVector<f64>) -> P
where
    P : ConjugatePrior
{
    match prior.link_inverse(eta) {
        Ok(post) => post,
        Err(e) => {
            log::warn!("Posterior update failed ({}); falling back to prior", e);
            prior.clone()
        }
    }
}

/// A row is observed when all of its entries are finite.
pub fn is_observed<S>(row : &Matrix<f64, U1, Dynamic, S>) -> bool
where
    S : storage::Storage<f64, U1, Dynamic>
{
    row.iter().all(|v| v.is_finite())
}

pub(crate) fn row_weight(weights : Option<&DVector<f64>>, i : usize) -> f64 {
    weights.map(|w| w[i]).unwrap_or(1.)
}

/// Cholesky-based inverse of a symmetric positive-definite matrix.
pub fn invert_pd(m : &DMatrix<f64>, name : &'static str) -> Result<DMatrix<f64>, BayesError> {
    let chol = Cholesky::new(symmetrize(m)).ok_or(BayesError::NotPositiveDefinite(name))?;
    Ok(symmetrize(&chol.inverse()))
}

/// Log-determinant of a symmetric positive-definite matrix, from its Cholesky factor.
pub fn log_det_pd(m : &DMatrix<f64>, name : &'static str) -> Result<f64, BayesError> {
    let chol = Cholesky::new(symmetrize(m)).ok_or(BayesError::NotPositiveDefinite(name))?;
    Ok(2. * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>())
}

/// Lower Cholesky factor of a symmetric positive-definite matrix.
pub fn cholesky_lower(m : &DMatrix<f64>, name : &'static str) -> Result<DMatrix<f64>, BayesError> {
    Cholesky::new(symmetrize(m))
        .map(|chol| chol.l())
        .ok_or(BayesError::NotPositiveDefinite(name))
}

pub(crate) fn symmetrize(m : &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()).scale(0.5)
}

/// Draws a matrix of independent standard normal entries.
pub(crate) fn standard_normal<R>(nrows : usize, ncols : usize, rng : &mut R) -> DMatrix<f64>
where
    R : Rng + ?Sized
{
    use rand_distr::{Distribution, StandardNormal};
    DMatrix::from_fn(nrows, ncols, |_, _| StandardNormal.sample(rng))
}

/// Multivariate log-gamma ln Gamma_d(a).
pub fn ln_multi_gamma(a : f64, d : usize) -> f64 {
    let df = d as f64;
    df * (df - 1.) / 4. * PI.ln() +
        (1..=d).map(|i| (a + (1. - i as f64) / 2.).ln_gamma().0 ).sum::<f64>()
}

/// Multivariate digamma: the derivative of ln Gamma_d(a) with respect to a.
pub fn multi_digamma(a : f64, d : usize) -> f64 {
    (1..=d).map(|i| (a + (1. - i as f64) / 2.).digamma() ).sum()
}

/// Flattens a matrix in column-major order into the rows [offset, offset + r*c) of dst.
pub(crate) fn write_block(dst : &mut DVector<f64>, offset : usize, m : &DMatrix<f64>) -> usize {
    let len = m.len();
    dst.rows_mut(offset, len).copy_from_slice(m.as_slice());
    offset + len
}

/// Reads a column-major block written by write_block.
pub(crate) fn read_block(src : &DVector<f64>, offset : usize, nrows : usize, ncols : usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(nrows, ncols, &src.as_slice()[offset..offset + nrows * ncols])
}

#[cfg(test)]
mod tests {

    use super::*;

    const EPS : f64 = 1E-8;

    #[test]
    fn multivariate_gamma_reduces_to_univariate() {
        assert!((ln_multi_gamma(3.5, 1) - 3.5f64.ln_gamma().0).abs() < EPS);
        assert!((multi_digamma(3.5, 1) - 3.5f64.digamma()).abs() < EPS);
    }

    #[test]
    fn pd_helpers() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let inv = invert_pd(&m, "test").unwrap();
        let ident = &m * &inv;
        assert!((ident - DMatrix::<f64>::identity(2, 2)).norm() < EPS);
        assert!((log_det_pd(&m, "test").unwrap() - (1.75f64).ln()).abs() < EPS);
        let not_pd = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(invert_pd(&not_pd, "test").is_err());
    }

    #[test]
    fn block_layout() {
        let m = DMatrix::from_row_slice(2, 3, &[1., 2., 3., 4., 5., 6.]);
        let mut v = DVector::zeros(7);
        let end = write_block(&mut v, 1, &m);
        assert_eq!(end, 7);
        assert_eq!(read_block(&v, 1, 2, 3), m);
    }

}
