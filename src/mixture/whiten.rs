use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;

/// PCA whitening fitted on the observed rows of a data matrix. Rows are mapped to
/// z = (x - mean)^T F, with F = E diag(lambda)^{-1/2} built from the eigendecomposition
/// E diag(lambda) E^T of the empirical covariance, so that the transformed rows have identity covariance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Whitening {

    mean : DVector<f64>,

    forward : DMatrix<f64>,

    inverse : DMatrix<f64>,

    log_jacobian : f64

}

impl Whitening {

    pub fn fit(data : &DMatrix<f64>, valid : &[bool]) -> Result<Self, BayesError> {
        let d = data.ncols();
        let rows : Vec<_> = data.row_iter()
            .zip(valid.iter())
            .filter(|(_, v)| **v )
            .map(|(r, _)| r.transpose() )
            .collect();
        if rows.len() < 2 {
            return Err(BayesError::NoData);
        }
        let n = rows.len() as f64;
        let mean = rows.iter().fold(DVector::zeros(d), |acc, r| acc + r ).unscale(n);
        let cov = rows.iter()
            .fold(DMatrix::zeros(d, d), |acc, r| {
                let err = r - &mean;
                acc + &err * err.transpose()
            })
            .unscale(n - 1.);
        let eigen = SymmetricEigen::new(cov);
        let max_eigen = eigen.eigenvalues.iter().cloned().fold(0.0, f64::max);
        if eigen.eigenvalues.iter().any(|l| !(*l > max_eigen * 1E-12) ) {
            return Err(BayesError::NotPositiveDefinite("empirical covariance"));
        }
        let scale_down = DMatrix::from_diagonal(&eigen.eigenvalues.map(|l| 1. / l.sqrt() ));
        let scale_up = DMatrix::from_diagonal(&eigen.eigenvalues.map(|l| l.sqrt() ));
        let forward = &eigen.eigenvectors * scale_down;
        let inverse = scale_up * eigen.eigenvectors.transpose();
        let log_jacobian = -0.5 * eigen.eigenvalues.iter().map(|l| l.ln() ).sum::<f64>();
        Ok(Self { mean, forward, inverse, log_jacobian })
    }

    pub fn dim(&self) -> usize {
        self.mean.nrows()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn transform(&self, data : &DMatrix<f64>) -> Result<DMatrix<f64>, BayesError> {
        BayesError::check_dim(self.dim(), data.ncols())?;
        let mut centered = data.clone();
        for mut row in centered.row_iter_mut() {
            row -= self.mean.transpose();
        }
        Ok(centered * &self.forward)
    }

    pub fn inverse_transform(&self, data : &DMatrix<f64>) -> Result<DMatrix<f64>, BayesError> {
        BayesError::check_dim(self.dim(), data.ncols())?;
        let mut out = data * &self.inverse;
        for mut row in out.row_iter_mut() {
            row += self.mean.transpose();
        }
        Ok(out)
    }

    /// Maps a single whitened mean vector back to the original space.
    pub fn inverse_mean(&self, z : &DVector<f64>) -> DVector<f64> {
        self.inverse.transpose() * z + &self.mean
    }

    /// Maps a whitened covariance back to the original space.
    pub fn inverse_covariance(&self, cov : &DMatrix<f64>) -> DMatrix<f64> {
        self.inverse.transpose() * cov * &self.inverse
    }

    /// ln |det F|, added to whitened log-densities to express them in the original space.
    pub fn log_jacobian(&self) -> f64 {
        self.log_jacobian
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    const EPS : f64 = 1E-8;

    #[test]
    fn whitened_data_has_identity_covariance() {
        let data = DMatrix::from_row_slice(5, 2, &[
            1.0, 2.0,
            2.0, 3.5,
            3.0, 6.5,
            4.0, 8.0,
            5.0, 9.0
        ]);
        let valid = vec![true; 5];
        let w = Whitening::fit(&data, &valid).unwrap();
        let z = w.transform(&data).unwrap();
        let cov = (z.transpose() * &z).unscale(4.);
        assert!((cov - DMatrix::<f64>::identity(2, 2)).norm() < 1E-6);
        let back = w.inverse_transform(&z).unwrap();
        assert!((back - &data).norm() < EPS);
        let m = w.inverse_mean(&z.row(2).transpose());
        assert!((m - data.row(2).transpose()).norm() < EPS);
    }

    #[test]
    fn degenerate_covariance_is_rejected() {
        let data = DMatrix::from_row_slice(3, 2, &[1., 2., 2., 4., 3., 6.]);
        assert!(Whitening::fit(&data, &[true, true, true]).is_err());
    }

}
