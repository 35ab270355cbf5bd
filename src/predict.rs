use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::str::FromStr;
use crate::error::BayesError;
use crate::mixture::*;
use crate::fit::logsumexp;

/// How the predictive distributions of the used experts are combined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {

    /// Activation-weighted mixture of the expert predictives (moments by the law of total variance).
    Average,

    /// Predictive of the single most activated expert.
    Mode

}

impl Default for Mode {

    fn default() -> Self {
        Mode::Average
    }

}

impl FromStr for Mode {

    type Err = BayesError;

    fn from_str(s : &str) -> Result<Self, BayesError> {
        match s {
            "average" => Ok(Mode::Average),
            "mode" => Ok(Mode::Mode),
            other => Err(BayesError::InvalidMode(other.to_string()))
        }
    }

}

/// Row-aligned predictive moments in the original (non-whitened) target space. var and std hold
/// the marginal variance and standard deviation of each target column. nlpd holds the negative
/// log predictive density of each target row, when targets were informed.
#[derive(Debug, Clone)]
pub struct Prediction {

    pub mean : DMatrix<f64>,

    pub var : DMatrix<f64>,

    pub std : DMatrix<f64>,

    pub nlpd : Option<DVector<f64>>

}

impl Prediction {

    /// Mean over rows of the negative log predictive density, ignoring non-finite entries.
    pub fn mean_nlpd(&self) -> Option<f64> {
        self.nlpd.as_ref().map(|nlpd| {
            let finite : Vec<f64> = nlpd.iter().cloned().filter(|v| v.is_finite() ).collect();
            finite.iter().sum::<f64>() / finite.len().max(1) as f64
        })
    }

    /// Mean squared error of the predictive mean against the informed targets, over finite entries.
    pub fn mse(&self, target : &DMatrix<f64>) -> Result<f64, BayesError> {
        BayesError::check_dim(self.mean.nrows(), target.nrows())?;
        BayesError::check_dim(self.mean.ncols(), target.ncols())?;
        let sq : Vec<f64> = self.mean.iter()
            .zip(target.iter())
            .map(|(m, y)| (m - y).powi(2) )
            .filter(|e| e.is_finite() )
            .collect();
        Ok(sq.iter().sum::<f64>() / sq.len().max(1) as f64)
    }

}

impl MixtureOfLinearGaussians {

    fn whitened_input(&self, input : &DMatrix<f64>) -> Result<DMatrix<f64>, BayesError> {
        BayesError::check_dim(self.components[0].model.input_dim(), input.ncols())?;
        match &self.input_transform {
            Some(t) => t.transform(input),
            None => Ok(input.clone())
        }
    }

    /// Log activations (rows x used components) of whitened inputs: ln E[pi_k] plus the basis
    /// posterior-predictive log-density, normalized over the used components. Rows with
    /// missing entries fall back to the gating weights.
    fn log_activation(&self, x : &DMatrix<f64>, used : &[usize]) -> Result<DMatrix<f64>, BayesError> {
        let weights = self.gating.mean();
        let xs = x.slice((0, 0), x.shape());
        let mut act = DMatrix::zeros(x.nrows(), used.len());
        for (j, k) in used.iter().enumerate() {
            let dens = self.components[*k].basis.log_posterior_predictive(xs)?;
            for i in 0..x.nrows() {
                act[(i, j)] = weights[*k].ln() + dens[i];
            }
        }
        for i in 0..x.nrows() {
            if !act.row(i).iter().any(|a| a.is_finite() ) {
                for (j, k) in used.iter().enumerate() {
                    act[(i, j)] = weights[*k].ln();
                }
            }
            let norm = logsumexp(act.row(i).iter().cloned());
            for j in 0..used.len() {
                act[(i, j)] -= norm;
            }
        }
        Ok(act)
    }

    /// Normalized activation of each used component (columns, in the order of used_labels)
    /// for every row of input.
    pub fn meanfield_predictive_activation(&self, input : &DMatrix<f64>) -> Result<DMatrix<f64>, BayesError> {
        let used = self.used_labels();
        if used.is_empty() {
            return Err(BayesError::NoData);
        }
        let x = self.whitened_input(input)?;
        Ok(self.log_activation(&x, &used)?.map(|a| a.exp() ))
    }

    /// Predictive moments for every input row, combining the used experts as mode dictates.
    /// When target is informed, the negative log predictive density of each row is also returned.
    pub fn meanfield_prediction(&self, input : &DMatrix<f64>, target : Option<&DMatrix<f64>>, mode : Mode) -> Result<Prediction, BayesError> {
        let used = self.used_labels();
        if used.is_empty() {
            return Err(BayesError::NoData);
        }
        let dy = self.components[0].model.dim();
        if let Some(y) = target {
            BayesError::check_dim(input.nrows(), y.nrows())?;
            BayesError::check_dim(dy, y.ncols())?;
        }
        let x = self.whitened_input(input)?;
        let y = match (target, &self.target_transform) {
            (Some(y), Some(t)) => Some(t.transform(y)?),
            (Some(y), None) => Some(y.clone()),
            (None, _) => None
        };
        let log_jacobian = self.target_transform.as_ref().map(|t| t.log_jacobian() ).unwrap_or(0.);
        let act = self.log_activation(&x, &used)?;
        let n = x.nrows();
        let mut mean = DMatrix::zeros(n, dy);
        let mut var = DMatrix::zeros(n, dy);
        let mut nlpd = y.as_ref().map(|_| DVector::zeros(n) );
        for i in 0..n {
            let xi = x.row(i).transpose();
            let mut preds = Vec::with_capacity(used.len());
            for k in used.iter() {
                preds.push(self.components[*k].model.posterior_predictive(&xi)?);
            }
            let moments : Vec<(DVector<f64>, DMatrix<f64>)> = preds.iter().map(|st| {
                match &self.target_transform {
                    Some(t) => (t.inverse_mean(st.mean()), t.inverse_covariance(&st.cov())),
                    None => (st.mean().clone(), st.cov())
                }
            }).collect();
            let (mu, sigma2) = match mode {
                Mode::Average => {
                    let mut mu = DVector::zeros(dy);
                    let mut second = DVector::zeros(dy);
                    for (j, (m, c)) in moments.iter().enumerate() {
                        let w = act[(i, j)].exp();
                        mu += m.scale(w);
                        second += (c.diagonal() + m.component_mul(m)).scale(w);
                    }
                    let sigma2 = (second - mu.component_mul(&mu)).map(|v| v.max(0.) );
                    (mu, sigma2)
                },
                Mode::Mode => {
                    let best = act.row(i).transpose().imax();
                    (moments[best].0.clone(), moments[best].1.diagonal())
                }
            };
            mean.row_mut(i).copy_from(&mu.transpose());
            var.row_mut(i).copy_from(&sigma2.transpose());
            if let (Some(y), Some(nlpd)) = (&y, nlpd.as_mut()) {
                let yi = y.row(i).transpose();
                let lp = match mode {
                    Mode::Average => logsumexp(preds.iter().enumerate().map(|(j, st)| act[(i, j)] + st.log_prob(&yi) )),
                    Mode::Mode => preds[act.row(i).transpose().imax()].log_prob(&yi)
                };
                nlpd[i] = -(lp + log_jacobian);
            }
        }
        let std = var.map(|v| v.sqrt() );
        Ok(Prediction { mean, var, std, nlpd })
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::prob::*;
    use crate::fit::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fitted(whiten : bool) -> MixtureOfLinearGaussians {
        let mut rng = StdRng::seed_from_u64(51);
        let basis = NormalWishart::new(DVector::zeros(1), 0.01, DMatrix::identity(1, 1), 3.).unwrap();
        let model = MatrixNormalWishart::new(DMatrix::zeros(1, 2), DMatrix::identity(2, 2).scale(0.01), DMatrix::identity(1, 1), 3.).unwrap();
        let mut mix = MixtureOfLinearGaussians::with_priors(
            Gating::new(GatingKind::StickBreaking, 3, 1.).unwrap(), basis, model, true, None
        ).unwrap();
        let x = DMatrix::from_fn(100, 1, |i, _| i as f64 / 50. - 1. );
        let noise = standard_normal(100, 1, &mut rng).scale(0.05);
        let y = x.map(|v| 1. - v ) + noise;
        mix.add_data(y, Some(x), whiten, LabelInit::Prior, &mut rng).unwrap();
        mix.resample_model(5, &mut rng).unwrap();
        mix.meanfield_coordinate_descent(1E-6, 200).unwrap();
        mix
    }

    #[test]
    fn activations_sum_to_one_over_used() {
        let mix = fitted(false);
        let x = DMatrix::from_row_slice(3, 1, &[-0.5, 0., f64::NAN]);
        let act = mix.meanfield_predictive_activation(&x).unwrap();
        assert_eq!(act.ncols(), mix.used_labels().len());
        for row in act.row_iter() {
            assert!((row.sum() - 1.).abs() < 1E-8);
        }
    }

    #[test]
    fn predictions_follow_the_line() {
        for whiten in [false, true].iter() {
            let mix = fitted(*whiten);
            let x = DMatrix::from_row_slice(2, 1, &[-0.5, 0.5]);
            let y = DMatrix::from_row_slice(2, 1, &[1.5, 0.5]);
            for mode in [Mode::Average, Mode::Mode].iter() {
                let pred = mix.meanfield_prediction(&x, Some(&y), *mode).unwrap();
                assert!(pred.mse(&y).unwrap() < 0.01);
                assert!(pred.std.iter().all(|s| *s > 0. && *s < 0.5 ));
                assert!(pred.mean_nlpd().unwrap() < 0.);
            }
        }
    }

    #[test]
    fn prediction_requires_data() {
        let basis = NormalWishart::new(DVector::zeros(1), 0.01, DMatrix::identity(1, 1), 3.).unwrap();
        let model = MatrixNormalWishart::new(DMatrix::zeros(1, 2), DMatrix::identity(2, 2), DMatrix::identity(1, 1), 3.).unwrap();
        let mix = MixtureOfLinearGaussians::with_priors(
            Gating::new(GatingKind::Dirichlet, 2, 1.).unwrap(), basis, model, true, None
        ).unwrap();
        let x = DMatrix::zeros(1, 1);
        assert!(mix.meanfield_prediction(&x, None, Mode::Average).is_err());
        assert!("median".parse::<Mode>().is_err());
        assert_eq!("mode".parse::<Mode>().unwrap(), Mode::Mode);
    }

}
