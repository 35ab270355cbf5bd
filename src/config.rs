use nalgebra::*;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::prob::*;
use crate::mixture::*;
use crate::fit::Schedule;
use crate::predict::Mode;

/// Hyperparameters of the Normal-Wishart prior over the input (or target) density. The prior
/// mean is zero; the Wishart scale is psi times the identity, and its degrees of freedom are
/// the dimension plus nu_offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasisConfig {

    pub kappa : f64,

    pub psi : f64,

    pub nu_offset : f64

}

impl Default for BasisConfig {

    fn default() -> Self {
        Self { kappa : 1E-2, psi : 1., nu_offset : 1. }
    }

}

/// Hyperparameters of the Matrix-Normal-Wishart prior over the regression coefficients: zero mean,
/// column precision k times the identity, Wishart scale psi times the identity, and degrees of
/// freedom equal to the target dimension plus nu_offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {

    pub k : f64,

    pub psi : f64,

    pub nu_offset : f64

}

impl Default for ModelConfig {

    fn default() -> Self {
        Self { k : 1E-2, psi : 1., nu_offset : 1. }
    }

}

/// Shape and rate of the Gamma hyperprior over the coefficient precisions, and the number of
/// inner updates per mean-field step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArdConfig {

    pub alpha : f64,

    pub beta : f64,

    pub iters : usize

}

impl Default for ArdConfig {

    fn default() -> Self {
        Self { alpha : 1., beta : 1E-2, iters : 5 }
    }

}

/// Full description of a mixture and of how to fit it. Missing JSON fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {

    /// Number of components (truncation level for stick-breaking gatings).
    pub nb_models : usize,

    pub gating : GatingKind,

    /// Concentration of the gating prior.
    pub alpha : f64,

    pub basis : BasisConfig,

    pub model : ModelConfig,

    /// Whether the regressors are augmented with an intercept column.
    pub affine : bool,

    pub ard : Option<ArdConfig>,

    pub prediction : Mode,

    pub whiten : bool,

    pub schedule : Schedule

}

impl Default for Config {

    fn default() -> Self {
        Self {
            nb_models : 25,
            gating : GatingKind::StickBreaking,
            alpha : 1.,
            basis : BasisConfig::default(),
            model : ModelConfig::default(),
            affine : true,
            ard : None,
            prediction : Mode::Average,
            whiten : false,
            schedule : Schedule::default()
        }
    }

}

impl Config {

    pub fn from_json(content : &str) -> Result<Self, anyhow::Error> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, anyhow::Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn build_gating(&self) -> Result<Gating, BayesError> {
        Gating::new(self.gating, self.nb_models, self.alpha)
    }

    fn normal_wishart(&self, dim : usize) -> Result<NormalWishart, BayesError> {
        NormalWishart::new(
            DVector::zeros(dim),
            self.basis.kappa,
            DMatrix::identity(dim, dim).scale(self.basis.psi),
            dim as f64 + self.basis.nu_offset
        )
    }

    fn matrix_normal_wishart(&self, input_dim : usize, target_dim : usize) -> Result<MatrixNormalWishart, BayesError> {
        let p = input_dim + if self.affine { 1 } else { 0 };
        MatrixNormalWishart::new(
            DMatrix::zeros(target_dim, p),
            DMatrix::identity(p, p).scale(self.model.k),
            DMatrix::identity(target_dim, target_dim).scale(self.model.psi),
            target_dim as f64 + self.model.nu_offset
        )
    }

    /// Gaussian mixture over dim columns, using the basis hyperparameters for every component.
    pub fn gaussian_mixture(&self, dim : usize) -> Result<MixtureOfGaussians, BayesError> {
        MixtureOfGaussians::with_prior(self.build_gating()?, self.normal_wishart(dim)?)
    }

    /// Gaussian mixture over dim columns whose components share one precision matrix.
    pub fn tied_mixture(&self, dim : usize) -> Result<MixtureOfTiedGaussians, BayesError> {
        MixtureOfTiedGaussians::with_prior(self.build_gating()?, self.normal_wishart(dim)?)
    }

    /// Mixture of linear-Gaussian experts from input_dim input columns to target_dim target columns.
    pub fn regression_mixture(&self, input_dim : usize, target_dim : usize) -> Result<MixtureOfLinearGaussians, BayesError> {
        let ard = match &self.ard {
            Some(ard) => {
                let p = input_dim + if self.affine { 1 } else { 0 };
                Some((Gamma::isotropic(p, ard.alpha, ard.beta)?, ard.iters))
            },
            None => None
        };
        MixtureOfLinearGaussians::with_priors(
            self.build_gating()?,
            self.normal_wishart(input_dim)?,
            self.matrix_normal_wishart(input_dim, target_dim)?,
            self.affine,
            ard
        )
    }

}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn partial_json_takes_defaults() {
        let config = Config::from_json(r#"{ "nb_models" : 4, "gating" : "dirichlet", "prediction" : "mode" }"#).unwrap();
        assert_eq!(config.nb_models, 4);
        assert_eq!(config.gating, GatingKind::Dirichlet);
        assert_eq!(config.prediction, Mode::Mode);
        assert_eq!(config.schedule, Schedule::default());
        let back = Config::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn builders_honor_dimensions() {
        let mut config = Config::default();
        config.nb_models = 3;
        config.ard = Some(ArdConfig::default());
        let mix = config.regression_mixture(2, 1).unwrap();
        assert_eq!(mix.size(), 3);
        assert_eq!(mix.components()[0].input_dim(), Some(2));
        assert!(mix.components()[0].model.automatic_relevance().is_some());
        let gmm = config.gaussian_mixture(3).unwrap();
        assert_eq!(gmm.components()[0].target_dim(), 3);
        assert_eq!(config.tied_mixture(3).unwrap().size(), 3);
        config.nb_models = 0;
        assert!(config.gaussian_mixture(3).is_err());
        assert!(config.tied_mixture(3).is_err());
    }

}
