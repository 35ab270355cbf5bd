/// Error type shared by construction, ingestion, inference and prediction.
pub mod error;

/// Conjugate exponential-family pairs (Gaussian/Normal-Wishart, linear-Gaussian/Matrix-Normal-Wishart,
/// categorical/Dirichlet and categorical/stick-breaking), expressed through their natural parameters,
/// with the special functions and factorizations they share.
pub mod prob;

/// Mixture container: gating, components, attached batches with their labels, and the
/// whitening transforms fitted on ingestion. Also the Gaussian mixture with a tied precision.
pub mod mixture;

/// Inference passes over a mixture (Gibbs sampling, mean-field coordinate ascent and stochastic
/// variational inference), the super-iteration schedule combining them, and a seed pool for
/// independent restarts.
pub mod fit;

/// Posterior-predictive moments and densities for mixtures of linear-Gaussian experts.
pub mod predict;

/// Serializable model and schedule configuration.
pub mod config;

pub use error::BayesError;

pub use mixture::{Mixture, MixtureOfGaussians, MixtureOfLinearGaussians, MixtureOfTiedGaussians, Batch, LabelInit};

pub use predict::{Mode, Prediction};

pub use config::Config;
