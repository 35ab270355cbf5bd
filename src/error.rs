use thiserror::Error;

/// Errors surfaced by construction, data ingestion and prediction. Degenerate
/// posteriors (components without data) and rejected ARD updates are recovered
/// internally and never reach this type.
#[derive(Debug, Clone, Error)]
pub enum BayesError {

    #[error("Dimension mismatch (expected {expected}, found {found})")]
    DimensionMismatch { expected : usize, found : usize },

    #[error("Informed {0} matrix is not positive-definite")]
    NotPositiveDefinite(&'static str),

    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("Mixture requires at least one component")]
    InvalidComponentCount,

    #[error("Label {label} outside component range 0..{size}")]
    LabelOutOfRange { label : usize, size : usize },

    #[error("Informed {found} labels for a batch of {expected} rows")]
    LabelLength { expected : usize, found : usize },

    #[error("Operation requires observed data")]
    NoData,

    #[error("Cannot fit a whitening transform while unwhitened data is attached")]
    UnwhitenedData,

    #[error("Unknown prediction mode {0}")]
    InvalidMode(String)

}

impl BayesError {

    pub(crate) fn check_dim(expected : usize, found : usize) -> Result<(), BayesError> {
        if expected == found {
            Ok(())
        } else {
            Err(BayesError::DimensionMismatch { expected, found })
        }
    }

}
