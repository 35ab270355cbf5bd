use nalgebra::*;
use rand::Rng;
use serde::{Serialize, Deserialize};
use crate::error::BayesError;
use crate::prob::*;
use super::*;

/// A local regression expert: a Gaussian density over the inputs (the "basis", which decides
/// where in input space the expert is responsible) and a linear-Gaussian model of the targets
/// given the inputs. Sufficient statistics are the basis statistics followed by the model statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearGaussianExpert {

    pub basis : GaussianWithNormalWishart,

    pub model : LinearGaussianWithMatrixNormalWishart

}

impl LinearGaussianExpert {

    pub fn new(basis : GaussianWithNormalWishart, model : LinearGaussianWithMatrixNormalWishart) -> Result<Self, BayesError> {
        BayesError::check_dim(basis.dim(), model.input_dim())?;
        Ok(Self { basis, model })
    }

    fn basis_len(&self) -> usize {
        Conjugate::prior(&self.basis).link().nrows()
    }

    fn split(&self, stats : &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let n = self.basis_len();
        (stats.rows(0, n).clone_owned(), stats.rows(n, stats.nrows() - n).clone_owned())
    }

    fn input<'a>(&self, batch : &'a Batch) -> DMatrixSlice<'a, f64> {
        match batch.input_slice() {
            Some(x) => x,
            None => batch.target().slice((0, 0), (batch.len(), 0))
        }
    }

}

impl Component for LinearGaussianExpert {

    fn target_dim(&self) -> usize {
        self.model.dim()
    }

    fn input_dim(&self) -> Option<usize> {
        Some(self.model.input_dim())
    }

    fn zero_statistics(&self) -> DVector<f64> {
        DVector::zeros(self.basis_len() + Conjugate::prior(&self.model).link().nrows())
    }

    fn sufficient_statistics(&self, batch : &Batch, weights : &DVector<f64>) -> DVector<f64> {
        let x = self.input(batch);
        let basis = Conjugate::statistics(&self.basis, x, None, Some(weights));
        let model = Conjugate::statistics(&self.model, batch.target_slice(), Some(x), Some(weights));
        let mut stats = DVector::zeros(basis.nrows() + model.nrows());
        stats.rows_mut(0, basis.nrows()).copy_from(&basis);
        stats.rows_mut(basis.nrows(), model.nrows()).copy_from(&model);
        stats
    }

    fn score(&self, batch : &Batch) -> DVector<f64> {
        let x = self.input(batch);
        Conjugate::log_likelihood(&self.basis, x, None) +
            Conjugate::log_likelihood(&self.model, batch.target_slice(), Some(x))
    }

    fn expected_score(&self, batch : &Batch) -> DVector<f64> {
        let x = self.input(batch);
        Conjugate::expected_log_likelihood(&self.basis, x, None) +
            Conjugate::expected_log_likelihood(&self.model, batch.target_slice(), Some(x))
    }

    fn gibbs_step<R>(&mut self, stats : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let (basis, model) = self.split(stats);
        self.basis.resample_statistics(&basis, rng)?;
        self.model.resample_statistics(&model, rng)
    }

    fn meanfield_step(&mut self, stats : &DVector<f64>) -> Result<(), BayesError> {
        let (basis, model) = self.split(stats);
        self.basis.meanfield_statistics(&basis)?;
        self.model.meanfield_statistics(&model)
    }

    fn stochastic_step(&mut self, stats : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        let (basis, model) = self.split(stats);
        self.basis.meanfield_sgdstep_statistics(&basis, prob, stepsize)?;
        self.model.meanfield_sgdstep_statistics(&model, prob, stepsize)
    }

    fn lowerbound(&self) -> f64 {
        Conjugate::variational_lowerbound(&self.basis) + Conjugate::variational_lowerbound(&self.model)
    }

    fn promote_posterior(&mut self) {
        Conjugate::promote(&mut self.basis);
        Conjugate::promote(&mut self.model);
    }

}

impl MixtureOfLinearGaussians {

    /// Mixture of experts sharing the same basis and model priors.
    pub fn with_priors(
        gating : Gating,
        basis : NormalWishart,
        model : MatrixNormalWishart,
        affine : bool,
        ard : Option<(Gamma, usize)>
    ) -> Result<Self, BayesError> {
        let components = (0..gating.size()).map(|_| {
            let mut linear = LinearGaussianWithMatrixNormalWishart::new(model.clone(), affine)?;
            if let Some((hyper, iters)) = &ard {
                linear = linear.with_automatic_relevance(hyper.clone(), *iters)?;
            }
            LinearGaussianExpert::new(GaussianWithNormalWishart::new(basis.clone())?, linear)
        }).collect::<Result<Vec<_>, BayesError>>()?;
        Mixture::new(gating, components)
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn expert_statistics_concatenate_basis_and_model() {
        let mut rng = StdRng::seed_from_u64(13);
        let basis = NormalWishart::new(DVector::zeros(1), 0.01, DMatrix::identity(1, 1), 3.).unwrap();
        let model = MatrixNormalWishart::new(DMatrix::zeros(1, 2), DMatrix::identity(2, 2), DMatrix::identity(1, 1), 3.).unwrap();
        let mut mix = MixtureOfLinearGaussians::with_priors(
            Gating::new(GatingKind::StickBreaking, 2, 1.).unwrap(), basis, model, true, None
        ).unwrap();
        let x = DMatrix::from_row_slice(3, 1, &[0., 1., 2.]);
        let y = DMatrix::from_row_slice(3, 1, &[1., 3., 5.]);
        mix.add_data(y, Some(x.clone()), false, LabelInit::Given(vec![0, 0, 0]), &mut rng).unwrap();
        let stats = mix.component_statistics(&mix.label_weights());
        let expert = &mix.components()[0];
        assert_eq!(stats[0].nrows(), expert.zero_statistics().nrows());
        // Basis count sits after the 1-d sum; model count is the last entry.
        assert_eq!(stats[0][1], 3.);
        assert_eq!(stats[0][stats[0].nrows() - 1], 3.);
        assert!(mix.add_data(DMatrix::zeros(2, 1), None, false, LabelInit::Prior, &mut rng).is_err());
    }

}
