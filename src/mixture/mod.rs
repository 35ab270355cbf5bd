use nalgebra::*;
use rand::Rng;
use std::fmt::Debug;
use crate::error::BayesError;
use crate::prob::*;

mod whiten;

pub use whiten::*;

mod expert;

pub use expert::*;

mod tied;

pub use tied::*;

/// A mixture component as seen by the inference engine: a conjugate pair (or a product of
/// conjugate pairs) that scores the rows of a batch and absorbs weighted sufficient statistics.
///
/// Statistics are always laid out as the natural parameter of the component posterior, so the
/// engine can add them over batches and feed them to the Gibbs, mean-field or stochastic updates
/// without knowing the family.
pub trait Component
where
    Self : Debug + Clone
{

    /// Number of target columns.
    fn target_dim(&self) -> usize;

    /// Number of input columns, for components conditioned on an input.
    fn input_dim(&self) -> Option<usize>;

    fn zero_statistics(&self) -> DVector<f64>;

    fn sufficient_statistics(&self, batch : &Batch, weights : &DVector<f64>) -> DVector<f64>;

    /// Per-row log-likelihood under the current parameter sample.
    fn score(&self, batch : &Batch) -> DVector<f64>;

    /// Per-row expected log-likelihood under the variational posterior.
    fn expected_score(&self, batch : &Batch) -> DVector<f64>;

    fn gibbs_step<R>(&mut self, stats : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized;

    fn meanfield_step(&mut self, stats : &DVector<f64>) -> Result<(), BayesError>;

    fn stochastic_step(&mut self, stats : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError>;

    fn lowerbound(&self) -> f64;

    fn promote_posterior(&mut self);

}

impl Component for GaussianWithNormalWishart {

    fn target_dim(&self) -> usize {
        self.dim()
    }

    fn input_dim(&self) -> Option<usize> {
        None
    }

    fn zero_statistics(&self) -> DVector<f64> {
        DVector::zeros(Conjugate::prior(self).link().nrows())
    }

    fn sufficient_statistics(&self, batch : &Batch, weights : &DVector<f64>) -> DVector<f64> {
        Conjugate::statistics(self, batch.target_slice(), None, Some(weights))
    }

    fn score(&self, batch : &Batch) -> DVector<f64> {
        Conjugate::log_likelihood(self, batch.target_slice(), None)
    }

    fn expected_score(&self, batch : &Batch) -> DVector<f64> {
        Conjugate::expected_log_likelihood(self, batch.target_slice(), None)
    }

    fn gibbs_step<R>(&mut self, stats : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        self.resample_statistics(stats, rng)
    }

    fn meanfield_step(&mut self, stats : &DVector<f64>) -> Result<(), BayesError> {
        self.meanfield_statistics(stats)
    }

    fn stochastic_step(&mut self, stats : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        self.meanfield_sgdstep_statistics(stats, prob, stepsize)
    }

    fn lowerbound(&self) -> f64 {
        Conjugate::variational_lowerbound(self)
    }

    fn promote_posterior(&mut self) {
        Conjugate::promote(self)
    }

}

/// Rows of targets (and optionally inputs) added to a mixture in a single call. Rows holding
/// any non-finite target or input entry are flagged as missing once, at construction.
#[derive(Debug, Clone)]
pub struct Batch {

    target : DMatrix<f64>,

    input : Option<DMatrix<f64>>,

    valid : Vec<bool>

}

impl Batch {

    pub fn new(target : DMatrix<f64>, input : Option<DMatrix<f64>>) -> Result<Self, BayesError> {
        if let Some(input) = &input {
            BayesError::check_dim(target.nrows(), input.nrows())?;
        }
        let valid = (0..target.nrows()).map(|i| {
            is_observed(&target.row(i)) && input.as_ref().map(|x| is_observed(&x.row(i)) ).unwrap_or(true)
        }).collect();
        Ok(Self { target, input, valid })
    }

    pub fn len(&self) -> usize {
        self.target.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn target(&self) -> &DMatrix<f64> {
        &self.target
    }

    pub fn input(&self) -> Option<&DMatrix<f64>> {
        self.input.as_ref()
    }

    pub fn valid(&self) -> &[bool] {
        &self.valid[..]
    }

    pub fn nb_valid(&self) -> usize {
        self.valid.iter().filter(|v| **v ).count()
    }

    pub fn target_slice(&self) -> DMatrixSlice<'_, f64> {
        self.target.slice((0, 0), self.target.shape())
    }

    pub fn input_slice(&self) -> Option<DMatrixSlice<'_, f64>> {
        self.input.as_ref().map(|x| x.slice((0, 0), x.shape()) )
    }

    /// Copies the (batch, row) pairs into a single batch, in order.
    pub(crate) fn gather(batches : &[Batch], rows : &[(usize, usize)]) -> Batch {
        let ncols = batches.first().map(|b| b.target.ncols() ).unwrap_or(0);
        let target = DMatrix::from_fn(rows.len(), ncols, |i, j| batches[rows[i].0].target[(rows[i].1, j)] );
        let input = batches.first().and_then(|b| b.input.as_ref() ).map(|first| {
            DMatrix::from_fn(rows.len(), first.ncols(), |i, j| {
                batches[rows[i].0].input.as_ref().map(|x| x[(rows[i].1, j)] ).unwrap_or(f64::NAN)
            })
        });
        let valid = rows.iter().map(|(b, r)| batches[*b].valid[*r] ).collect();
        Batch { target, input, valid }
    }

}

/// How labels of newly-added rows are initialized.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelInit {

    /// Draw weights from the gating prior, then draw labels from those weights.
    Prior,

    /// Draw labels from the current (sampled) model responsibilities.
    Responsibilities,

    /// Caller-supplied labels, one per row.
    Given(Vec<usize>)

}

impl Default for LabelInit {

    fn default() -> Self {
        LabelInit::Prior
    }

}

/// A finite (or truncated) mixture: a gating distribution over a fixed set of components,
/// together with the batches of observations attached to it and one label per observed row.
#[derive(Debug, Clone)]
pub struct Mixture<C>
where
    C : Component
{

    pub(crate) gating : Gating,

    pub(crate) components : Vec<C>,

    pub(crate) batches : Vec<Batch>,

    pub(crate) labels : Vec<Vec<usize>>,

    pub(crate) target_transform : Option<Whitening>,

    pub(crate) input_transform : Option<Whitening>

}

/// Gaussian mixture over the target columns.
pub type MixtureOfGaussians = Mixture<GaussianWithNormalWishart>;

/// Mixture of linear-Gaussian experts with Gaussian input densities.
pub type MixtureOfLinearGaussians = Mixture<LinearGaussianExpert>;

impl<C> Mixture<C>
where
    C : Component
{

    pub fn new(gating : Gating, components : Vec<C>) -> Result<Self, BayesError> {
        if components.is_empty() {
            return Err(BayesError::InvalidComponentCount);
        }
        BayesError::check_dim(components.len(), gating.size())?;
        for c in components.iter().skip(1) {
            BayesError::check_dim(components[0].target_dim(), c.target_dim())?;
            BayesError::check_dim(components[0].input_dim().unwrap_or(0), c.input_dim().unwrap_or(0))?;
        }
        Ok(Self {
            gating,
            components,
            batches : Vec::new(),
            labels : Vec::new(),
            target_transform : None,
            input_transform : None
        })
    }

    /// Number of components (the truncation level for stick-breaking gatings).
    pub fn size(&self) -> usize {
        self.components.len()
    }

    pub fn gating(&self) -> &Gating {
        &self.gating
    }

    pub fn components(&self) -> &[C] {
        &self.components[..]
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches[..]
    }

    pub fn labels(&self) -> &[Vec<usize>] {
        &self.labels[..]
    }

    pub fn has_data(&self) -> bool {
        self.batches.iter().any(|b| !b.is_empty() )
    }

    pub fn nb_rows(&self) -> usize {
        self.batches.iter().map(|b| b.len() ).sum()
    }

    pub fn target_transform(&self) -> Option<&Whitening> {
        self.target_transform.as_ref()
    }

    pub fn input_transform(&self) -> Option<&Whitening> {
        self.input_transform.as_ref()
    }

    /// Number of rows assigned to each component, over all batches.
    pub fn label_usages(&self) -> Vec<usize> {
        let mut usages = vec![0; self.size()];
        for l in self.labels.iter().flatten() {
            usages[*l] += 1;
        }
        usages
    }

    /// Sorted indices of the components holding at least one row.
    pub fn used_labels(&self) -> Vec<usize> {
        self.label_usages().iter()
            .enumerate()
            .filter(|(_, n)| **n > 0 )
            .map(|(k, _)| k )
            .collect()
    }

    /// Appends a batch. When whiten is set and no transform has been fitted yet, a whitening
    /// transform is fitted on the observed rows of this batch (for targets, and for inputs when
    /// present). A stored transform is always applied to later batches, so that every batch
    /// lives in the same space. Whitening is refused while untransformed batches are attached.
    pub fn add_data<R>(
        &mut self,
        target : DMatrix<f64>,
        input : Option<DMatrix<f64>>,
        whiten : bool,
        init : LabelInit,
        rng : &mut R
    ) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let raw = Batch::new(target, input)?;
        self.check_batch(&raw)?;
        if whiten {
            self.fit_transforms(std::slice::from_ref(&raw))?;
        }
        self.attach(raw, init, rng)
    }

    /// Appends several batches with the same label policy. When whiten is set and no transform
    /// has been fitted yet, a single transform is fitted over the observed rows of every batch.
    pub fn add_batches<R, I>(&mut self, batches : I, whiten : bool, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized,
        I : IntoIterator<Item=(DMatrix<f64>, Option<DMatrix<f64>>)>
    {
        let mut raws = Vec::new();
        for (target, input) in batches {
            let raw = Batch::new(target, input)?;
            self.check_batch(&raw)?;
            raws.push(raw);
        }
        if whiten {
            self.fit_transforms(&raws)?;
        }
        for raw in raws {
            self.attach(raw, LabelInit::Prior, rng)?;
        }
        Ok(())
    }

    /// Fits the target (and input) transforms over the pooled rows of raws, unless a transform
    /// is already stored.
    fn fit_transforms(&mut self, raws : &[Batch]) -> Result<(), BayesError> {
        if self.target_transform.is_some() || self.input_transform.is_some() {
            return Ok(());
        }
        if self.has_data() {
            return Err(BayesError::UnwhitenedData);
        }
        let rows : Vec<(usize, usize)> = raws.iter()
            .enumerate()
            .flat_map(|(b, raw)| (0..raw.len()).map(move |r| (b, r) ) )
            .collect();
        let pooled = Batch::gather(raws, &rows);
        let target = Whitening::fit(pooled.target(), pooled.valid())?;
        let input = match pooled.input() {
            Some(x) => Some(Whitening::fit(x, pooled.valid())?),
            None => None
        };
        self.target_transform = Some(target);
        self.input_transform = input;
        Ok(())
    }

    fn attach<R>(&mut self, raw : Batch, init : LabelInit, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let batch = self.transform_batch(raw)?;
        let labels = match init {
            LabelInit::Prior => self.gating.rvs_from_prior(batch.len(), rng)?,
            LabelInit::Responsibilities => self.sample_labels(&batch, rng)?,
            LabelInit::Given(labels) => {
                if labels.len() != batch.len() {
                    return Err(BayesError::LabelLength { expected : batch.len(), found : labels.len() });
                }
                if let Some(l) = labels.iter().find(|l| **l >= self.size() ) {
                    return Err(BayesError::LabelOutOfRange { label : *l, size : self.size() });
                }
                labels
            }
        };
        log::debug!("Added batch with {} rows ({} observed)", batch.len(), batch.nb_valid());
        self.batches.push(batch);
        self.labels.push(labels);
        Ok(())
    }

    /// Drops all batches and labels. Component and gating posteriors are kept.
    pub fn clear_data(&mut self) {
        self.batches.clear();
        self.labels.clear();
    }

    /// Drops the stored whitening transforms. Only valid when no data is attached,
    /// since attached batches live in the whitened space.
    pub fn clear_transform(&mut self) -> Result<(), BayesError> {
        if self.has_data() {
            return Err(BayesError::InvalidHyperparameter(String::from("cannot drop transform while data is attached")));
        }
        self.target_transform = None;
        self.input_transform = None;
        Ok(())
    }

    /// Copies every posterior (components and gating) into the respective prior.
    pub fn promote(&mut self) {
        for c in self.components.iter_mut() {
            c.promote_posterior();
        }
        self.gating.promote();
    }

    pub(crate) fn check_batch(&self, batch : &Batch) -> Result<(), BayesError> {
        let c = &self.components[0];
        BayesError::check_dim(c.target_dim(), batch.target().ncols())?;
        match (c.input_dim(), batch.input()) {
            (Some(d), Some(x)) => BayesError::check_dim(d, x.ncols()),
            (Some(d), None) => Err(BayesError::DimensionMismatch { expected : d, found : 0 }),
            (None, Some(x)) => Err(BayesError::DimensionMismatch { expected : 0, found : x.ncols() }),
            (None, None) => Ok(())
        }
    }

    /// Validates a raw batch and maps it into the space of the attached data.
    pub(crate) fn prepare(&self, target : DMatrix<f64>, input : Option<DMatrix<f64>>) -> Result<Batch, BayesError> {
        let raw = Batch::new(target, input)?;
        self.check_batch(&raw)?;
        self.transform_batch(raw)
    }

    fn transform_batch(&self, raw : Batch) -> Result<Batch, BayesError> {
        if self.target_transform.is_none() && self.input_transform.is_none() {
            return Ok(raw);
        }
        let target = match &self.target_transform {
            Some(t) => t.transform(raw.target())?,
            None => raw.target,
        };
        let input = match (&self.input_transform, raw.input) {
            (Some(t), Some(x)) => Some(t.transform(&x)?),
            (_, input) => input
        };
        Ok(Batch { target, input, valid : raw.valid })
    }

    /// Per-row, per-component log joint scores. Missing rows, and rows every component
    /// scores at negative infinity, are scored by the gating alone; the returned flags
    /// mark the rows whose scores carry data.
    pub(crate) fn joint_scores<F>(&self, batch : &Batch, gating : &DVector<f64>, score : F) -> (DMatrix<f64>, Vec<bool>)
    where
        F : Fn(&C, &Batch) -> DVector<f64>
    {
        let (n, k) = (batch.len(), self.size());
        let mut scores = DMatrix::zeros(n, k);
        for (j, c) in self.components.iter().enumerate() {
            let ll = score(c, batch);
            for i in 0..n {
                scores[(i, j)] = gating[j] + ll[i];
            }
        }
        let mut observed = batch.valid.clone();
        for i in 0..n {
            if observed[i] && !scores.row(i).iter().any(|s| s.is_finite() ) {
                log::warn!("Row {} has no finite component score; scoring it by the gating alone", i);
                observed[i] = false;
            }
            if !observed[i] {
                scores.row_mut(i).copy_from(&gating.transpose());
            }
        }
        (scores, observed)
    }

    /// Log joint scores under the current parameter samples.
    pub fn log_scores(&self, batch : &Batch) -> (DMatrix<f64>, Vec<bool>) {
        self.joint_scores(batch, &self.gating.log_likelihood(), |c, b| c.score(b) )
    }

    /// Expected log joint scores under the variational posteriors.
    pub fn expected_log_scores(&self, batch : &Batch) -> (DMatrix<f64>, Vec<bool>) {
        self.joint_scores(batch, &self.gating.expected_log_likelihood(), |c, b| c.expected_score(b) )
    }

    pub(crate) fn sample_labels<R>(&self, batch : &Batch, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        let (scores, _) = self.log_scores(batch);
        let probs = crate::fit::normalize_rows(&scores);
        probs.row_iter()
            .map(|row| sample_index(row.transpose().as_slice(), rng) )
            .collect()
    }

    /// Responsibility-weighted sufficient statistics per component, summed over batches.
    /// weights holds one (rows x components) matrix per attached batch.
    pub(crate) fn component_statistics(&self, weights : &[DMatrix<f64>]) -> Vec<DVector<f64>> {
        self.components.iter().enumerate().map(|(k, c)| {
            self.batches.iter().zip(weights.iter()).fold(c.zero_statistics(), |acc, (b, w)| {
                acc + c.sufficient_statistics(b, &w.column(k).clone_owned())
            })
        }).collect()
    }

    pub(crate) fn weight_counts(&self, weights : &[DMatrix<f64>]) -> DVector<f64> {
        weights.iter().fold(DVector::zeros(self.size()), |acc, w| {
            acc + w.row_sum().transpose()
        })
    }

    /// Hard (one-hot) weights from the current labels, with missing rows zeroed.
    pub(crate) fn label_weights(&self) -> Vec<DMatrix<f64>> {
        self.batches.iter().zip(self.labels.iter()).map(|(b, labels)| {
            let mut w = DMatrix::zeros(b.len(), self.size());
            for (i, l) in labels.iter().enumerate() {
                if b.valid[i] {
                    w[(i, *l)] = 1.;
                }
            }
            w
        }).collect()
    }

    /// Log-likelihood of a new batch under the current parameter samples: the sum over
    /// observed rows of the log-sum-exp of the joint scores.
    pub fn log_likelihood(&self, target : DMatrix<f64>, input : Option<DMatrix<f64>>) -> Result<f64, BayesError> {
        let batch = self.prepare(target, input)?;
        let (scores, observed) = self.log_scores(&batch);
        Ok(scores.row_iter()
            .zip(observed.iter())
            .filter(|(_, o)| **o )
            .map(|(row, _)| crate::fit::logsumexp(row.iter().cloned()) )
            .sum())
    }

}

impl MixtureOfGaussians {

    /// Gaussian mixture with one Normal-Wishart prior shared by every component.
    pub fn with_prior(gating : Gating, prior : NormalWishart) -> Result<Self, BayesError> {
        let components = (0..gating.size())
            .map(|_| GaussianWithNormalWishart::new(prior.clone()) )
            .collect::<Result<Vec<_>, _>>()?;
        Mixture::new(gating, components)
    }

    /// Draws n observations from the current parameter samples, returning the rows and
    /// the component each row was drawn from.
    pub fn rvs<R>(&self, n : usize, rng : &mut R) -> Result<(DMatrix<f64>, Vec<usize>), BayesError>
    where
        R : Rng + ?Sized
    {
        let labels = self.gating.rvs(n, rng)?;
        let mut obs = DMatrix::zeros(n, self.components[0].dim());
        for (i, l) in labels.iter().enumerate() {
            let y = self.components[*l].rvs(1, None, rng)?;
            obs.row_mut(i).copy_from(&y.row(0));
        }
        Ok((obs, labels))
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gmm(k : usize) -> MixtureOfGaussians {
        let prior = NormalWishart::new(DVector::zeros(2), 0.01, DMatrix::identity(2, 2), 3.).unwrap();
        MixtureOfGaussians::with_prior(Gating::new(GatingKind::Dirichlet, k, 1.).unwrap(), prior).unwrap()
    }

    #[test]
    fn labels_follow_ingestion() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut mix = gmm(3);
        assert!(mix.used_labels().is_empty());
        let y = DMatrix::from_element(4, 2, 1.);
        mix.add_data(y.clone(), None, false, LabelInit::Given(vec![0, 2, 2, 0]), &mut rng).unwrap();
        assert_eq!(mix.used_labels(), vec![0, 2]);
        assert!(mix.add_data(y.clone(), None, false, LabelInit::Given(vec![0, 3, 2, 0]), &mut rng).is_err());
        assert!(mix.add_data(y.clone(), None, false, LabelInit::Given(vec![0]), &mut rng).is_err());
        assert!(mix.add_data(DMatrix::zeros(2, 3), None, false, LabelInit::Prior, &mut rng).is_err());
        mix.clear_data();
        assert!(mix.used_labels().is_empty());
    }

    #[test]
    fn missing_rows_are_scored_by_gating() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut mix = gmm(2);
        let y = DMatrix::from_row_slice(3, 2, &[0., 0., f64::NAN, 1., 1., 1.]);
        mix.add_data(y, None, false, LabelInit::Prior, &mut rng).unwrap();
        let (scores, observed) = mix.log_scores(&mix.batches()[0]);
        assert_eq!(observed, vec![true, false, true]);
        assert_eq!(scores.row(1).transpose(), mix.gating().log_likelihood());
        let weights = mix.label_weights();
        assert_eq!(weights[0].row(1).sum(), 0.);
    }

    fn shifted_rows(n : usize, rng : &mut StdRng) -> DMatrix<f64> {
        standard_normal(n, 2, rng).scale(10.).add_scalar(100.)
    }

    #[test]
    fn whitening_requires_a_single_space() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut mix = gmm(2);
        mix.add_data(shifted_rows(30, &mut rng), None, false, LabelInit::Prior, &mut rng).unwrap();
        match mix.add_data(shifted_rows(30, &mut rng), None, true, LabelInit::Prior, &mut rng) {
            Err(BayesError::UnwhitenedData) => { },
            other => panic!("Unexpected outcome {:?}", other)
        }
        assert_eq!(mix.batches().len(), 1);
        assert!(mix.target_transform().is_none());

        mix.clear_data();
        mix.add_data(shifted_rows(30, &mut rng), None, true, LabelInit::Prior, &mut rng).unwrap();
        mix.add_data(shifted_rows(30, &mut rng), None, false, LabelInit::Prior, &mut rng).unwrap();
        for b in mix.batches() {
            assert!(b.target().mean().abs() < 2.);
        }
    }

    #[test]
    fn batches_share_one_pooled_transform() {
        let mut rng = StdRng::seed_from_u64(14);
        let low = standard_normal(40, 2, &mut rng);
        let high = standard_normal(40, 2, &mut rng).add_scalar(10.);
        let mut mix = gmm(2);
        mix.add_batches(vec![(low.clone(), None), (high.clone(), None)], true, &mut rng).unwrap();
        let mut stacked = low.clone().insert_rows(40, 40, 0.);
        stacked.rows_mut(40, 40).copy_from(&high);
        let pooled = Whitening::fit(&stacked, &vec![true; 80]).unwrap();
        let fitted = mix.target_transform().unwrap();
        assert!((fitted.mean() - pooled.mean()).norm() < 1E-8);
        assert_eq!(mix.batches().len(), 2);

        // The pooled mean sits halfway between the batches, so their whitened means are opposite.
        let (m0, m1) = (mix.batches()[0].target().row_mean(), mix.batches()[1].target().row_mean());
        assert!((&m0 + &m1).norm() < 1E-8);
        assert!(m0.norm() > 0.5);
    }

}
