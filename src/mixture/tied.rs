use nalgebra::*;
use rand::Rng;
use std::f64::consts::PI;
use crate::error::BayesError;
use crate::prob::*;
use crate::fit::{normalize_rows, argmax_rows};
use super::*;

/// Gaussian mixture whose components share a single precision matrix L ~ W(psi, nu), with
/// component means mu_k | L ~ N(m, (kappa L)^{-1}) drawn independently given L.
///
/// Fitted by blocked Gibbs sampling: the shared precision is drawn with the means integrated
/// out, then every mean is drawn given the precision, then the gating weights and labels.
#[derive(Debug, Clone)]
pub struct MixtureOfTiedGaussians {

    gating : Gating,

    prior : NormalWishart,

    /// Posterior over the shared precision given the current labels.
    precision_posterior : Wishart,

    /// Posterior location and scale of each mean given the current labels.
    locations : Vec<DVector<f64>>,

    scales : Vec<f64>,

    mus : Vec<DVector<f64>>,

    lmbda : DMatrix<f64>,

    lmbda_lower : DMatrix<f64>,

    log_det : f64,

    batches : Vec<Batch>,

    labels : Vec<Vec<usize>>,

    target_transform : Option<Whitening>

}

/// Per-component observed count, sum and sum of outer products.
struct TiedStatistics {

    n : f64,

    sum : DVector<f64>,

    outer : DMatrix<f64>

}

impl MixtureOfTiedGaussians {

    /// Starts every mean at the prior location and the shared precision at the prior mode.
    pub fn with_prior(gating : Gating, prior : NormalWishart) -> Result<Self, BayesError> {
        if gating.size() == 0 {
            return Err(BayesError::InvalidComponentCount);
        }
        let k = gating.size();
        let (mu, lmbda) = prior.mode();
        let mut mix = Self {
            precision_posterior : prior.wishart().clone(),
            locations : vec![prior.mu().clone(); k],
            scales : vec![prior.kappa(); k],
            mus : vec![mu; k],
            lmbda_lower : DMatrix::identity(prior.dim(), prior.dim()),
            lmbda : DMatrix::identity(prior.dim(), prior.dim()),
            log_det : 0.,
            gating,
            prior,
            batches : Vec::new(),
            labels : Vec::new(),
            target_transform : None
        };
        mix.set_precision(lmbda)?;
        Ok(mix)
    }

    pub fn size(&self) -> usize {
        self.gating.size()
    }

    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    pub fn gating(&self) -> &Gating {
        &self.gating
    }

    pub fn mus(&self) -> &[DVector<f64>] {
        &self.mus[..]
    }

    /// Current sample of the shared precision.
    pub fn precision(&self) -> &DMatrix<f64> {
        &self.lmbda
    }

    pub fn covariance(&self) -> Result<DMatrix<f64>, BayesError> {
        invert_pd(&self.lmbda, "precision")
    }

    pub fn precision_posterior(&self) -> &Wishart {
        &self.precision_posterior
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

    pub fn target_transform(&self) -> Option<&Whitening> {
        self.target_transform.as_ref()
    }

    pub fn label_usages(&self) -> Vec<usize> {
        let mut usages = vec![0; self.size()];
        for l in self.labels.iter().flatten() {
            usages[*l] += 1;
        }
        usages
    }

    pub fn used_labels(&self) -> Vec<usize> {
        self.label_usages().iter()
            .enumerate()
            .filter(|(_, n)| **n > 0 )
            .map(|(k, _)| k )
            .collect()
    }

    fn set_precision(&mut self, lmbda : DMatrix<f64>) -> Result<(), BayesError> {
        let lower = cholesky_lower(&lmbda, "precision")?;
        self.log_det = 2. * lower.diagonal().iter().map(|d| d.ln() ).sum::<f64>();
        self.lmbda_lower = lower;
        self.lmbda = lmbda;
        Ok(())
    }

    /// Appends a batch of rows. With whiten set, a transform is fitted on the observed rows
    /// unless one is stored already; it is refused while untransformed rows are attached.
    pub fn add_data<R>(&mut self, target : DMatrix<f64>, whiten : bool, init : LabelInit, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let raw = Batch::new(target, None)?;
        BayesError::check_dim(self.dim(), raw.target().ncols())?;
        if whiten && self.target_transform.is_none() {
            if self.has_data() {
                return Err(BayesError::UnwhitenedData);
            }
            self.target_transform = Some(Whitening::fit(raw.target(), raw.valid())?);
        }
        let batch = self.transform(raw)?;
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
        log::debug!("Added batch with {} rows ({} observed) to tied mixture", batch.len(), batch.nb_valid());
        self.batches.push(batch);
        self.labels.push(labels);
        Ok(())
    }

    pub fn clear_data(&mut self) {
        self.batches.clear();
        self.labels.clear();
    }

    pub fn clear_transform(&mut self) -> Result<(), BayesError> {
        if self.has_data() {
            return Err(BayesError::InvalidHyperparameter(String::from("cannot drop transform while data is attached")));
        }
        self.target_transform = None;
        Ok(())
    }

    fn transform(&self, raw : Batch) -> Result<Batch, BayesError> {
        match &self.target_transform {
            Some(t) => Ok(Batch { target : t.transform(raw.target())?, input : None, valid : raw.valid }),
            None => Ok(raw)
        }
    }

    fn prepare(&self, target : DMatrix<f64>) -> Result<Batch, BayesError> {
        let raw = Batch::new(target, None)?;
        BayesError::check_dim(self.dim(), raw.target().ncols())?;
        self.transform(raw)
    }

    /// Per-row, per-component log joint scores under the current samples. Missing rows are
    /// scored by the gating alone and flagged in the returned vector.
    pub fn log_scores(&self, batch : &Batch) -> (DMatrix<f64>, Vec<bool>) {
        let gating = self.gating.log_likelihood();
        let norm = -(self.dim() as f64) / 2. * (2. * PI).ln() + 0.5 * self.log_det;
        let scores = DMatrix::from_fn(batch.len(), self.size(), |i, k| {
            if !batch.valid[i] {
                return gating[k];
            }
            let err = batch.target.row(i).transpose() - &self.mus[k];
            gating[k] + norm - 0.5 * self.lmbda_lower.tr_mul(&err).norm_squared()
        });
        (scores, batch.valid.clone())
    }

    /// Normalized responsibilities of new rows.
    pub fn scores(&self, target : DMatrix<f64>) -> Result<DMatrix<f64>, BayesError> {
        let batch = self.prepare(target)?;
        Ok(normalize_rows(&self.log_scores(&batch).0))
    }

    /// Most responsible component of each new row.
    pub fn max_aposteriori(&self, target : DMatrix<f64>) -> Result<Vec<usize>, BayesError> {
        Ok(argmax_rows(&self.scores(target)?))
    }

    /// Sum over observed rows of the log-sum-exp of the joint scores.
    pub fn log_likelihood(&self, target : DMatrix<f64>) -> Result<f64, BayesError> {
        let batch = self.prepare(target)?;
        let (scores, observed) = self.log_scores(&batch);
        Ok(scores.row_iter()
            .zip(observed.iter())
            .filter(|(_, o)| **o )
            .map(|(row, _)| crate::fit::logsumexp(row.iter().cloned()) )
            .sum())
    }

    fn sample_labels<R>(&self, batch : &Batch, rng : &mut R) -> Result<Vec<usize>, BayesError>
    where
        R : Rng + ?Sized
    {
        let probs = normalize_rows(&self.log_scores(batch).0);
        probs.row_iter()
            .map(|row| sample_index(row.transpose().as_slice(), rng) )
            .collect()
    }

    fn statistics(&self) -> Vec<TiedStatistics> {
        let d = self.dim();
        let mut stats : Vec<TiedStatistics> = (0..self.size())
            .map(|_| TiedStatistics { n : 0., sum : DVector::zeros(d), outer : DMatrix::zeros(d, d) })
            .collect();
        for (b, labels) in self.batches.iter().zip(self.labels.iter()) {
            for (i, l) in labels.iter().enumerate() {
                if !b.valid[i] {
                    continue;
                }
                let x = b.target.row(i).transpose();
                let s = &mut stats[*l];
                s.n += 1.;
                s.outer += &x * x.transpose();
                s.sum += x;
            }
        }
        stats
    }

    /// Draws the shared precision from W(nu + N, (psi^{-1} + sum_k [S_k + kappa m m^T - kappa_k m_k m_k^T])^{-1}),
    /// with the means integrated out, then each mean from N(m_k, (kappa_k L)^{-1}).
    fn resample_parameters<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let (m, kappa) = (self.prior.mu().clone(), self.prior.kappa());
        let prior_outer = (&m * m.transpose()).scale(kappa);
        let mut psi_inv = self.prior.wishart().psi_inv().clone();
        let mut nu = self.prior.nu();
        for (k, s) in self.statistics().into_iter().enumerate() {
            let scale = kappa + s.n;
            let location = (m.scale(kappa) + &s.sum) / scale;
            psi_inv += s.outer + &prior_outer - (&location * location.transpose()).scale(scale);
            nu += s.n;
            self.locations[k] = location;
            self.scales[k] = scale;
        }
        let psi = invert_pd(&symmetrize(&psi_inv), "tied scale")?;
        self.precision_posterior = Wishart::new(psi, nu)?;
        let lmbda = self.precision_posterior.sample(rng)?;
        self.set_precision(lmbda)?;
        let d = self.dim();
        for k in 0..self.size() {
            let cov = invert_pd(&self.lmbda.scale(self.scales[k]), "precision")?;
            let lower = cholesky_lower(&cov, "covariance")?;
            self.mus[k] = &self.locations[k] + lower * standard_normal(d, 1, rng).column(0);
        }
        Ok(())
    }

    /// One Gibbs sweep: shared precision and means given the labels, gating weights given
    /// the label counts, then every label.
    pub fn resample<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        self.resample_parameters(rng)?;
        let mut counts = DVector::zeros(self.size());
        for (b, labels) in self.batches.iter().zip(self.labels.iter()) {
            for (i, l) in labels.iter().enumerate() {
                if b.valid[i] {
                    counts[*l] += 1.;
                }
            }
        }
        self.gating.resample(&counts, rng)?;
        let mut labels = Vec::with_capacity(self.batches.len());
        for batch in self.batches.iter() {
            labels.push(self.sample_labels(batch, rng)?);
        }
        self.labels = labels;
        Ok(())
    }

    pub fn resample_model<R>(&mut self, maxiter : usize, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        for it in 0..maxiter {
            self.resample(rng)?;
            log::debug!("Tied Gibbs sweep {}: {} used components", it, self.used_labels().len());
        }
        Ok(())
    }

    /// Draws n rows from the current samples, with the component of each row.
    pub fn rvs<R>(&self, n : usize, rng : &mut R) -> Result<(DMatrix<f64>, Vec<usize>), BayesError>
    where
        R : Rng + ?Sized
    {
        let labels = self.gating.rvs(n, rng)?;
        let lower = cholesky_lower(&self.covariance()?, "covariance")?;
        let mut obs = DMatrix::zeros(n, self.dim());
        for (i, l) in labels.iter().enumerate() {
            let y = &self.mus[*l] + &lower * standard_normal(self.dim(), 1, rng).column(0);
            obs.row_mut(i).copy_from(&y.transpose());
        }
        Ok((obs, labels))
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tied(k : usize) -> MixtureOfTiedGaussians {
        let prior = NormalWishart::new(DVector::zeros(2), 0.01, DMatrix::identity(2, 2), 3.).unwrap();
        MixtureOfTiedGaussians::with_prior(Gating::new(GatingKind::Dirichlet, k, 1.).unwrap(), prior).unwrap()
    }

    #[test]
    fn shared_precision_is_recovered() {
        let mut rng = StdRng::seed_from_u64(61);
        let centers = [(-6., 0.), (0., 6.), (6., 0.)];
        let mut y = standard_normal(300, 2, &mut rng);
        let mut labels = Vec::new();
        for i in 0..300 {
            let c = i % 3;
            y[(i, 0)] = 0.5 * y[(i, 0)] + centers[c].0;
            y[(i, 1)] += centers[c].1;
            labels.push(c);
        }
        let mut mix = tied(4);
        mix.add_data(y, false, LabelInit::Given(labels), &mut rng).unwrap();
        mix.resample_model(20, &mut rng).unwrap();

        let cov = mix.covariance().unwrap();
        assert!((cov[(0, 0)] - 0.25).abs() < 0.1);
        assert!((cov[(1, 1)] - 1.).abs() < 0.3);
        assert!(cov[(0, 1)].abs() < 0.2);
        for (cx, cy) in centers.iter() {
            let center = DVector::from_vec(vec![*cx, *cy]);
            assert!(mix.mus().iter().any(|mu| (mu - &center).norm() < 0.5 ));
        }
        assert!(mix.precision_posterior().nu() > 300.);
    }

    #[test]
    fn missing_rows_are_labelled_but_ignored() {
        let mut rng = StdRng::seed_from_u64(62);
        let mut mix = tied(2);
        let y = DMatrix::from_row_slice(3, 2, &[0., 0., f64::NAN, 1., 1., 1.]);
        mix.add_data(y.clone(), false, LabelInit::Prior, &mut rng).unwrap();
        mix.resample_model(3, &mut rng).unwrap();
        assert_eq!(mix.labels()[0].len(), 3);
        assert!(mix.precision_posterior().nu() == 5.);

        let (scores, observed) = mix.log_scores(&mix.batches()[0]);
        assert_eq!(observed, vec![true, false, true]);
        assert_eq!(scores.row(1).transpose(), mix.gating().log_likelihood());

        let full = mix.log_likelihood(y.clone()).unwrap();
        let observed_only = mix.log_likelihood(DMatrix::from_row_slice(2, 2, &[0., 0., 1., 1.])).unwrap();
        assert!((full - observed_only).abs() < 1E-10);
        assert_eq!(mix.max_aposteriori(y).unwrap().len(), 3);
    }

    #[test]
    fn whitening_is_refused_over_raw_rows() {
        let mut rng = StdRng::seed_from_u64(63);
        let mut mix = tied(2);
        let y = standard_normal(20, 2, &mut rng).scale(5.).add_scalar(50.);
        mix.add_data(y.clone(), false, LabelInit::Prior, &mut rng).unwrap();
        match mix.add_data(y.clone(), true, LabelInit::Prior, &mut rng) {
            Err(BayesError::UnwhitenedData) => { },
            other => panic!("Unexpected outcome {:?}", other)
        }
        assert!(mix.clear_transform().is_err());
        mix.clear_data();
        mix.add_data(y, true, LabelInit::Prior, &mut rng).unwrap();
        assert!(mix.batches()[0].target().mean().abs() < 1E-8);
        assert_eq!(mix.used_labels().len(), mix.label_usages().iter().filter(|n| **n > 0 ).count());
    }

    #[test]
    fn draws_follow_current_samples() {
        let mut rng = StdRng::seed_from_u64(64);
        let mix = tied(3);
        let (y, labels) = mix.rvs(4000, &mut rng).unwrap();
        assert_eq!(labels.len(), 4000);
        assert!(y.row_mean().norm() < 0.1);
        let centered = &y - DMatrix::from_fn(4000, 2, |_, j| y.column(j).mean() );
        let cov = (centered.transpose() * &centered) / 4000.;
        assert!((cov - DMatrix::identity(2, 2)).abs().max() < 0.15);
    }

}
