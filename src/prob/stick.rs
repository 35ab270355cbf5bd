use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use rand_distr::{Distribution, Beta};

/// Truncated stick-breaking distribution over K weights: v_k ~ Beta(gamma_k, delta_k) for k < K - 1,
/// v_{K-1} = 1, and pi_k = v_k prod_{j<k} (1 - v_j). This is the finite approximation to the
/// Dirichlet-process weights with concentration delta.
///
/// The natural parameter is [gamma | delta], paired with the statistic [ln v | ln(1 - v)]. The
/// last stick is deterministic, so its statistic is zero and its parameters never enter the
/// divergence or the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StickBreaking {

    gammas : DVector<f64>,

    deltas : DVector<f64>

}

impl StickBreaking {

    pub fn new(gammas : DVector<f64>, deltas : DVector<f64>) -> Result<Self, BayesError> {
        BayesError::check_dim(gammas.nrows(), deltas.nrows())?;
        if gammas.nrows() == 0 {
            return Err(BayesError::InvalidComponentCount);
        }
        if gammas.iter().chain(deltas.iter()).any(|v| !(*v > 0.) || !v.is_finite() ) {
            return Err(BayesError::InvalidHyperparameter(
                format!("Stick-breaking parameters {} and {}", gammas, deltas)
            ));
        }
        Ok(Self { gammas, deltas })
    }

    /// Dirichlet-process truncation with unit gammas and deltas equal to the concentration alpha.
    pub fn truncated(size : usize, alpha : f64) -> Result<Self, BayesError> {
        Self::new(DVector::from_element(size, 1.), DVector::from_element(size, alpha))
    }

    pub fn size(&self) -> usize {
        self.gammas.nrows()
    }

    pub fn gammas(&self) -> &DVector<f64> {
        &self.gammas
    }

    pub fn deltas(&self) -> &DVector<f64> {
        &self.deltas
    }

    fn sticks(&self) -> usize {
        self.size() - 1
    }

    /// (E[ln v_k], E[ln(1 - v_k)]), zero for the last (deterministic) stick.
    fn expected_log_sticks(&self) -> (DVector<f64>, DVector<f64>) {
        let k = self.size();
        let mut log_v = DVector::zeros(k);
        let mut log_1mv = DVector::zeros(k);
        for i in 0..self.sticks() {
            let total = (self.gammas[i] + self.deltas[i]).digamma();
            log_v[i] = self.gammas[i].digamma() - total;
            log_1mv[i] = self.deltas[i].digamma() - total;
        }
        (log_v, log_1mv)
    }

    /// E[ln pi_k] = E[ln v_k] + sum_{j<k} E[ln(1 - v_j)]
    pub fn expected_log(&self) -> DVector<f64> {
        let (log_v, log_1mv) = self.expected_log_sticks();
        let mut acc = 0.0;
        DVector::from_iterator(self.size(), (0..self.size()).map(|k| {
            let e = log_v[k] + acc;
            acc += log_1mv[k];
            e
        }))
    }

    /// E[pi_k] = E[v_k] prod_{j<k} E[1 - v_j], using the independence of the sticks.
    pub fn mean(&self) -> DVector<f64> {
        let v = DVector::from_iterator(self.size(), (0..self.size()).map(|k| {
            if k < self.sticks() {
                self.gammas[k] / (self.gammas[k] + self.deltas[k])
            } else {
                1.
            }
        }));
        weights_from_sticks(&v)
    }

    pub fn rvs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        let mut v = DVector::from_element(self.size(), 1.);
        for k in 0..self.sticks() {
            let distr = Beta::new(self.gammas[k], self.deltas[k])
                .map_err(|e| BayesError::InvalidHyperparameter(format!("{:?}", e)) )?;
            v[k] = distr.sample(rng);
        }
        Ok(weights_from_sticks(&v))
    }

}

fn weights_from_sticks(v : &DVector<f64>) -> DVector<f64> {
    let mut rest = 1.0;
    DVector::from_iterator(v.nrows(), v.iter().map(|vk| {
        let w = vk * rest;
        rest *= 1. - vk;
        w
    }))
}

impl ConjugatePrior for StickBreaking {

    fn link(&self) -> DVector<f64> {
        let k = self.size();
        let mut eta = DVector::zeros(2 * k);
        eta.rows_mut(0, k).copy_from(&self.gammas);
        eta.rows_mut(k, k).copy_from(&self.deltas);
        eta
    }

    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError> {
        let k = self.size();
        BayesError::check_dim(2 * k, eta.nrows())?;
        StickBreaking::new(eta.rows(0, k).clone_owned(), eta.rows(k, k).clone_owned())
    }

    /// Sum of ln B(gamma_k, delta_k) over the random sticks.
    fn log_partition(&self) -> f64 {
        (0..self.sticks()).map(|k| {
            let (g, d) = (self.gammas[k], self.deltas[k]);
            g.ln_gamma().0 + d.ln_gamma().0 - (g + d).ln_gamma().0
        }).sum()
    }

    fn expected_statistics(&self) -> DVector<f64> {
        let k = self.size();
        let (log_v, log_1mv) = self.expected_log_sticks();
        let mut stats = DVector::zeros(2 * k);
        stats.rows_mut(0, k).copy_from(&log_v);
        stats.rows_mut(k, k).copy_from(&log_1mv);
        stats
    }

}

/// Categorical gating with truncated stick-breaking weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalWithStickBreaking {

    prior : StickBreaking,

    posterior : StickBreaking,

    probs : DVector<f64>

}

impl CategoricalWithStickBreaking {

    pub fn new(prior : StickBreaking) -> Self {
        let probs = prior.mean();
        Self { posterior : prior.clone(), prior, probs }
    }

}

impl GatingDistribution for CategoricalWithStickBreaking {

    type Prior = StickBreaking;

    fn prior(&self) -> &StickBreaking {
        &self.prior
    }

    fn posterior(&self) -> &StickBreaking {
        &self.posterior
    }

    fn set_posterior(&mut self, posterior : StickBreaking) {
        self.posterior = posterior;
    }

    fn promote(&mut self) {
        self.prior = self.posterior.clone();
    }

    fn size(&self) -> usize {
        self.prior.size()
    }

    fn probs(&self) -> &DVector<f64> {
        &self.probs
    }

    fn sample_probs<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        self.probs = self.posterior.rvs(rng)?;
        Ok(())
    }

    fn sample_prior_probs<R>(&self, rng : &mut R) -> Result<DVector<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        self.prior.rvs(rng)
    }

    /// [n_k | sum_{j>k} n_j]
    fn statistics(&self, counts : &DVector<f64>) -> DVector<f64> {
        let k = counts.nrows();
        let mut stats = DVector::zeros(2 * k);
        let mut tail = 0.0;
        for i in (0..k).rev() {
            stats[i] = counts[i];
            stats[k + i] = tail;
            tail += counts[i];
        }
        stats
    }

    fn expected_log_probs(&self) -> DVector<f64> {
        self.posterior.expected_log()
    }

    fn mean(&self) -> DVector<f64> {
        self.posterior.mean()
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const EPS : f64 = 1E-10;

    #[test]
    fn stick_weights_sum_to_one() {
        let sb = StickBreaking::truncated(5, 2.).unwrap();
        assert!((sb.mean().sum() - 1.).abs() < EPS);
        let mut rng = StdRng::seed_from_u64(5);
        let w = sb.rvs(&mut rng).unwrap();
        assert!((w.sum() - 1.).abs() < EPS);
        assert!(w.iter().all(|v| *v >= 0. ));
    }

    #[test]
    fn tail_counts() {
        let gating = CategoricalWithStickBreaking::new(StickBreaking::truncated(3, 1.).unwrap());
        let stats = gating.statistics(&DVector::from_vec(vec![2., 5., 1.]));
        assert_eq!(stats, DVector::from_vec(vec![2., 5., 1., 6., 1., 0.]));
    }

    #[test]
    fn last_stick_does_not_enter_divergence() {
        let p = StickBreaking::truncated(3, 1.).unwrap();
        let mut q = p.clone();
        q.gammas[2] = 10.;
        q.deltas[2] = 7.;
        assert!(q.kl_divergence(&p).abs() < EPS);
    }

}
