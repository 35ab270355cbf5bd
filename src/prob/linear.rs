use nalgebra::*;
use super::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::{PI, LN_2};

/// Matrix-Normal-Wishart distribution over a coefficient matrix A (dy x p) and a noise precision
/// L (dy x dy): L ~ W(psi, nu), A | L ~ MN(M, L^{-1}, K^{-1}), where K is the column precision.
///
/// The natural parameter is laid out as
/// [vec(psi^{-1} + M K M^T) (dy*dy) | vec(M K) (dy*p) | vec(K) (p*p) | nu - dy - 1 + p (1)],
/// paired with the statistic [-L / 2 | L A | -A^T L A / 2 | ln|L| / 2]. The per-observation
/// statistic of the linear-Gaussian likelihood is then [y y^T | y x^T | x x^T | 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixNormalWishart {

    m : DMatrix<f64>,

    k : DMatrix<f64>,

    k_inv : DMatrix<f64>,

    log_det_k : f64,

    wishart : Wishart

}

impl MatrixNormalWishart {

    pub fn new(m : DMatrix<f64>, k : DMatrix<f64>, psi : DMatrix<f64>, nu : f64) -> Result<Self, BayesError> {
        BayesError::check_dim(m.nrows(), psi.nrows())?;
        BayesError::check_dim(m.ncols(), k.nrows())?;
        BayesError::check_dim(k.nrows(), k.ncols())?;
        let k = symmetrize(&k);
        let k_inv = invert_pd(&k, "column precision")?;
        let log_det_k = log_det_pd(&k, "column precision")?;
        let wishart = Wishart::new(psi, nu)?;
        Ok(Self { m, k, k_inv, log_det_k, wishart })
    }

    /// Output dimension dy.
    pub fn dim(&self) -> usize {
        self.m.nrows()
    }

    /// Number of coefficients per output (input dimension, plus one if affine).
    pub fn nb_params(&self) -> usize {
        self.m.ncols()
    }

    pub fn m(&self) -> &DMatrix<f64> {
        &self.m
    }

    pub fn k(&self) -> &DMatrix<f64> {
        &self.k
    }

    pub fn k_inv(&self) -> &DMatrix<f64> {
        &self.k_inv
    }

    pub fn psi(&self) -> &DMatrix<f64> {
        self.wishart.psi()
    }

    pub fn nu(&self) -> f64 {
        self.wishart.nu()
    }

    pub fn wishart(&self) -> &Wishart {
        &self.wishart
    }

    /// Same location and Wishart factor, with the column precision replaced.
    pub fn with_column_precision(&self, k : DMatrix<f64>) -> Result<Self, BayesError> {
        MatrixNormalWishart::new(self.m.clone(), k, self.psi().clone(), self.nu())
    }

    pub fn rvs<R>(&self, rng : &mut R) -> Result<(DMatrix<f64>, DMatrix<f64>), BayesError>
    where
        R : Rng + ?Sized
    {
        let lmbda = self.wishart.sample(rng)?;
        let row_lower = cholesky_lower(&invert_pd(&lmbda, "precision")?, "covariance")?;
        let col_lower = cholesky_lower(&self.k_inv, "column covariance")?;
        let z = standard_normal(self.dim(), self.nb_params(), rng);
        let a = &self.m + row_lower * z * col_lower.transpose();
        Ok((a, lmbda))
    }

    /// Posterior predictive St(M x, (1 + x^T K^{-1} x) psi^{-1} / df, df), with df = nu - dy + 1,
    /// for an already-augmented input x.
    pub fn posterior_predictive(&self, x : &DVector<f64>) -> Result<MultiStudentT, BayesError> {
        let df = self.nu() - self.dim() as f64 + 1.;
        let c = 1. + x.dot(&(&self.k_inv * x));
        let sigma = self.wishart.psi_inv().scale(c / df);
        MultiStudentT::new(&self.m * x, sigma, df)
    }

    /// Expected log-density of y given the augmented input x:
    /// -dy/2 ln 2pi + E[ln|L|] / 2 - (nu (y - M x)^T psi (y - M x) + dy x^T K^{-1} x) / 2.
    pub fn expected_log_density(&self, y : &DVector<f64>, x : &DVector<f64>) -> f64 {
        let dy = self.dim() as f64;
        let err = y - &self.m * x;
        let maha = err.dot(&(self.psi() * &err));
        -dy / 2. * (2. * PI).ln() + 0.5 * self.wishart.expected_log_det() -
            0.5 * (self.nu() * maha + dy * x.dot(&(&self.k_inv * x)))
    }

    fn layout(&self) -> (usize, usize, usize) {
        let (dy, p) = (self.dim(), self.nb_params());
        (dy * dy, dy * p, p * p)
    }

}

impl ConjugatePrior for MatrixNormalWishart {

    fn link(&self) -> DVector<f64> {
        let (n1, n2, n3) = self.layout();
        let (dy, p) = (self.dim() as f64, self.nb_params() as f64);
        let mk = &self.m * &self.k;
        let mut eta = DVector::zeros(n1 + n2 + n3 + 1);
        let outer = self.wishart.psi_inv() + &mk * self.m.transpose();
        let mut offset = write_block(&mut eta, 0, &outer);
        offset = write_block(&mut eta, offset, &mk);
        offset = write_block(&mut eta, offset, &self.k);
        eta[offset] = self.nu() - dy - 1. + p;
        eta
    }

    fn link_inverse(&self, eta : &DVector<f64>) -> Result<Self, BayesError> {
        let (n1, n2, n3) = self.layout();
        let (dy, p) = (self.dim(), self.nb_params());
        BayesError::check_dim(n1 + n2 + n3 + 1, eta.nrows())?;
        let k = symmetrize(&read_block(eta, n1 + n2, p, p));
        let k_inv = invert_pd(&k, "column precision")?;
        let m = read_block(eta, n1, dy, p) * &k_inv;
        let psi_inv = read_block(eta, 0, dy, dy) - &m * &k * m.transpose();
        let psi = invert_pd(&psi_inv, "Matrix-Normal-Wishart scale")?;
        let nu = eta[n1 + n2 + n3] + dy as f64 + 1. - p as f64;
        MatrixNormalWishart::new(m, k, psi, nu)
    }

    fn log_partition(&self) -> f64 {
        let (dy, p) = (self.dim() as f64, self.nb_params() as f64);
        let nu = self.nu();
        dy * p / 2. * (2. * PI).ln() - dy / 2. * self.log_det_k + nu * dy / 2. * LN_2 +
            nu / 2. * self.wishart.log_det_psi() + ln_multi_gamma(nu / 2., self.dim())
    }

    fn expected_statistics(&self) -> DVector<f64> {
        let (n1, n2, n3) = self.layout();
        let nu = self.nu();
        let dy = self.dim() as f64;
        let psi_m = self.psi() * &self.m;
        let quad = self.k_inv.scale(dy) + (self.m.transpose() * &psi_m).scale(nu);
        let mut stats = DVector::zeros(n1 + n2 + n3 + 1);
        let mut offset = write_block(&mut stats, 0, &self.psi().scale(-nu / 2.));
        offset = write_block(&mut stats, offset, &psi_m.scale(nu));
        offset = write_block(&mut stats, offset, &quad.scale(-0.5));
        stats[offset] = 0.5 * self.wishart.expected_log_det();
        stats
    }

}

/// Automatic relevance determination over the columns of the coefficient matrix: each column j
/// receives its own precision alpha_j ~ Gamma(a, b), and the prior column precision K becomes
/// diag(alpha). Columns irrelevant to the output are driven towards zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomaticRelevance {

    prior : Gamma,

    posterior : Gamma,

    // Current Gibbs draw of the precisions.
    precisions : DVector<f64>,

    iters : usize

}

impl AutomaticRelevance {

    pub fn new(prior : Gamma, iters : usize) -> Self {
        let precisions = prior.mean();
        Self { posterior : prior.clone(), prior, precisions, iters : iters.max(1) }
    }

    pub fn prior(&self) -> &Gamma {
        &self.prior
    }

    pub fn posterior(&self) -> &Gamma {
        &self.posterior
    }

    pub fn precisions(&self) -> &DVector<f64> {
        &self.precisions
    }

    fn shapes(&self, dy : usize) -> DVector<f64> {
        self.prior.alphas().add_scalar(dy as f64 / 2.)
    }

    fn rates(&self, quad : &DVector<f64>) -> DVector<f64> {
        self.prior.betas() + quad.scale(0.5)
    }

}

/// Linear-Gaussian likelihood y | x ~ N(A x, L^{-1}) under a Matrix-Normal-Wishart prior,
/// where x is augmented with a trailing unit entry when the model is affine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearGaussianWithMatrixNormalWishart {

    prior : MatrixNormalWishart,

    posterior : MatrixNormalWishart,

    affine : bool,

    a : DMatrix<f64>,

    lmbda : DMatrix<f64>,

    log_det_lmbda : f64,

    ard : Option<AutomaticRelevance>

}

impl LinearGaussianWithMatrixNormalWishart {

    /// The number of prior columns must equal the input dimension, plus one if affine.
    pub fn new(prior : MatrixNormalWishart, affine : bool) -> Result<Self, BayesError> {
        if affine && prior.nb_params() == 0 {
            return Err(BayesError::DimensionMismatch { expected : 1, found : 0 });
        }
        let a = prior.m().clone();
        let lmbda = prior.wishart().mean();
        let log_det_lmbda = log_det_pd(&lmbda, "precision")?;
        Ok(Self { posterior : prior.clone(), prior, affine, a, lmbda, log_det_lmbda, ard : None })
    }

    /// Replaces the prior column precision by a per-column precision under the given Gamma hyperprior.
    /// The hyperprior and the prior column precision are re-estimated at each update, for
    /// iters inner rounds during mean-field updates.
    pub fn with_automatic_relevance(mut self, hyperprior : Gamma, iters : usize) -> Result<Self, BayesError> {
        BayesError::check_dim(self.prior.nb_params(), hyperprior.dim())?;
        let ard = AutomaticRelevance::new(hyperprior, iters);
        self.prior = self.prior.with_column_precision(DMatrix::from_diagonal(ard.precisions()))?;
        self.posterior = self.prior.clone();
        self.ard = Some(ard);
        Ok(self)
    }

    pub fn automatic_relevance(&self) -> Option<&AutomaticRelevance> {
        self.ard.as_ref()
    }

    pub fn affine(&self) -> bool {
        self.affine
    }

    /// Output dimension.
    pub fn dim(&self) -> usize {
        self.prior.dim()
    }

    /// Input dimension, excluding the intercept.
    pub fn input_dim(&self) -> usize {
        self.prior.nb_params() - if self.affine { 1 } else { 0 }
    }

    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn precision(&self) -> &DMatrix<f64> {
        &self.lmbda
    }

    pub fn set_parameters(&mut self, a : DMatrix<f64>, lmbda : DMatrix<f64>) -> Result<(), BayesError> {
        BayesError::check_dim(self.dim(), a.nrows())?;
        BayesError::check_dim(self.prior.nb_params(), a.ncols())?;
        self.log_det_lmbda = log_det_pd(&lmbda, "precision")?;
        self.a = a;
        self.lmbda = lmbda;
        Ok(())
    }

    /// Input row i, augmented with the intercept entry when affine. Absent inputs are taken as zero.
    pub fn augment(&self, x : Option<&DMatrixSlice<'_, f64>>, i : usize) -> DVector<f64> {
        let dx = self.input_dim();
        match x {
            Some(x) => self.augment_vector(&x.row(i).columns(0, dx).transpose()),
            None => self.augment_vector(&DVector::zeros(dx))
        }
    }

    fn augment_vector(&self, x : &DVector<f64>) -> DVector<f64> {
        let dx = self.input_dim();
        let mut xt = DVector::zeros(self.prior.nb_params());
        xt.rows_mut(0, dx).copy_from(&x.rows(0, dx));
        if self.affine {
            xt[dx] = 1.;
        }
        xt
    }

    /// Posterior predictive Student-t at a single (non-augmented) input row.
    pub fn posterior_predictive(&self, x : &DVector<f64>) -> Result<MultiStudentT, BayesError> {
        BayesError::check_dim(self.input_dim(), x.nrows())?;
        self.posterior.posterior_predictive(&self.augment_vector(x))
    }

    fn pairs<'a>(
        &'a self,
        y : DMatrixSlice<'a, f64>,
        x : Option<DMatrixSlice<'a, f64>>
    ) -> impl Iterator<Item=Option<(DVector<f64>, DVector<f64>)>> + 'a {
        (0..y.nrows()).map(move |i| {
            let yi = y.row(i).transpose();
            let xi = self.augment(x.as_ref(), i);
            if yi.iter().chain(xi.iter()).all(|v| v.is_finite() ) {
                Some((yi, xi))
            } else {
                None
            }
        })
    }

    fn ard_meanfield_update(&mut self, stats : &DVector<f64>) {
        let mut ard = match self.ard.clone() {
            Some(ard) => ard,
            None => return
        };
        let m0 = self.prior.m().clone();
        let mut updated = false;
        for _ in 0..ard.iters {
            let k0 = DMatrix::from_diagonal(&ard.posterior.mean());
            let prior = match self.prior.with_column_precision(k0) {
                Ok(prior) => prior,
                Err(e) => {
                    log::warn!("Automatic relevance update rejected ({})", e);
                    break;
                }
            };
            let post = match prior.link_inverse(&(prior.link() + stats)) {
                Ok(post) => post,
                Err(e) => {
                    log::warn!("Automatic relevance update rejected ({}); keeping previous precisions", e);
                    break;
                }
            };
            let diff = post.m() - &m0;
            let psi_diff = post.psi() * &diff;
            let dy = self.dim() as f64;
            let quad = DVector::from_iterator(diff.ncols(), (0..diff.ncols()).map(|j| {
                dy * post.k_inv()[(j, j)] + post.nu() * diff.column(j).dot(&psi_diff.column(j))
            }));
            match Gamma::new(ard.shapes(self.dim()), ard.rates(&quad)) {
                Ok(hyper) => {
                    ard.posterior = hyper;
                    self.prior = prior;
                    self.posterior = post;
                    updated = true;
                },
                Err(e) => {
                    log::warn!("Automatic relevance update rejected ({}); keeping previous precisions", e);
                    break;
                }
            }
        }
        if updated {
            ard.precisions = ard.posterior.mean();
        } else {
            self.sync_ard_prior_with(&ard);
            self.posterior = posterior_or_prior(&self.prior, &(self.prior.link() + stats));
        }
        self.ard = Some(ard);
    }

    fn ard_resample<R>(&mut self, rng : &mut R)
    where
        R : Rng + ?Sized
    {
        let mut ard = match self.ard.clone() {
            Some(ard) => ard,
            None => return
        };
        let diff = &self.a - self.prior.m();
        let lmbda_diff = &self.lmbda * &diff;
        let quad = DVector::from_iterator(diff.ncols(), (0..diff.ncols()).map(|j| {
            diff.column(j).dot(&lmbda_diff.column(j))
        }));
        let draw = Gamma::new(ard.shapes(self.dim()), ard.rates(&quad))
            .and_then(|hyper| { let d = hyper.rvs(rng)?; Ok((hyper, d)) });
        match draw {
            Ok((hyper, precisions)) if precisions.iter().all(|p| p.is_finite() && *p > 0.) => {
                ard.posterior = hyper;
                ard.precisions = precisions;
            },
            _ => log::warn!("Automatic relevance draw rejected; keeping previous precisions")
        }
        self.ard = Some(ard);
    }

    fn sync_ard_prior(&mut self) {
        if let Some(ard) = self.ard.clone() {
            self.sync_ard_prior_with(&ard);
        }
    }

    fn sync_ard_prior_with(&mut self, ard : &AutomaticRelevance) {
        match self.prior.with_column_precision(DMatrix::from_diagonal(ard.precisions())) {
            Ok(prior) => self.prior = prior,
            Err(e) => log::warn!("Automatic relevance precisions rejected ({})", e)
        }
    }

}

impl Conjugate for LinearGaussianWithMatrixNormalWishart {

    type Prior = MatrixNormalWishart;

    fn prior(&self) -> &MatrixNormalWishart {
        &self.prior
    }

    fn posterior(&self) -> &MatrixNormalWishart {
        &self.posterior
    }

    fn set_posterior(&mut self, posterior : MatrixNormalWishart) {
        self.posterior = posterior;
    }

    fn promote(&mut self) {
        self.prior = self.posterior.clone();
        if let Some(ard) = self.ard.as_mut() {
            ard.prior = ard.posterior.clone();
        }
    }

    fn statistics(
        &self,
        y : DMatrixSlice<'_, f64>,
        x : Option<DMatrixSlice<'_, f64>>,
        weights : Option<&DVector<f64>>
    ) -> DVector<f64> {
        let (dy, p) = (self.dim(), self.prior.nb_params());
        let mut yy = DMatrix::zeros(dy, dy);
        let mut yx = DMatrix::zeros(dy, p);
        let mut xx = DMatrix::zeros(p, p);
        let mut n = 0.0;
        for (i, pair) in self.pairs(y, x).enumerate() {
            let w = row_weight(weights, i);
            if w == 0. {
                continue;
            }
            if let Some((yi, xi)) = pair {
                yy += (&yi * yi.transpose()).scale(w);
                yx += (&yi * xi.transpose()).scale(w);
                xx += (&xi * xi.transpose()).scale(w);
                n += w;
            }
        }
        let mut stats = DVector::zeros(dy * dy + dy * p + p * p + 1);
        let mut offset = write_block(&mut stats, 0, &yy);
        offset = write_block(&mut stats, offset, &yx);
        offset = write_block(&mut stats, offset, &xx);
        stats[offset] = n;
        stats
    }

    fn log_likelihood(&self, y : DMatrixSlice<'_, f64>, x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64> {
        let dy = self.dim() as f64;
        let norm = -dy / 2. * (2. * PI).ln() + 0.5 * self.log_det_lmbda;
        DVector::from_iterator(y.nrows(), self.pairs(y, x).map(|pair| {
            match pair {
                Some((yi, xi)) => {
                    let err = yi - &self.a * xi;
                    norm - 0.5 * err.dot(&(&self.lmbda * &err))
                },
                None => f64::NEG_INFINITY
            }
        }))
    }

    fn expected_log_likelihood(&self, y : DMatrixSlice<'_, f64>, x : Option<DMatrixSlice<'_, f64>>) -> DVector<f64> {
        DVector::from_iterator(y.nrows(), self.pairs(y, x).map(|pair| {
            match pair {
                Some((yi, xi)) => self.posterior.expected_log_density(&yi, &xi),
                None => f64::NEG_INFINITY
            }
        }))
    }

    fn sample_parameters<R>(&mut self, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        let (a, lmbda) = self.posterior.rvs(rng)?;
        self.set_parameters(a, lmbda)
    }

    fn rvs<R>(&self, n : usize, x : Option<DMatrixSlice<'_, f64>>, rng : &mut R) -> Result<DMatrix<f64>, BayesError>
    where
        R : Rng + ?Sized
    {
        if let Some(x) = &x {
            BayesError::check_dim(n, x.nrows())?;
            BayesError::check_dim(self.input_dim(), x.ncols())?;
        }
        let lower = cholesky_lower(&invert_pd(&self.lmbda, "precision")?, "covariance")?;
        let noise = standard_normal(self.dim(), n, rng);
        let mut y = DMatrix::zeros(n, self.dim());
        for i in 0..n {
            let xi = self.augment(x.as_ref(), i);
            let yi = &self.a * xi + &lower * noise.column(i);
            y.row_mut(i).copy_from(&yi.transpose());
        }
        Ok(y)
    }

    fn resample_statistics<R>(&mut self, stats : &DVector<f64>, rng : &mut R) -> Result<(), BayesError>
    where
        R : Rng + ?Sized
    {
        self.sync_ard_prior();
        let eta = self.prior.link() + stats;
        self.posterior = posterior_or_prior(&self.prior, &eta);
        self.sample_parameters(rng)?;
        self.ard_resample(rng);
        Ok(())
    }

    fn meanfield_statistics(&mut self, stats : &DVector<f64>) -> Result<(), BayesError> {
        if self.ard.is_some() {
            self.ard_meanfield_update(stats);
        } else {
            let eta = self.prior.link() + stats;
            self.posterior = posterior_or_prior(&self.prior, &eta);
        }
        Ok(())
    }

    fn meanfield_sgdstep_statistics(&mut self, stats : &DVector<f64>, prob : f64, stepsize : f64) -> Result<(), BayesError> {
        self.sync_ard_prior();
        let eta = natural_gradient_step(&self.posterior.link(), &self.prior.link(), stats, prob, stepsize);
        match self.posterior.link_inverse(&eta) {
            Ok(post) => self.posterior = post,
            Err(e) => log::warn!("Rejected stochastic step leaving the parameter domain ({})", e)
        }
        Ok(())
    }

    fn variational_lowerbound(&self) -> f64 {
        let hyper = self.ard.as_ref()
            .map(|ard| -ard.posterior.kl_divergence(&ard.prior) )
            .unwrap_or(0.);
        hyper - self.posterior.kl_divergence(&self.prior)
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const EPS : f64 = 1E-8;

    fn prior(dy : usize, p : usize) -> MatrixNormalWishart {
        MatrixNormalWishart::new(
            DMatrix::zeros(dy, p),
            DMatrix::identity(p, p).scale(0.1),
            DMatrix::identity(dy, dy),
            dy as f64 + 2.
        ).unwrap()
    }

    #[test]
    fn natural_parameters_round_trip() {
        let mut mnw = prior(2, 3);
        mnw.m = DMatrix::from_row_slice(2, 3, &[1., 2., 3., -1., 0., 0.5]);
        let back = mnw.link_inverse(&mnw.link()).unwrap();
        assert!((back.m() - mnw.m()).norm() < EPS);
        assert!((back.k() - mnw.k()).norm() < EPS);
        assert!((back.psi() - mnw.psi()).norm() < EPS);
        assert!((back.nu() - mnw.nu()).abs() < EPS);
        assert!(mnw.kl_divergence(&mnw).abs() < EPS);
    }

    #[test]
    fn noiseless_line_recovers_slope() {
        let model = LinearGaussianWithMatrixNormalWishart::new(prior(1, 2), true).unwrap();
        let x = DMatrix::from_fn(50, 1, |i, _| i as f64 / 10. - 2.5 );
        let y = x.map(|v| 2. * v + 1. );
        let mut model = model;
        model.meanfield_update(y.slice((0, 0), (50, 1)), Some(x.slice((0, 0), (50, 1))), &DVector::from_element(50, 1.)).unwrap();
        let m = model.posterior().m();
        assert!((m[(0, 0)] - 2.).abs() < 0.05);
        assert!((m[(0, 1)] - 1.).abs() < 0.05);
        let pred = model.posterior_predictive(&DVector::from_element(1, 1.)).unwrap();
        assert!((pred.mean()[0] - 3.).abs() < 0.1);
    }

    #[test]
    fn automatic_relevance_shrinks_unused_input() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = LinearGaussianWithMatrixNormalWishart::new(prior(1, 2), false)
            .unwrap()
            .with_automatic_relevance(Gamma::isotropic(2, 1., 1.).unwrap(), 10)
            .unwrap();
        let x = standard_normal(200, 2, &mut rng);
        let y = DMatrix::from_fn(200, 1, |i, _| 3. * x[(i, 0)] );
        let mut model = model;
        model.meanfield_update(y.slice((0, 0), (200, 1)), Some(x.slice((0, 0), (200, 2))), &DVector::from_element(200, 1.)).unwrap();
        let alphas = model.automatic_relevance().unwrap().posterior().mean();
        assert!(alphas[1] > alphas[0]);
        assert!(model.posterior().m()[(0, 1)].abs() < 0.1);
    }

    #[test]
    fn degenerate_relevance_updates_keep_precisions() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut model = LinearGaussianWithMatrixNormalWishart::new(prior(1, 1), false)
            .unwrap()
            .with_automatic_relevance(Gamma::isotropic(1, 1., 1.).unwrap(), 5)
            .unwrap();

        // With column precision 2.5 these statistics give M = 1e5, psi = 1 and nu ~ 1e300,
        // so the relevance rate overflows.
        let degenerate = DVector::from_vec(vec![2.5E10, 2.5E5, 0., 1E300]);

        if let Some(ard) = model.ard.as_mut() {
            ard.posterior = Gamma::isotropic(1, 5., 2.).unwrap();
            ard.precisions = DVector::from_element(1, 7.);
        }
        model.meanfield_statistics(&degenerate).unwrap();
        assert_eq!(model.automatic_relevance().unwrap().precisions(), &DVector::from_element(1, 7.));
        assert!((model.prior().k()[(0, 0)] - 7.).abs() < EPS);

        if let Some(ard) = model.ard.as_mut() {
            ard.precisions = DVector::from_element(1, 2.5);
        }
        model.resample_statistics(&degenerate, &mut rng).unwrap();
        assert_eq!(model.automatic_relevance().unwrap().precisions(), &DVector::from_element(1, 2.5));
        assert!((model.posterior().m()[(0, 0)] - 1E5).abs() < 1.);
    }

    #[test]
    fn missing_inputs_are_skipped() {
        let model = LinearGaussianWithMatrixNormalWishart::new(prior(1, 2), true).unwrap();
        let x = DMatrix::from_row_slice(2, 1, &[f64::NAN, 1.]);
        let y = DMatrix::from_row_slice(2, 1, &[1., 1.]);
        let ll = model.expected_log_likelihood(y.slice((0, 0), (2, 1)), Some(x.slice((0, 0), (2, 1))));
        assert_eq!(ll[0], f64::NEG_INFINITY);
        assert!(ll[1].is_finite());
        let stats = model.statistics(y.slice((0, 0), (2, 1)), Some(x.slice((0, 0), (2, 1))), None);
        assert!((stats[stats.nrows() - 1] - 1.).abs() < EPS);
    }

}
