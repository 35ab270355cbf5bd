use nalgebra::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use bayesmix::prob::*;
use bayesmix::mixture::*;
use bayesmix::fit::{self, Schedule};
use bayesmix::config::Config;
use bayesmix::predict::Mode;

const EPS : f64 = 10E-8;

fn normal_rows(n : usize, d : usize, rng : &mut StdRng) -> DMatrix<f64> {
    DMatrix::from_fn(n, d, |_, _| StandardNormal.sample(rng) )
}

fn gaussian_prior(d : usize) -> NormalWishart {
    NormalWishart::new(DVector::zeros(d), 0.01, DMatrix::identity(d, d), d as f64 + 1.).unwrap()
}

fn regression_data(n : usize, rng : &mut StdRng) -> (DMatrix<f64>, DMatrix<f64>) {
    let x = DMatrix::from_fn(n, 1, |i, _| 2. * i as f64 / n as f64 - 1. );
    let noise = normal_rows(n, 1, rng).scale(0.1);
    let y = x.scale(2.) + noise;
    (x, y)
}

#[test]
fn single_cluster_collapses_to_one_component() {
    let mut config = Config::default();
    config.nb_models = 3;
    config.gating = GatingKind::Dirichlet;
    let max_sweeps = 2000;
    let mut initially_split = false;
    for seed in 0..3 {
        let mut rng = StdRng::seed_from_u64(seed);
        let y = normal_rows(100, 2, &mut rng);
        let mut mix = config.gaussian_mixture(2).unwrap();
        mix.add_data(y, None, false, LabelInit::Prior, &mut rng).unwrap();
        initially_split |= mix.used_labels().len() > 1;
        mix.resample_model(50, &mut rng).unwrap();
        let mut sweeps = 50;
        while mix.used_labels().len() > 1 && sweeps < max_sweeps {
            mix.resample_model(1, &mut rng).unwrap();
            sweeps += 1;
        }
        assert_eq!(mix.used_labels().len(), 1, "seed {} still uses {:?} after {} sweeps", seed, mix.label_usages(), sweeps);
    }
    assert!(initially_split);
}

#[test]
fn stick_breaking_experts_recover_line() {
    let mut rng = StdRng::seed_from_u64(102);
    let (x, y) = regression_data(200, &mut rng);
    let mut config = Config::default();
    config.nb_models = 10;
    config.gating = GatingKind::StickBreaking;
    config.schedule = Schedule { gibbs_iters : 20, vi_iters : 1000, vi_tolerance : 1E-6, ..Schedule::default() };
    let mut mix = config.regression_mixture(1, 1).unwrap();
    mix.add_data(y, Some(x), false, LabelInit::Prior, &mut rng).unwrap();
    let outcomes = fit::run(&mut mix, &config.schedule, &mut rng).unwrap();
    assert!(outcomes[0].lowerbound().unwrap().is_finite());
    let pred = mix.meanfield_prediction(&DMatrix::zeros(1, 1), None, Mode::Average).unwrap();
    assert!(pred.mean[(0, 0)].abs() < 0.5);
    assert!(pred.nlpd.is_none());
}

#[test]
fn missing_target_is_labelled_but_ignored() {
    let mut rng = StdRng::seed_from_u64(103);
    let y = normal_rows(20, 2, &mut rng);
    let mut with_nan = y.clone().insert_row(20, 0.);
    with_nan[(20, 1)] = f64::NAN;

    let gating = Gating::new(GatingKind::StickBreaking, 2, 1.).unwrap();
    let mut clean = MixtureOfGaussians::with_prior(gating.clone(), gaussian_prior(2)).unwrap();
    let mut dirty = MixtureOfGaussians::with_prior(gating, gaussian_prior(2)).unwrap();
    clean.add_data(y, None, false, LabelInit::Prior, &mut rng).unwrap();
    dirty.add_data(with_nan, None, false, LabelInit::Prior, &mut rng).unwrap();
    assert_eq!(dirty.batches()[0].nb_valid(), 20);

    clean.meanfield_update().unwrap();
    dirty.meanfield_update().unwrap();
    for (a, b) in clean.components().iter().zip(dirty.components().iter()) {
        let diff = Conjugate::posterior(a).link() - Conjugate::posterior(b).link();
        assert!(diff.amax() < EPS);
    }
    assert_eq!(dirty.labels()[0].len(), 21);
    assert!(dirty.labels()[0][20] < 2);

    dirty.resample_model(5, &mut rng).unwrap();
    assert_eq!(dirty.labels()[0].len(), 21);
}

#[test]
fn stochastic_steps_approach_fixed_point() {
    let mut rng = StdRng::seed_from_u64(104);
    let y = normal_rows(1000, 1, &mut rng).add_scalar(3.);
    let gating = Gating::new(GatingKind::Dirichlet, 1, 1.).unwrap();
    let mut mix = MixtureOfGaussians::with_prior(gating, gaussian_prior(1)).unwrap();
    mix.add_data(y, None, false, LabelInit::Prior, &mut rng).unwrap();

    let mut full = mix.clone();
    full.meanfield_update().unwrap();
    let target = Conjugate::posterior(&full.components()[0]).link();
    let distance = |m : &MixtureOfGaussians| (Conjugate::posterior(&m.components()[0]).link() - &target).norm();

    let initial = distance(&mix);
    for _ in 0..10 {
        mix.meanfield_sgdstep(32, 0.1, &mut rng).unwrap();
    }
    let early = distance(&mix);
    for _ in 0..190 {
        mix.meanfield_sgdstep(32, 0.1, &mut rng).unwrap();
    }
    let late = distance(&mix);
    assert!(early < initial);
    assert!(late < early);
    assert!(late < 0.25 * initial);
}

fn posterior_links(m : &MixtureOfGaussians) -> DVector<f64> {
    let mut links = Vec::new();
    for c in m.components() {
        links.extend(Conjugate::posterior(c).link().iter().cloned());
    }
    DVector::from_vec(links)
}

#[test]
fn stochastic_steps_approach_fixed_point_with_two_clusters() {
    let mut rng = StdRng::seed_from_u64(110);
    let n = 1000;
    let mut y = normal_rows(n, 1, &mut rng).scale(0.5);
    for i in 0..n {
        y[(i, 0)] += if i < n / 2 { -2. } else { 2. };
    }

    // Each component starts from a 70/30 blend of both clusters.
    let labels : Vec<usize> = (0..n).map(|i| {
        let major = if i < n / 2 { 0 } else { 1 };
        if i % 10 < 7 { major } else { 1 - major }
    }).collect();
    let gating = Gating::new(GatingKind::Dirichlet, 2, 1.).unwrap();
    let mut mix = MixtureOfGaussians::with_prior(gating, gaussian_prior(1)).unwrap();
    mix.add_data(y, None, false, LabelInit::Given(labels), &mut rng).unwrap();
    mix.resample(&mut rng).unwrap();

    let mut full = mix.clone();
    full.meanfield_coordinate_descent(1E-10, 500).unwrap();
    let target = posterior_links(&full);
    let distance = |m : &MixtureOfGaussians| (posterior_links(m) - &target).norm();

    let initial = distance(&mix);
    for _ in 0..10 {
        mix.meanfield_sgdstep(100, 0.1, &mut rng).unwrap();
    }
    let early = distance(&mix);
    for _ in 0..290 {
        mix.meanfield_sgdstep(100, 0.1, &mut rng).unwrap();
    }
    let late = distance(&mix);
    assert!(early < initial);
    assert!(late < early);
    assert!(late < 0.25 * initial);

    let mus : Vec<f64> = mix.components().iter().map(|c| Conjugate::posterior(c).mu()[0] ).collect();
    assert!(mus[0] < -1.5 && mus[1] > 1.5);
    let weights = mix.gating().mean();
    assert!((weights[0] - 0.5).abs() < 0.1);
}

#[test]
fn used_labels_track_data() {
    let mut rng = StdRng::seed_from_u64(105);
    let gating = Gating::new(GatingKind::StickBreaking, 5, 1.).unwrap();
    let mut mix = MixtureOfGaussians::with_prior(gating, gaussian_prior(2)).unwrap();
    assert!(mix.used_labels().is_empty());
    mix.add_data(normal_rows(30, 2, &mut rng), None, false, LabelInit::Prior, &mut rng).unwrap();
    mix.resample_model(5, &mut rng).unwrap();
    let used = mix.used_labels();
    assert!(!used.is_empty());
    assert!(used.iter().all(|k| *k < 5 ));
    mix.clear_data();
    assert!(mix.used_labels().is_empty());
}

#[test]
fn seeded_fits_are_reproducible() {
    let mut data_rng = StdRng::seed_from_u64(106);
    let (x, y) = regression_data(60, &mut data_rng);
    let fit = |seed : u64| {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut config = Config::default();
        config.nb_models = 4;
        config.schedule = Schedule { gibbs_iters : 5, vi_iters : 20, ..Schedule::default() };
        let mut mix = config.regression_mixture(1, 1).unwrap();
        mix.add_data(y.clone(), Some(x.clone()), true, LabelInit::Prior, &mut rng).unwrap();
        let outcomes = fit::run(&mut mix, &config.schedule, &mut rng).unwrap();
        (mix.labels().to_vec(), outcomes)
    };
    assert_eq!(fit(7), fit(7));
}

#[test]
fn regression_lowerbound_is_monotone() {
    let mut rng = StdRng::seed_from_u64(107);
    let (x, y) = regression_data(100, &mut rng);
    let mut config = Config::default();
    config.nb_models = 5;
    let mut mix = config.regression_mixture(1, 1).unwrap();
    mix.add_data(y, Some(x), false, LabelInit::Prior, &mut rng).unwrap();
    mix.resample_model(5, &mut rng).unwrap();
    let outcome = mix.meanfield_coordinate_descent(1E-10, 100).unwrap();
    for w in outcome.lowerbounds.windows(2) {
        assert!(w[1] >= w[0] - 1E-6);
    }
    for resp in mix.meanfield_responsibilities().iter().chain(mix.responsibilities().iter()) {
        for row in resp.row_iter() {
            assert!((row.sum() - 1.).abs() < EPS);
        }
    }
}

#[test]
fn missing_rows_do_not_change_likelihood() {
    let mut rng = StdRng::seed_from_u64(108);
    let gating = Gating::new(GatingKind::Dirichlet, 2, 1.).unwrap();
    let mut mix = MixtureOfGaussians::with_prior(gating, gaussian_prior(2)).unwrap();
    let y = normal_rows(40, 2, &mut rng);
    mix.add_data(y.clone(), None, false, LabelInit::Prior, &mut rng).unwrap();
    mix.resample_model(5, &mut rng).unwrap();
    let test = normal_rows(5, 2, &mut rng);
    let mut padded = test.clone().insert_row(5, 0.);
    padded[(5, 0)] = f64::NAN;
    let a = mix.log_likelihood(test, None).unwrap();
    let b = mix.log_likelihood(padded, None).unwrap();
    assert!(a.is_finite());
    assert!((a - b).abs() < EPS);
}

#[test]
fn promoted_posterior_is_kept_without_data() {
    let mut rng = StdRng::seed_from_u64(109);
    let gating = Gating::new(GatingKind::Dirichlet, 1, 1.).unwrap();
    let mut mix = MixtureOfGaussians::with_prior(gating, gaussian_prior(2)).unwrap();
    mix.add_data(normal_rows(100, 2, &mut rng).add_scalar(1.), None, false, LabelInit::Prior, &mut rng).unwrap();
    mix.meanfield_coordinate_descent(1E-8, 50).unwrap();
    let fitted = Conjugate::posterior(&mix.components()[0]).clone();
    mix.promote();
    mix.clear_data();

    let nb_draws = 500;
    let mut avg = DVector::zeros(2);
    for _ in 0..nb_draws {
        mix.resample(&mut rng).unwrap();
        avg += mix.components()[0].mean();
    }
    avg.unscale_mut(nb_draws as f64);
    let c = &mix.components()[0];
    assert!((Conjugate::posterior(c).link() - fitted.link()).amax() < 1E-6);
    assert!((avg - fitted.mu()).amax() < 0.05);
}
