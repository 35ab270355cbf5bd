use bayesmix::config::Config;
use bayesmix::fit::{self, pool};
use bayesmix::mixture::LabelInit;
use bayesmix::predict::Mode;
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::*;
use std::fs;
use std::path::{Path, PathBuf};
use structopt::*;

/// Fit mixtures of linear-Gaussian experts to tabular data and report their predictive performance
#[derive(StructOpt, Debug)]
pub struct Bayesmix {

    /// CSV file whose leading columns are inputs and trailing columns are targets.
    data : PathBuf,

    /// Number of leading input columns.
    #[structopt(short, long)]
    inputs : usize,

    /// JSON model configuration. Defaults are used for absent fields.
    #[structopt(short, long)]
    config : Option<PathBuf>,

    /// Held-out CSV with the same layout, used for evaluation instead of the training data.
    #[structopt(short, long)]
    test : Option<PathBuf>,

    /// Number of independent restarts, seeded from the configured seed onwards.
    #[structopt(short, long, default_value = "1")]
    restarts : u64,

    /// Maximum number of restarts running at the same time.
    #[structopt(short, long, default_value = "4")]
    workers : usize,

    /// Whiten inputs and targets before fitting.
    #[structopt(long)]
    whiten : bool,

    /// Prediction mode (average or mode). Overrides the configured one.
    #[structopt(short, long)]
    mode : Option<Mode>,

    /// The first CSV line holds data rather than column names.
    #[structopt(long)]
    no_header : bool

}

/// Reads a numeric table. Empty or unparseable entries become NaN and mark their row as missing.
fn read_table(path : &Path, has_header : bool) -> Result<DMatrix<f64>, anyhow::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .from_path(path)?;
    let mut values = Vec::new();
    let mut ncols = None;
    for (ix, record) in reader.records().enumerate() {
        let record = record?;
        match ncols {
            Some(n) if n != record.len() => {
                return Err(anyhow::Error::msg(format!("Record {} has {} fields (expected {})", ix, record.len(), n)));
            },
            _ => ncols = Some(record.len())
        }
        values.extend(record.iter().map(|e| e.trim().parse::<f64>().unwrap_or(f64::NAN) ));
    }
    match ncols {
        Some(n) if n > 0 => Ok(DMatrix::from_row_slice(values.len() / n, n, &values[..])),
        _ => Err(anyhow::Error::msg(format!("No records at {}", path.display())))
    }
}

fn split_table(tbl : &DMatrix<f64>, inputs : usize) -> Result<(DMatrix<f64>, DMatrix<f64>), anyhow::Error> {
    if inputs == 0 || inputs >= tbl.ncols() {
        return Err(anyhow::Error::msg(format!("Cannot take {} input columns out of {}", inputs, tbl.ncols())));
    }
    let x = tbl.columns(0, inputs).clone_owned();
    let y = tbl.columns(inputs, tbl.ncols() - inputs).clone_owned();
    Ok((x, y))
}

struct Evaluation {

    nlpd : f64,

    mse : f64,

    used : usize

}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let args = Bayesmix::from_args();
    let mut config = match &args.config {
        Some(path) => Config::from_json(&fs::read_to_string(path)?)?,
        None => Config::default()
    };
    if let Some(mode) = args.mode {
        config.prediction = mode;
    }
    config.whiten |= args.whiten;

    let (x, y) = split_table(&read_table(&args.data, !args.no_header)?, args.inputs)?;
    let (x_test, y_test) = match &args.test {
        Some(path) => split_table(&read_table(path, !args.no_header)?, args.inputs)?,
        None => (x.clone(), y.clone())
    };

    let seeds : Vec<u64> = (0..args.restarts).map(|i| config.schedule.seed + i ).collect();
    let bar = ProgressBar::new(seeds.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{elapsed}] {wide_bar:.cyan/blue} {pos:>3}/{len:3}")
    );
    bar.set_message("Fitting");

    let config = &config;
    let outcome = pool::run_seeds(&seeds, args.workers, |seed, rng| {
        let mut mixture = config.regression_mixture(x.ncols(), y.ncols())?;
        mixture.add_data(y.clone(), Some(x.clone()), config.whiten, LabelInit::Prior, rng)?;
        let traces = fit::run(&mut mixture, &config.schedule, rng)?;
        if let Some(vlb) = traces.last().and_then(|t| t.lowerbound() ) {
            log::info!("Seed {} finished with lower bound {}", seed, vlb);
        }
        let pred = mixture.meanfield_prediction(&x_test, Some(&y_test), config.prediction)?;
        bar.inc(1);
        Ok(Evaluation {
            nlpd : pred.mean_nlpd().unwrap_or(f64::NAN),
            mse : pred.mse(&y_test)?,
            used : mixture.used_labels().len()
        })
    });
    bar.finish_with_message("Done");

    for (seed, eval) in outcome.successes.iter() {
        println!("seed {}\tnlpd {:.6}\tmse {:.6}\tcomponents {}", seed, eval.nlpd, eval.mse, eval.used);
    }
    for (seed, e) in outcome.failures.iter() {
        eprintln!("seed {}\tfailed: {}", seed, e);
    }
    if outcome.successes.is_empty() {
        return Err(anyhow::Error::msg("Every restart failed"));
    }
    let n = outcome.successes.len() as f64;
    let nlpd = outcome.successes.iter().map(|(_, e)| e.nlpd ).sum::<f64>() / n;
    let mse = outcome.successes.iter().map(|(_, e)| e.mse ).sum::<f64>() / n;
    println!("mean\tnlpd {:.6}\tmse {:.6}", nlpd, mse);
    Ok(())
}
