use rand::SeedableRng;
use rand::rngs::StdRng;

/// Results of running a job over a set of seeds: successful values and errors, each
/// tagged with the seed of its worker, in seed order.
#[derive(Debug)]
pub struct PoolOutcome<T> {

    pub successes : Vec<(u64, T)>,

    pub failures : Vec<(u64, anyhow::Error)>

}

/// Runs job once per seed, with at most workers threads alive at a time. Each worker owns a
/// private StdRng seeded from its seed, and shares nothing mutable with the others; a failing
/// (or panicking) worker is recorded as a failure without affecting the remaining ones.
pub fn run_seeds<T, F>(seeds : &[u64], workers : usize, job : F) -> PoolOutcome<T>
where
    T : Send,
    F : Fn(u64, &mut StdRng) -> Result<T, anyhow::Error> + Sync
{
    let mut outcome = PoolOutcome { successes : Vec::new(), failures : Vec::new() };
    let job = &job;
    for chunk in seeds.chunks(workers.max(1)) {
        let results : Vec<(u64, Result<T, anyhow::Error>)> = std::thread::scope(|scope| {
            let handles : Vec<_> = chunk.iter().map(|seed| {
                let seed = *seed;
                (seed, scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    job(seed, &mut rng)
                }))
            }).collect();
            handles.into_iter().map(|(seed, handle)| {
                let res = handle.join().unwrap_or_else(|_| {
                    Err(anyhow::Error::msg(format!("Worker for seed {} panicked", seed)))
                });
                (seed, res)
            }).collect()
        });
        for (seed, res) in results {
            match res {
                Ok(value) => outcome.successes.push((seed, value)),
                Err(e) => {
                    log::warn!("Seed {} failed: {}", seed, e);
                    outcome.failures.push((seed, e));
                }
            }
        }
    }
    outcome
}
