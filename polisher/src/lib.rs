pub mod consensus;
pub mod error;
pub mod oracle;
pub mod param_tune;
pub mod params;
pub mod plan_regions;
pub mod reference;
#[macro_use]
extern crate log;

pub use error::{PoissonError, Result};

/// A pool of `workers` threads. Zero workers is a configuration error.
pub fn worker_pool(workers: usize) -> Result<rayon::ThreadPool> {
    if workers == 0 {
        return Err(PoissonError::config("the number of workers should be positive"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|why| PoissonError::config(why.to_string()))
}
