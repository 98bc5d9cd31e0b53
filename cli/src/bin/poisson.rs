use definitions::*;
use polisher::consensus::{correct_regions, ConsensusConfig};
use polisher::oracle::{CommandOracle, Inputs};
use polisher::param_tune::{FileCheckpoint, TuneConfig};
use polisher::reference::ReferenceIndex;
use polisher::{PoissonError, Result};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
#[macro_use]
extern crate log;

fn main() {
    let matches = poisson_cli::poisson_commands::poisson_parser().get_matches();
    if let Some((_, sub_m)) = matches.subcommand() {
        let level = match sub_m.get_count("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }
    let result = match matches.subcommand() {
        Some(("consensus", sub_m)) => consensus(sub_m),
        Some(("train", sub_m)) => train(sub_m),
        Some(("regions", sub_m)) => regions(sub_m),
        _ => unreachable!(),
    };
    if let Err(why) = result {
        error!("{why}");
        std::process::exit(1);
    }
}

fn required<'a>(matches: &'a clap::ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| PoissonError::config(format!("{name} is required")))
}

fn inputs(matches: &clap::ArgMatches) -> Result<Inputs> {
    let reference = required(matches, "reference")?;
    let alignment = required(matches, "alignment")?;
    let evidence = required(matches, "evidence")?;
    Ok(Inputs::new(reference, alignment, evidence))
}

fn load_params(matches: &clap::ArgMatches) -> Result<ParameterSet> {
    let path: Option<&String> = matches.get_one("params");
    polisher::params::load(path.map(Path::new))
}

/// The regions given by `-r`, checked against the reference, or the default plan.
fn target_regions(
    matches: &clap::ArgMatches,
    index: &ReferenceIndex,
    params: &ParameterSet,
) -> Result<Vec<Region>> {
    match matches.get_many::<Region>("region") {
        Some(regions) => {
            let regions: Vec<_> = regions.cloned().collect();
            for region in regions.iter() {
                index.check(region)?;
            }
            Ok(regions)
        }
        None => index.default_regions(params),
    }
}

fn oracle(matches: &clap::ArgMatches) -> CommandOracle {
    match matches.get_one::<String>("oracle") {
        Some(program) => CommandOracle::new(program),
        None => CommandOracle::default(),
    }
}

fn consensus(matches: &clap::ArgMatches) -> Result<()> {
    debug!("START\tConsensus");
    let params = load_params(matches)?;
    let inputs = inputs(matches)?;
    let reference = required(matches, "reference")?;
    let index = ReferenceIndex::from_fasta(reference)?;
    let regions = target_regions(matches, &index, &params)?;
    let verbose = matches.get_count("verbose");
    let config = ConsensusConfig::new(matches.get_flag("test"), verbose);
    let pool = match matches.get_one::<usize>("threads").copied().unwrap_or(1) {
        1 => None,
        threads => Some(polisher::worker_pool(threads)?),
    };
    let oracle = oracle(matches);
    let output = match matches.get_one::<String>("output") {
        Some(output) => output.clone(),
        None => Path::new(reference)
            .with_extension("corr.fasta")
            .to_string_lossy()
            .to_string(),
    };
    debug!("OUTPUT\t{output}");
    let pool = pool.as_ref();
    let summary = match output.as_str() {
        "-" => {
            let stdout = std::io::stdout();
            let mut wtr = BufWriter::new(stdout.lock());
            correct_regions(&oracle, &inputs, &params, &regions, &config, pool, &mut wtr)?
        }
        path => {
            let mut wtr = std::fs::File::create(path).map(BufWriter::new)?;
            correct_regions(&oracle, &inputs, &params, &regions, &config, pool, &mut wtr)?
        }
    };
    info!(
        "DONE\tConsensus\t{}\t{}",
        summary.written,
        summary.failures.len()
    );
    Ok(())
}

fn train(matches: &clap::ArgMatches) -> Result<()> {
    debug!("START\tTrain");
    let params = load_params(matches)?;
    let inputs = inputs(matches)?;
    let index = ReferenceIndex::from_fasta(required(matches, "reference")?)?;
    let regions = target_regions(matches, &index, &params)?;
    let iterations = matches.get_one::<usize>("iterations").copied().unwrap_or(30);
    let threads = matches.get_one::<usize>("threads").copied().unwrap_or(4);
    let pool = polisher::worker_pool(threads)?;
    let output = match (matches.get_one::<String>("output"), matches.get_one::<String>("params")) {
        (Some(output), _) => PathBuf::from(output),
        (None, Some(params)) => Path::new(params).with_extension("trained.toml"),
        (None, None) => PathBuf::from("poisson.trained.toml"),
    };
    let mut checkpoint = FileCheckpoint::new(&output);
    info!(
        "OUTPUT\t{}\t{}",
        checkpoint.params_path().display(),
        checkpoint.history_path().display()
    );
    let config = TuneConfig::new(iterations, matches.get_count("verbose"));
    // Nothing sets this from the command line; an interrupted run keeps the last saved file.
    let cancel = AtomicBool::new(false);
    let oracle = oracle(matches);
    let outcome = polisher::param_tune::train(
        &oracle,
        &inputs,
        params,
        &regions,
        &config,
        &pool,
        &mut checkpoint,
        &cancel,
    )?;
    let accuracy = outcome.history.last().map(|it| it.accuracy());
    info!(
        "DONE\tTrain\t{:?}\t{}\t{:?}",
        outcome.stop,
        outcome.history.len(),
        accuracy
    );
    Ok(())
}

fn regions(matches: &clap::ArgMatches) -> Result<()> {
    let params = load_params(matches)?;
    let index = ReferenceIndex::from_fasta(required(matches, "reference")?)?;
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    for region in index.default_regions(&params)? {
        writeln!(wtr, "{region}")?;
    }
    wtr.flush()?;
    Ok(())
}
