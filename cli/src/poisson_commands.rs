use clap::{Arg, ArgAction, Command};
use definitions::Region;

fn verbose() -> Arg {
    Arg::new("verbose")
        .short('v')
        .action(ArgAction::Count)
        .help("Debug mode")
}

fn params() -> Arg {
    Arg::new("params")
        .short('p')
        .long("params")
        .value_name("PARAMS")
        .help("Parameter file (TOML). Defaults are used without it.")
}

fn regions() -> Arg {
    Arg::new("region")
        .short('r')
        .long("region")
        .value_name("REGION")
        .num_args(1..)
        .action(ArgAction::Append)
        .value_parser(clap::value_parser!(Region))
        .help("Regions to refine, as NAME, NAME:START:END, or START:END. Defaults to every reference.")
}

fn oracle() -> Arg {
    Arg::new("oracle")
        .long("oracle")
        .value_name("PROGRAM")
        .default_value(polisher::oracle::DEFAULT_ORACLE)
        .help("Program refining one region at a time.")
}

/// REF ALIGNMENT DIR
fn inputs(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("reference")
            .required(true)
            .value_name("REF")
            .help("Reference sequences to correct (FASTA)."),
    )
    .arg(
        Arg::new("alignment")
            .required(true)
            .value_name("ALIGNMENT")
            .help("Reads aligned to the reference."),
    )
    .arg(
        Arg::new("evidence")
            .required(true)
            .value_name("DIR")
            .help("Directory of the raw per-read signal."),
    )
}

fn subcommand_consensus() -> Command {
    let cmd = Command::new("consensus")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Correct the reference, one region at a time.");
    inputs(cmd)
        .arg(verbose())
        .arg(regions())
        .arg(params())
        .arg(oracle())
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT")
                .help("Output FASTA. `-` for the stdout. Defaults to <REF>.corr.fasta"),
        )
        .arg(
            Arg::new("test")
                .short('T')
                .long("test")
                .action(ArgAction::SetTrue)
                .help("Score each corrected region and put the accuracy in its header."),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_name("THREADS")
                .default_value("1")
                .value_parser(clap::value_parser!(usize))
                .help("Number of regions refined at the same time"),
        )
}

fn subcommand_train() -> Command {
    let cmd = Command::new("train")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Tune the parameters on a subset of regions, in test mode.");
    inputs(cmd)
        .arg(verbose())
        .arg(regions())
        .arg(params())
        .arg(oracle())
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("OUTPUT")
                .help("Trained parameter file. Defaults to <PARAMS>.trained.toml"),
        )
        .arg(
            Arg::new("iterations")
                .short('i')
                .long("iterations")
                .value_name("ITER")
                .default_value("30")
                .value_parser(clap::value_parser!(usize))
                .help("Number of training iterations"),
        )
        .arg(
            Arg::new("threads")
                .short('n')
                .long("threads")
                .value_name("THREADS")
                .default_value("4")
                .value_parser(clap::value_parser!(usize))
                .help("Number of candidates evaluated at the same time"),
        )
}

fn subcommand_regions() -> Command {
    Command::new("regions")
        .version("0.1")
        .author("Bansho Masutani")
        .about("Print the default regions, one per line.")
        .arg(verbose())
        .arg(params())
        .arg(
            Arg::new("reference")
                .required(true)
                .value_name("REF")
                .help("Reference sequences (FASTA)."),
        )
}

pub fn poisson_parser() -> Command {
    Command::new("poisson")
        .version("0.1")
        .author("Bansho Masutani <ban-m@g.ecc.u-tokyo.ac.jp>")
        .about("Signal-level consensus correction")
        .arg_required_else_help(true)
        .subcommand(subcommand_consensus())
        .subcommand(subcommand_train())
        .subcommand(subcommand_regions())
}
