//! merlin - command-line driver for the inference engines
//!
//! Usage:
//!   merlin -f model.uai -a bte -t MAR                 # marginals, UAI output
//!   merlin -f model.uai -e model.evid -a wmb -t PR    # probability of evidence
//!   merlin -f model.uai -q query.txt -a wmb -t MMAP   # marginal MAP
//!   merlin -f model.uai -d data.csv -a cte -t EM      # parameter learning

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::Parser;

use merlin_core::io::uai;
use merlin_core::options::{Algorithm, InitMethod, OutputFormat, Task};
use merlin_core::solver::{Outcome, Solver, SolverOptions};
use merlin_core::MerlinError;

#[derive(Parser)]
#[command(name = "merlin")]
#[command(about = "Probabilistic inference over discrete graphical models")]
#[command(
    long_about = "Answers PR, MAR, MAP and MMAP queries over UAI models with exact \
                  (bte, cte) and approximate (wmb, ijgp, jglp, lbp) engines, and learns \
                  CPT parameters from data (EM)."
)]
struct Cli {
    /// Path to the model file (UAI format)
    #[arg(short = 'f', long = "input-file", value_name = "FILE")]
    input_file: PathBuf,

    /// Path to the evidence file
    #[arg(short = 'e', long = "evidence-file", value_name = "FILE")]
    evidence_file: Option<PathBuf>,

    /// Path to the virtual evidence file
    #[arg(short = 'V', long = "virtual-evidence-file", value_name = "FILE")]
    virtual_evidence_file: Option<PathBuf>,

    /// Path to the query file (MMAP variables or joint-marginal scope)
    #[arg(short = 'q', long = "query-file", value_name = "FILE")]
    query_file: Option<PathBuf>,

    /// Path to the output file (defaults next to the model file)
    #[arg(short = 'o', long = "output-file", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Path to the training dataset (EM)
    #[arg(short = 'd', long = "dataset-file", value_name = "FILE")]
    dataset_file: Option<PathBuf>,

    /// Inference algorithm: bte, cte, wmb, ijgp, jglp, lbp, gibbs
    #[arg(short = 'a', long = "algorithm", default_value = "wmb")]
    algorithm: String,

    /// Inference task: PR, MAR, MAP, MMAP, EM
    #[arg(short = 't', long = "task", default_value = "MAR")]
    task: String,

    /// Mini-bucket i-bound (0 means unbounded)
    #[arg(short = 'i', long = "ibound", default_value_t = 2)]
    ibound: usize,

    /// Time limit in seconds
    #[arg(short = 'l', long = "time-limit")]
    time_limit: Option<f64>,

    /// Seed for the random number generator
    #[arg(short = 's', long = "seed", default_value_t = 12345678)]
    seed: u64,

    /// Number of iterations
    #[arg(short = 'n', long = "iterations", default_value_t = 10)]
    iterations: usize,

    /// Number of samples (sampling builds)
    #[arg(short = 'm', long = "samples", default_value_t = 1000)]
    samples: usize,

    /// Convergence threshold
    #[arg(short = 'E', long = "threshold", default_value_t = 1e-6)]
    threshold: f64,

    /// Dirichlet equivalent sample size
    #[arg(short = 'A', long = "alpha", default_value_t = 5.0)]
    alpha: f64,

    /// CPT initialization for EM: none, uniform, random
    #[arg(short = 'F', long = "init-factors", default_value = "uniform")]
    init_factors: String,

    /// Output format: uai or json
    #[arg(short = 'O', long = "output-format", default_value = "uai")]
    output_format: String,

    /// Verbosity level (repeat for more)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Enable debug output
    #[arg(long = "debug")]
    debug: bool,

    /// Replace zero probabilities by a small positive epsilon on load
    #[arg(short = 'p', long = "positive")]
    positive: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        log::LevelFilter::Debug
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(filter)
        .init();

    if let Err(err) = run(&cli) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), MerlinError> {
    let algorithm = Algorithm::from_str(&cli.algorithm)?;
    let task = Task::from_str(&cli.task)?;
    let init_factors = InitMethod::from_str(&cli.init_factors)?;
    let output_format = OutputFormat::from_str(&cli.output_format)?;

    let model = uai::read_model(open(&cli.input_file)?, cli.positive)?;

    let options = SolverOptions {
        algorithm,
        task,
        ibound: cli.ibound,
        iterations: cli.iterations,
        samples: cli.samples,
        time_limit: cli.time_limit,
        seed: cli.seed,
        threshold: cli.threshold,
        alpha: cli.alpha,
        init_factors,
        output_format,
    };
    let mut solver = Solver::new(model, options);

    if let Some(path) = &cli.evidence_file {
        solver.set_evidence(uai::read_evidence(open(path)?)?);
    }
    if let Some(path) = &cli.virtual_evidence_file {
        solver.set_virtual_evidence(uai::read_virtual_evidence(open(path)?)?);
    }
    if let Some(path) = &cli.query_file {
        solver.set_query(uai::read_query(open(path)?)?);
    }
    if let Some(path) = &cli.dataset_file {
        solver.set_dataset(uai::read_dataset(open(path)?)?);
    }

    let outcome = solver.run()?;

    let output_path = cli.output_file.clone().unwrap_or_else(|| {
        let mut name = cli
            .input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        name.push('.');
        name.push_str(&task.to_string());
        if output_format == OutputFormat::Json {
            name.push_str(".json");
        }
        PathBuf::from(name)
    });
    let mut out = BufWriter::new(File::create(&output_path)?);

    match outcome {
        Outcome::Inference(solution) => match output_format {
            OutputFormat::Uai => solution.write_uai(&mut out)?,
            OutputFormat::Json => solution.write_json(&mut out)?,
        },
        Outcome::Learned(model) => uai::write_model(&mut out, &model)?,
    }
    log::info!("wrote {}", output_path.display());
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>, MerlinError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| MerlinError::Input(format!("cannot open {}: {e}", path.display())))
}
