// src/bin/png-harness.rs
//
// Driver: run one harness session over a file and exit with the harness
// status (0 completed, 1 contract violation, 2 environment failure).

use clap::{ArgAction, Parser, ValueEnum};
use png_harness::engine::NamingScheme;
use png_harness::{exit_code, run_file, HarnessConfig, HarnessMode};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "png-harness", version)]
#[command(about = "Drive one PNG decode or encode session over a test vector", long_about = None)]
struct Cli {
    /// Test vector; its file name selects the image features to probe.
    input: PathBuf,

    /// Which harness to run.
    #[arg(long, value_enum, default_value_t = ModeArg::Random)]
    mode: ModeArg,

    /// How the feature code is read from the input name.
    #[arg(long, value_enum, default_value_t = NamingArg::Plain)]
    naming: NamingArg,

    /// Fixed seed (default: the middle byte of the input).
    #[arg(long)]
    seed: Option<u64>,

    /// Chance each ancillary record family is initialised on encode.
    #[arg(long, default_value_t = 1.0)]
    init_probability: f64,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModeArg {
    Read,
    Write,
    Random,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum NamingArg {
    Plain,
    Afl,
}

impl Cli {
    fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            mode: match self.mode {
                ModeArg::Read => HarnessMode::Read,
                ModeArg::Write => HarnessMode::Write,
                ModeArg::Random => HarnessMode::Random,
            },
            naming: match self.naming {
                NamingArg::Plain => NamingScheme::Plain,
                NamingArg::Afl => NamingScheme::Afl,
            },
            seed: self.seed,
            init_probability: self.init_probability,
            ..HarnessConfig::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .with_target(true)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.harness_config();
    let result = run_file(&cli.input, &config);
    match &result {
        Ok(report) => info!(
            target: "png_harness::engine",
            kind = report.kind.as_str(),
            code = %report.feature_code,
            family = report.family,
            transport = report.transport,
            progressive = report.progressive,
            options = report.options_applied,
            records = report.records_seen,
            setter_failures = report.setter_failures,
            bytes_out = report.bytes_out,
            outcome = %report.outcome,
            "harness finished"
        ),
        Err(err) => error!(
            target: "png_harness::engine",
            category = ?err.category(),
            %err,
            "harness failed"
        ),
    }
    ExitCode::from(exit_code(&result))
}
