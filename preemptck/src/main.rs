//! preemptck CLI

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

use preemptck::config::{CheckConfig, ViolationPolicy};
use preemptck::error::{CheckError, report_error};
use preemptck::facts::Manifest;
use preemptck::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "preemptck", version, about = "Preemption-safety contract verifier")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify that no uninterruptible routine can reach GC or a yield
    Check(RunArgs),
    /// Print every routine's effective contract and where it came from
    Resolve {
        /// Fact manifest (TOML)
        manifest: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Run the full pipeline and print the codegen policy map
    Hints(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Fact manifest (TOML)
    manifest: PathBuf,
    /// Violation policy (overrides the manifest's [check] table)
    #[arg(long, value_enum)]
    policy: Option<ViolationPolicy>,
    /// Check components on the current thread only
    #[arg(long)]
    sequential: bool,
    /// Worker threads for the parallel checker
    #[arg(long)]
    threads: Option<usize>,
    /// Standalone config file with a [check] table
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    preemptck::logging::init(cli.verbose);

    let result = match cli.command {
        Command::Check(args) => with_manifest(&args.manifest, |m| check(m, &args)),
        Command::Resolve { manifest, format } => with_manifest(&manifest, |m| resolve(m, format)),
        Command::Hints(args) => with_manifest(&args.manifest, |m| hints(m, &args)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(()) => ExitCode::FAILURE,
    }
}

/// Load the manifest and run `f`, rendering any error against its source
fn with_manifest(
    path: &Path,
    f: impl FnOnce(&Manifest) -> Result<(), CheckError>,
) -> Result<(), ()> {
    let filename = path.display().to_string();
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: cannot read {filename}: {e}");
            return Err(());
        }
    };

    let outcome = Manifest::parse(&filename, &source).and_then(|manifest| f(&manifest));
    outcome.map_err(|e| {
        if report_error(&filename, &source, &e).is_err() {
            eprintln!("Error: {e}");
        }
        if let CheckError::Violations(report) = &e {
            eprintln!("{}", report.summary());
        }
        if e.is_fatal() {
            eprintln!("note: the checker's result cannot be trusted for this run; no hints were produced");
        }
    })
}

fn build_config(manifest: &Manifest, args: &RunArgs) -> Result<CheckConfig, CheckError> {
    let mut config = match &args.config {
        Some(path) => CheckConfig::from_file(path)?,
        None => CheckConfig::default(),
    };
    config = config.apply(manifest.check_section());
    if let Some(policy) = args.policy {
        config = config.policy(policy);
    }
    if args.sequential {
        config = config.parallel(false);
    }
    if let Some(threads) = args.threads {
        config = config.threads(threads);
    }
    Ok(config)
}

fn check(manifest: &Manifest, args: &RunArgs) -> Result<(), CheckError> {
    let pipeline = Pipeline::new(build_config(manifest, args)?);
    match pipeline.run(manifest) {
        Ok(output) => {
            match args.format {
                Format::Text => print!("{}", output.report),
                Format::Json => println!("{}", to_json(&output.report)?),
            }
            Ok(())
        }
        Err(CheckError::Violations(report)) if args.format == Format::Json => {
            println!("{}", to_json(&report)?);
            Err(CheckError::Violations(report))
        }
        Err(e) => Err(e),
    }
}

fn resolve(manifest: &Manifest, format: Format) -> Result<(), CheckError> {
    let resolved = Pipeline::default().resolve(manifest)?;
    match format {
        Format::Text => {
            for (id, resolution) in resolved.contracts.resolutions() {
                println!("{id}: {} ({})", resolution.contract, resolution.source);
            }
        }
        Format::Json => println!("{}", to_json(&resolved.contracts)?),
    }
    Ok(())
}

fn hints(manifest: &Manifest, args: &RunArgs) -> Result<(), CheckError> {
    let output = Pipeline::new(build_config(manifest, args)?).run(manifest)?;
    match args.format {
        Format::Text => print!("{}", output.hints),
        Format::Json => println!("{}", to_json(&output.hints)?),
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CheckError> {
    Ok(serde_json::to_string_pretty(value)?)
}
