//! Entry point for the PrusaLink boot initializer.

use clap::Parser;
use linkboot::{BootOptions, BootResult, BootSequence, DryRunSystem, HostSystem};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Prepare the printer host and start PrusaLink as the service user
#[derive(Parser, Debug)]
#[command(author, version, about = "PrusaLink boot initializer")]
struct BootArgs {
    /// JSON options file
    ///
    /// Missing keys keep their defaults. Without this flag the stock
    /// printer image settings are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log every action instead of performing it, then print the report
    #[arg(long)]
    dry_run: bool,

    /// Print the effective options as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> ExitCode {
    // Boot progress goes to stderr; RUST_LOG overrides the info level
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        // The boot proceeds without log output
        eprintln!("linkboot: no log output: {e}");
    }

    let args = BootArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("linkboot: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: BootArgs) -> BootResult<()> {
    let options = BootOptions::load(args.config.as_deref())?;

    if args.print_config {
        let json = serde_json::to_string_pretty(&options).map_err(std::io::Error::other)?;
        println!("{json}");
        return Ok(());
    }

    if args.dry_run {
        info!("Dry run: no changes will be made");
        let report = BootSequence::new(&DryRunSystem, &options).run();
        print!("{report}");
        return report.into_result();
    }

    info!("PrusaLink boot starting");
    // Only returns if the service could not be launched
    BootSequence::new(&HostSystem, &options).run().into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = BootArgs::parse_from(["linkboot"]);
        assert!(args.config.is_none());
        assert!(!args.dry_run);
        assert!(!args.print_config);
    }

    #[test]
    fn test_args_config() {
        let args = BootArgs::parse_from(["linkboot", "-c", "/etc/linkboot.json", "--dry-run"]);
        assert_eq!(args.config, Some(PathBuf::from("/etc/linkboot.json")));
        assert!(args.dry_run);
    }
}
