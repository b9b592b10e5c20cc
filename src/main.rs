//! sshfs-harness entry point

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{error, info, warn};

use sshfs_harness::config::HarnessConfig;
use sshfs_harness::runner::Runner;
use sshfs_harness::scenario::{self, Scenario};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: sshfs-harness [config.yaml] [--filter GLOB]... [--list]");
    eprintln!();
    eprintln!("sshfs-harness - Integration tests for a mounted sshfs file system");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml      Path to configuration file (built-in defaults if omitted)");
    eprintln!("  --filter GLOB    Only run scenarios whose name matches GLOB (repeatable)");
    eprintln!("  --list           Print the test IDs that would run, then exit");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SSHFS_BINARY         Path to the sshfs binary under test");
    eprintln!("  TEST_WITH_VALGRIND   Run sshfs under valgrind unless no/false/0");
    eprintln!("  RUST_LOG             Log filter, overrides logging.level");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  sshfs-harness harness.yaml --filter 'truncate_*'");
}

struct Args {
    config_path: Option<PathBuf>,
    filters: Vec<String>,
    list: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_path: None,
        filters: Vec::new(),
        list: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "--list" => args.list = true,
            "--filter" => {
                let pattern = iter
                    .next()
                    .ok_or_else(|| "--filter requires a pattern".to_string())?;
                args.filters.push(pattern);
            }
            other if other.starts_with('-') => {
                return Err(format!("Unknown option {}", other));
            }
            path => {
                if args.config_path.is_some() {
                    return Err("Only one configuration file may be given".to_string());
                }
                args.config_path = Some(PathBuf::from(path));
            }
        }
    }
    Ok(args)
}

fn build_filter(patterns: &[String]) -> Result<Option<GlobSet>, globset::Error> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    // Load configuration
    let config = match &args.config_path {
        Some(path) => match HarnessConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => HarnessConfig::from_env(),
    };

    sshfs_harness::init_logging(&config.logging.level);

    let filter = match build_filter(&args.filters) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Invalid filter: {}", e);
            std::process::exit(1);
        }
    };

    let scenarios: Vec<&'static Scenario> = scenario::catalogue()
        .iter()
        .filter(|s| filter.as_ref().map_or(true, |f| f.is_match(s.name)))
        .collect();
    if scenarios.is_empty() {
        eprintln!("No scenario matches the given filters");
        std::process::exit(1);
    }

    let runner = match Runner::new(config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if args.list {
        for (scenario, tuple) in runner.plan(&scenarios) {
            println!("{}", scenario.test_id(&tuple));
        }
        return Ok(());
    }

    info!("sshfs-harness starting");
    if let Some(path) = &args.config_path {
        info!("Loaded configuration from {:?}", path);
    }
    info!(
        "Testing {:?} with {} scenario(s)",
        runner.config().service.binary,
        scenarios.len()
    );

    if let Err(e) = runner.preflight().await {
        warn!("Environment cannot host the tests: {}", e);
        println!("SKIP all: {}", e);
        return Ok(());
    }

    // First Ctrl+C finishes the current run, including its teardown
    let interrupted = runner.interrupt_flag();
    ctrlc::set_handler(move || {
        info!("Received interrupt, stopping after the current run");
        interrupted.store(true, Ordering::SeqCst);
    })?;

    let report = runner.run_all(&scenarios).await;
    println!("{}", report);

    if !report.is_success() {
        error!("{} run(s) failed", report.failed());
        std::process::exit(1);
    }
    Ok(())
}
