//! # readdir_lint (`main.rs`)
//!
//! Checks that a directory reads back identically through the raw
//! directory-entry primitive (`getdents64` / `getdirentries`) whatever the
//! read buffer size, and that every entry's resume offset can be seeked to.
//!
//! ```text
//! readdir_lint [-v...] [-s SKIP] [-l MIN] [-u MAX] [-f EVERY] [-h] DIRECTORY
//! ```
//!
//! ## Exit Status
//! - 0: every scenario ran (anomalies and lint failures are printed, not fatal)
//! - 1: usage error
//! - 2: the directory cannot be opened or is too large
//! - 3: the primitive violated its protocol

mod console_log_module;
mod diagnostics_module;
mod dir_stream_module;
mod entry_validator_module;
mod lint_error_module;
mod platform_module;
mod scenario_module;
#[cfg(test)]
mod scripted_dir_module;
mod stream_compare_module;

use std::path::PathBuf;
use std::process;

use log::info;

use diagnostics_module::Diagnostics;
use dir_stream_module::PathOpener;
use lint_error_module::{EXIT_OK, EXIT_USAGE, LintError};
use platform_module::PlatformCaps;
use scenario_module::{RunSummary, ScenarioConfig, run_scenarios};

const USAGE: &str = "\
usage: readdir_lint [-v...] [-s SKIP] [-l MIN] [-u MAX] [-f EVERY] [-h] DIRECTORY

  -v        more output (repeatable: sizes, entry pairs, raw reads)
  -s SKIP   skip the first SKIP scenarios
  -l MIN    smallest buffer size tried while probing
  -u MAX    largest buffer size tried while probing
  -f EVERY  in the fuzzy scenario, reach every EVERY-th entry by seek
  -h        print this help";

// ============================================================================
// ARGUMENT PARSING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Help,
    Run(ScenarioConfig),
}

fn usage_error(reason: impl Into<String>) -> LintError {
    LintError::Usage {
        reason: reason.into(),
    }
}

fn parse_number(flag: &str, value: Option<&String>) -> Result<usize, LintError> {
    let value = value.ok_or_else(|| usage_error(format!("{} needs a value", flag)))?;
    value
        .parse::<usize>()
        .map_err(|_| usage_error(format!("{} expects a number, got {:?}", flag, value)))
}

/// Parse the arguments after the program name.
///
/// # Errors
/// `LintError::Usage` for anything not matching the synopsis, or a probe
/// range that cannot work with the record layout of `caps`.
fn parse_args(args: &[String], caps: &PlatformCaps) -> Result<Command, LintError> {
    let mut verbosity: u8 = 0;
    let mut skip = 0;
    let mut min_probe = caps.min_probe_size();
    let mut max_probe = caps.entry_size();
    let mut fuzzy_every = scenario_module::DEFAULT_FUZZY_EVERY;
    let mut path: Option<PathBuf> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" => return Ok(Command::Help),
            "-s" => skip = parse_number("-s", iter.next())?,
            "-l" => min_probe = parse_number("-l", iter.next())?,
            "-u" => max_probe = parse_number("-u", iter.next())?,
            "-f" => fuzzy_every = parse_number("-f", iter.next())?,
            flag if flag.len() > 1 && flag.starts_with('-') => {
                if flag[1..].chars().all(|c| c == 'v') {
                    let count = u8::try_from(flag.len() - 1).unwrap_or(u8::MAX);
                    verbosity = verbosity.saturating_add(count);
                } else {
                    return Err(usage_error(format!("unknown option {}", flag)));
                }
            }
            operand => {
                if path.is_some() {
                    return Err(usage_error(format!("unexpected argument {}", operand)));
                }
                path = Some(PathBuf::from(operand));
            }
        }
    }

    let path = path.ok_or_else(|| usage_error("missing directory"))?;
    if min_probe < caps.header_size() {
        return Err(usage_error(format!(
            "MIN {} is below the {} byte record header",
            min_probe,
            caps.header_size()
        )));
    }
    if min_probe > max_probe {
        return Err(usage_error(format!("MIN {} exceeds MAX {}", min_probe, max_probe)));
    }
    if fuzzy_every == 0 {
        return Err(usage_error("EVERY must be at least 1"));
    }

    Ok(Command::Run(
        ScenarioConfig::new(&path, caps)
            .verbosity(verbosity)
            .skip(skip)
            .probe_range(min_probe, max_probe)
            .fuzzy_every(fuzzy_every),
    ))
}

// ============================================================================
// MAIN
// ============================================================================

fn print_summary(summary: &RunSummary, diag: &Diagnostics) {
    info!(
        "{} scenarios run, {} skipped, {} entries compared, {} lint failures, {} anomalies",
        summary.scenarios_run,
        summary.scenarios_skipped,
        summary.entries_compared,
        summary.lint_failures,
        summary.anomalies
    );
    if summary.is_clean() {
        info!("No anomalies found");
        return;
    }
    for (kind, count) in diag.summary() {
        info!("   {}: {}", kind, count);
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let caps = PlatformCaps::native();

    let config = match parse_args(&args, &caps) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            process::exit(EXIT_OK);
        }
        Ok(Command::Run(config)) => config,
        Err(err) => {
            eprintln!("{}", err);
            eprintln!("{}", USAGE);
            process::exit(EXIT_USAGE);
        }
    };

    console_log_module::init(config.verbosity);

    let opener = PathOpener::new(&config.path);
    info!("Checking {}", opener.path().display());
    let mut diag = Diagnostics::new();
    match run_scenarios(&opener, &caps, &config, &mut diag) {
        Ok(summary) => {
            print_summary(&summary, &diag);
            process::exit(EXIT_OK);
        }
        Err(err) => {
            eprintln!("{}", err);
            process::exit(err.exit_code());
        }
    }
}
