//! # Scenario Orchestrator (`scenario_module.rs`)
//!
//! Drives the whole check over one directory:
//!
//! 1. Reads the directory once with a huge buffer as the reference and
//!    confirms a second read reports end of directory.
//! 2. Runs the scenarios, each comparing a fresh candidate stream against
//!    the restarted reference:
//!
//! | index | scenario                                             |
//! |-------|------------------------------------------------------|
//! | 0     | fixed buffer, one page                               |
//! | 1     | fixed buffer, one block                              |
//! | 2     | fixed buffer, one maximal entry                      |
//! | 3     | smallest buffer that still yields each entry         |
//! | 4     | as 3, but every Nth entry is reached by seek         |
//!
//! A scenario that finds a lint failure stops early and the next one runs.
//! Fatal errors (open, read, seek, EOF disagreement, no buffer size that
//! works) end the run.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::diagnostics_module::{AnomalyKind, Diagnostics};
use crate::dir_stream_module::{DirOpener, DirStream, FillMode, FillOutcome};
use crate::lint_error_module::LintError;
use crate::platform_module::{
    DIRSIZE_BLOCK, DIRSIZE_MAX, DIRSIZE_PAGE, PROBE_STEP, PlatformCaps, RawDirReader,
};
use crate::stream_compare_module::{CompareOutcome, LintReport, compare, lint};

/// Every second entry is reached by seek unless configured otherwise.
pub const DEFAULT_FUZZY_EVERY: usize = 2;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Run parameters. Defaults come from the platform capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub path: PathBuf,
    pub verbosity: u8,
    /// Number of leading scenarios to skip.
    pub skip: usize,
    /// First buffer size tried while probing.
    pub min_probe: usize,
    /// Last buffer size tried while probing.
    pub max_probe: usize,
    /// In the fuzzy scenario, every `fuzzy_every`-th entry is reached by
    /// seeking to the previous entry's `d_off`.
    pub fuzzy_every: usize,
    /// Buffer size of the reference read.
    pub reference_bufsize: usize,
}

impl ScenarioConfig {
    pub fn new(path: &Path, caps: &PlatformCaps) -> Self {
        ScenarioConfig {
            path: path.to_path_buf(),
            verbosity: 0,
            skip: 0,
            min_probe: caps.min_probe_size(),
            max_probe: caps.entry_size(),
            fuzzy_every: DEFAULT_FUZZY_EVERY,
            reference_bufsize: DIRSIZE_MAX,
        }
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn probe_range(mut self, min_probe: usize, max_probe: usize) -> Self {
        self.min_probe = min_probe;
        self.max_probe = max_probe;
        self
    }

    pub fn fuzzy_every(mut self, every: usize) -> Self {
        self.fuzzy_every = every.max(1);
        self
    }

    #[cfg(test)]
    pub fn reference_bufsize(mut self, bufsize: usize) -> Self {
        self.reference_bufsize = bufsize;
        self
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Candidate reads with a fixed buffer of this many bytes.
    FixedBuffer(usize),
    /// Candidate reads each entry with the smallest buffer that works.
    MinimalBuffer,
    /// As `MinimalBuffer`, seeking by `d_off` every this many entries.
    FuzzySeek(usize),
}

/// Scenarios in execution order; positions match the `skip` count.
pub fn scenario_plan(caps: &PlatformCaps, config: &ScenarioConfig) -> Vec<Scenario> {
    vec![
        Scenario::FixedBuffer(DIRSIZE_PAGE),
        Scenario::FixedBuffer(DIRSIZE_BLOCK),
        Scenario::FixedBuffer(caps.entry_size()),
        Scenario::MinimalBuffer,
        Scenario::FuzzySeek(config.fuzzy_every),
    ]
}

/// Totals of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scenarios_run: usize,
    pub scenarios_skipped: usize,
    /// Entry pairs found equal, over all scenarios.
    pub entries_compared: usize,
    /// Scenarios that stopped on a divergence.
    pub lint_failures: usize,
    /// Recoverable anomalies, lint mismatches excluded.
    pub anomalies: u32,
    /// Per-scenario results in execution order.
    pub reports: Vec<(Scenario, LintReport)>,
}

impl RunSummary {
    /// Whether the directory passed every scenario that ran.
    pub fn is_clean(&self) -> bool {
        self.lint_failures == 0 && self.anomalies == 0
    }
}

/// Run every scenario not skipped by `config` against the directory behind
/// `opener`.
///
/// # Arguments
/// * `opener` - Source of independent readers over the directory
/// * `caps` - Record layout and comparison rules of the platform
/// * `config` - Probe range, skip count, verbosity
/// * `diag` - Receives every recoverable anomaly and lint failure
///
/// # Returns
/// The run totals. Lint failures are not errors; they are counted.
///
/// # Errors
/// Any fatal `LintError`; the run stops at the first one.
pub fn run_scenarios<O: DirOpener>(
    opener: &O,
    caps: &PlatformCaps,
    config: &ScenarioConfig,
    diag: &mut Diagnostics,
) -> Result<RunSummary, LintError> {
    let mut reference = open_reference(opener, caps, config, diag)?;
    let mut summary = RunSummary::default();

    for (index, scenario) in scenario_plan(caps, config).into_iter().enumerate() {
        if index < config.skip {
            summary.scenarios_skipped += 1;
            continue;
        }

        let report = match scenario {
            Scenario::FixedBuffer(bufsize) => {
                info!("Test buffer sizes: {} -- {}", config.reference_bufsize, bufsize);
                fixed_buffer(opener, &mut reference, caps, bufsize, config, diag)?
            }
            Scenario::MinimalBuffer => {
                info!("Test minimal buffer size");
                minimal_buffer(opener, &mut reference, caps, config, None, diag)?
            }
            Scenario::FuzzySeek(every) => {
                info!("Test fuzzy seek every {} entries", every);
                minimal_buffer(opener, &mut reference, caps, config, Some(every), diag)?
            }
        };

        summary.scenarios_run += 1;
        summary.entries_compared += report.compared;
        if report.mismatched {
            summary.lint_failures += 1;
        }
        summary.reports.push((scenario, report));
    }

    summary.anomalies = diag.anomaly_total();
    Ok(summary)
}

// ============================================================================
// REFERENCE
// ============================================================================

/// Open the reference stream and make sure one read holds the whole
/// directory.
fn open_reference<O: DirOpener>(
    opener: &O,
    caps: &PlatformCaps,
    config: &ScenarioConfig,
    diag: &mut Diagnostics,
) -> Result<DirStream<O::Reader>, LintError> {
    let bufsize = config.reference_bufsize;
    let mut reference = DirStream::open(opener, bufsize, *caps)?;
    reference.set_verbosity(config.verbosity);

    reference.fill(FillMode::Strict, diag)?;
    if reference.is_eof() {
        return Ok(reference);
    }
    match reference.fill(FillMode::Strict, diag)? {
        FillOutcome::EndOfStream => Ok(reference),
        _ => Err(LintError::DirectoryTooLarge { bufsize }),
    }
}

// ============================================================================
// SCENARIO BODIES
// ============================================================================

fn fixed_buffer<O: DirOpener>(
    opener: &O,
    reference: &mut DirStream<O::Reader>,
    caps: &PlatformCaps,
    bufsize: usize,
    config: &ScenarioConfig,
    diag: &mut Diagnostics,
) -> Result<LintReport, LintError> {
    let mut candidate = DirStream::open(opener, bufsize, *caps)?;
    candidate.set_verbosity(config.verbosity);
    reference.seek_to(0)?;
    lint(reference, &mut candidate, diag, config.verbosity)
}

/// Walk the reference entry by entry, fetching each candidate entry with
/// the smallest buffer that yields it. With `fuzzy_every`, every Nth entry
/// is skipped on the candidate by seeking to the previous `d_off`.
fn minimal_buffer<O: DirOpener>(
    opener: &O,
    reference: &mut DirStream<O::Reader>,
    caps: &PlatformCaps,
    config: &ScenarioConfig,
    fuzzy_every: Option<usize>,
    diag: &mut Diagnostics,
) -> Result<LintReport, LintError> {
    let verbosity = config.verbosity;
    let mut candidate = DirStream::open(opener, config.max_probe, *caps)?;
    candidate.set_verbosity(verbosity);

    reference.seek_to(0)?;
    reference.fill(FillMode::Strict, diag)?;

    let mut report = LintReport::default();
    let mut position = 0usize;
    while !reference.is_eof() {
        let seek_now = fuzzy_every.is_some_and(|every| every > 0 && position % every == every - 1);
        let resume = reference.current().map(|entry| entry.resume_offset);
        if let (true, Some(resume)) = (seek_now, resume) {
            candidate.seek_to(resume)?;
            reference.advance(diag)?;
            position += 1;
            if reference.is_eof() {
                break;
            }
        }

        if candidate.has_next_in_window() {
            candidate.advance(diag)?;
        } else {
            probe_next_entry(&mut candidate, config, diag)?;
        }

        match compare(reference, &candidate, diag, verbosity)? {
            CompareOutcome::Equal => report.compared += 1,
            CompareOutcome::BothAtEnd => return Ok(report),
            CompareOutcome::Mismatch => {
                report.mismatched = true;
                return Ok(report);
            }
        }
        reference.advance(diag)?;
        position += 1;
    }

    confirm_candidate_end(reference, &mut candidate, config, diag)?;
    Ok(report)
}

/// Find the smallest buffer, from `min_probe` up in `PROBE_STEP` steps,
/// for which a read at the candidate's position delivers an entry.
///
/// # Errors
/// `LintError::NoSufficientBuffer` if no size up to `max_probe` works.
fn probe_next_entry<R: RawDirReader>(
    candidate: &mut DirStream<R>,
    config: &ScenarioConfig,
    diag: &mut Diagnostics,
) -> Result<(), LintError> {
    let start = candidate.current_offset()?;

    let mut bufsize = config.min_probe;
    while bufsize <= config.max_probe {
        candidate.discard_window();
        candidate.set_bufsize(bufsize)?;

        if let FillOutcome::Filled(_) = candidate.fill(FillMode::Probe, diag)? {
            if let Some(entry) = candidate.current() {
                debug!(
                    "   min size {:08x} ({} of {} bytes) {}",
                    entry.resume_offset,
                    entry.record_len,
                    bufsize,
                    entry.display_name()
                );
            }
            return Ok(());
        }

        let now = candidate.current_offset()?;
        if now != start {
            diag.report(
                AnomalyKind::OffsetMovedWithoutData,
                format_args!(
                    "Directory offset changed but no data read: {} -- {} ({} bytes)",
                    start, now, bufsize
                ),
            );
        }
        bufsize += PROBE_STEP;
    }

    Err(LintError::NoSufficientBuffer {
        offset: start,
        ceiling: config.max_probe,
    })
}

/// The reference is exhausted: the candidate must have nothing left either.
fn confirm_candidate_end<A, B>(
    reference: &DirStream<A>,
    candidate: &mut DirStream<B>,
    config: &ScenarioConfig,
    diag: &mut Diagnostics,
) -> Result<(), LintError>
where
    A: RawDirReader,
    B: RawDirReader,
{
    if candidate.has_next_in_window() {
        candidate.advance(diag)?;
    } else {
        candidate.discard_window();
        candidate.set_bufsize(config.max_probe)?;
        candidate.fill(FillMode::Strict, diag)?;
    }
    compare(reference, candidate, diag, config.verbosity).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform_module::RecordLayout;
    use crate::scripted_dir_module::{ScriptFaults, ScriptedDir, entries_with_dots};

    fn linux_dir(names: &[&str]) -> ScriptedDir {
        ScriptedDir::new(RecordLayout::LinuxDirent64, entries_with_dots(names))
    }

    fn run(dir: &ScriptedDir, caps: PlatformCaps, config: ScenarioConfig) -> (Result<RunSummary, LintError>, Diagnostics) {
        let mut diag = Diagnostics::new();
        let result = run_scenarios(dir, &caps, &config, &mut diag);
        (result, diag)
    }

    fn default_config(caps: &PlatformCaps) -> ScenarioConfig {
        ScenarioConfig::new(Path::new("scripted"), caps)
    }

    fn report_for(summary: &RunSummary, scenario: Scenario) -> LintReport {
        summary
            .reports
            .iter()
            .find(|(seen, _)| *seen == scenario)
            .map(|(_, report)| *report)
            .expect("scenario ran")
    }

    #[test]
    fn test_config_defaults_follow_caps() {
        let caps = PlatformCaps::linux();
        let config = default_config(&caps);
        assert_eq!(config.min_probe, 28);
        assert_eq!(config.max_probe, 280);
        assert_eq!(config.fuzzy_every, DEFAULT_FUZZY_EVERY);
        assert_eq!(config.reference_bufsize, DIRSIZE_MAX);
        assert_eq!(config.fuzzy_every(0).fuzzy_every, 1);
    }

    #[test]
    fn test_clean_directory_passes_every_scenario() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a", "bb", "ccc"]);
        let (result, diag) = run(&dir, caps, default_config(&caps).verbosity(2));
        let summary = result.expect("run");

        assert_eq!(summary.scenarios_run, 5);
        assert!(summary.is_clean());
        assert!(diag.summary().is_empty());
        assert_eq!(
            report_for(&summary, Scenario::FixedBuffer(DIRSIZE_PAGE)),
            LintReport { compared: 5, mismatched: false }
        );
        assert_eq!(report_for(&summary, Scenario::MinimalBuffer).compared, 5);
        // ".." and "bb" are reached by seek and not compared themselves
        assert_eq!(report_for(&summary, Scenario::FuzzySeek(2)).compared, 3);
    }

    #[test]
    fn test_bsd_zero_length_probes_are_not_anomalies() {
        let caps = PlatformCaps::bsd();
        let dir = ScriptedDir::new(RecordLayout::BsdDirent, entries_with_dots(&["a", "some_longer_name"]));
        let (result, diag) = run(&dir, caps, default_config(&caps));
        let summary = result.expect("run");

        assert_eq!(summary.lint_failures, 0);
        assert_eq!(diag.count(AnomalyKind::OffsetMovedWithoutData), 0);
        assert_eq!(report_for(&summary, Scenario::MinimalBuffer).compared, 4);
    }

    #[test]
    fn test_skip_runs_only_trailing_scenarios() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a"]);
        let (result, _) = run(&dir, caps, default_config(&caps).skip(3));
        let summary = result.expect("run");

        assert_eq!(summary.scenarios_skipped, 3);
        assert_eq!(summary.scenarios_run, 2);
        assert_eq!(summary.reports[0].0, Scenario::MinimalBuffer);
    }

    #[test]
    fn test_directory_larger_than_reference_buffer_is_fatal() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a", "bb", "ccc", "dddd"]);
        let (result, _) = run(&dir, caps, default_config(&caps).reference_bufsize(64));

        assert!(matches!(
            result,
            Err(LintError::DirectoryTooLarge { bufsize: 64 })
        ));
    }

    #[test]
    fn test_drift_on_too_small_buffer_is_reported() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a_rather_long_name_for_probing", "b"]).with_faults(ScriptFaults {
            drift_on_too_small: true,
            ..ScriptFaults::default()
        });
        let (result, diag) = run(&dir, caps, default_config(&caps));
        let summary = result.expect("run");

        assert!(diag.count(AnomalyKind::OffsetMovedWithoutData) >= 1);
        assert!(report_for(&summary, Scenario::MinimalBuffer).mismatched);
        assert!(summary.lint_failures >= 1);
        assert!(!report_for(&summary, Scenario::FixedBuffer(DIRSIZE_BLOCK)).mismatched);
    }

    #[test]
    fn test_probe_ceiling_below_entry_size_is_fatal() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a_rather_long_name_for_probing"]);
        let config = default_config(&caps).skip(3).probe_range(28, 40);
        let (result, _) = run(&dir, caps, config);

        assert!(matches!(
            result,
            Err(LintError::NoSufficientBuffer { offset: 2, ceiling: 40 })
        ));
    }

    #[test]
    fn test_overreported_length_is_buffer_overflow() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a"]).with_faults(ScriptFaults {
            overreport_bytes: 1 << 21,
            ..ScriptFaults::default()
        });
        let (result, diag) = run(&dir, caps, default_config(&caps));
        let summary = result.expect("run");

        assert!(diag.count(AnomalyKind::BufferOverflow) >= 1);
        assert!(summary.anomalies >= 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_wrong_terminal_offset_fails_seeking_scenarios() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a", "bb", "ccc"]).with_faults(ScriptFaults {
            wrong_terminal_offset: true,
            ..ScriptFaults::default()
        });
        let (result, diag) = run(&dir, caps, default_config(&caps));
        let summary = result.expect("run");

        assert!(diag.count(AnomalyKind::ResumeOffsetMismatch) >= 1);
        assert!(summary.anomalies >= 1);
        assert!(report_for(&summary, Scenario::MinimalBuffer).mismatched);
    }

    #[test]
    fn test_truncated_candidate_is_eof_mismatch() {
        let caps = PlatformCaps::linux();
        let reference = linux_dir(&["a", "bb"]);
        let mut diag = Diagnostics::new();
        let config = default_config(&caps);
        let mut stream = open_reference(&reference, &caps, &config, &mut diag).expect("reference");

        let short = reference.clone().with_faults(ScriptFaults {
            stop_at: Some(2),
            ..ScriptFaults::default()
        });
        let err = fixed_buffer(&short, &mut stream, &caps, DIRSIZE_BLOCK, &config, &mut diag)
            .expect_err("candidate ends early");
        assert!(matches!(err, LintError::EofMismatch { eof_b: true, .. }));
    }

    #[test]
    fn test_probe_window_with_two_entries_is_consumed_in_place() {
        let caps = PlatformCaps::linux();
        let dir = linux_dir(&["a", "bb", "ccc"]);
        // 64 bytes hold two 24 byte records, so each probe yields a pair.
        let config = default_config(&caps).skip(3).probe_range(64, 280);
        let (result, diag) = run(&dir, caps, config);
        let summary = result.expect("run");

        assert!(summary.is_clean());
        assert_eq!(diag.count(AnomalyKind::LintMismatch), 0);
        assert_eq!(
            report_for(&summary, Scenario::MinimalBuffer),
            LintReport { compared: 5, mismatched: false }
        );
        assert_eq!(report_for(&summary, Scenario::FuzzySeek(2)).compared, 3);
    }

    #[test]
    fn test_candidate_entries_left_after_reference_end_is_eof_mismatch() {
        let caps = PlatformCaps::linux();
        let full = linux_dir(&["a", "bb", "ccc"]);
        let short = full.clone().with_faults(ScriptFaults {
            stop_at: Some(4),
            ..ScriptFaults::default()
        });
        let mut diag = Diagnostics::new();
        // 72 bytes hold three records: the window holding "bb" also holds "ccc".
        let config = default_config(&caps).probe_range(72, 280);
        let mut reference = open_reference(&short, &caps, &config, &mut diag).expect("reference");

        let err = minimal_buffer(&full, &mut reference, &caps, &config, None, &mut diag)
            .expect_err("candidate has a surplus entry");

        assert!(matches!(
            err,
            LintError::EofMismatch {
                eof_a: true,
                eof_b: false,
                ..
            }
        ));
        assert_eq!(diag.count(AnomalyKind::LintMismatch), 0);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_real_directory_passes_every_scenario() {
        use crate::dir_stream_module::PathOpener;

        let tmp = tempfile::tempdir().expect("tempdir");
        for name in ["a", "bb", "ccc"] {
            std::fs::write(tmp.path().join(name), b"x").expect("create file");
        }
        std::fs::create_dir(tmp.path().join("sub")).expect("create dir");

        let caps = PlatformCaps::linux();
        let opener = PathOpener::new(tmp.path());
        let config = ScenarioConfig::new(tmp.path(), &caps).verbosity(1);
        let mut diag = Diagnostics::new();
        let summary = run_scenarios(&opener, &caps, &config, &mut diag).expect("run");

        assert_eq!(summary.scenarios_run, 5);
        assert_eq!(summary.lint_failures, 0);
        assert_eq!(diag.count(AnomalyKind::InvalidEntrySize), 0);
        assert_eq!(diag.count(AnomalyKind::BufferOverflow), 0);
        assert_eq!(report_for(&summary, Scenario::MinimalBuffer).compared, 6);
    }
}
