use crate::config::{ConfigError, HarnessConfig};
use crate::coverage::{CoverageRecorder, CoverageSinks};
use crate::dedup::{Classified, Classifier, FindingNormalizer, IgnoreSet, InjectedFrameStripper};
use crate::diagnostics::{
    CRASHING_INPUT_HEADER, Diagnostics, FINDING_HEADER, INITIALIZE_HEADER, TEAR_DOWN_HEADER,
};
use crate::engine::{GENERIC_ERROR_EXIT_CODE, LIBFUZZER_ERROR_EXIT_CODE, NativeEngine};
use crate::executor::InProcessExecutor;
use crate::finding::Finding;
use crate::keep_going::{Admission, Decision, KeepGoing};
use crate::reproducer::ReproducerGenerator;
use crate::shutdown::ShutdownCoordinator;
use crate::target::FuzzTarget;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("fuzzer_initialize panicked: {}", .0.message)]
    Initialize(Finding),
}

impl RunnerError {
    pub fn exit_code(&self) -> i32 {
        GENERIC_ERROR_EXIT_CODE
    }
}

pub struct RunnerBuilder<E: NativeEngine> {
    target: FuzzTarget,
    config: HarnessConfig,
    engine: E,
    diagnostics: Option<Diagnostics>,
    coverage: Option<Box<dyn CoverageRecorder>>,
    normalizer: Option<Box<dyn FindingNormalizer>>,
}

impl<E: NativeEngine> RunnerBuilder<E> {
    /// Streams for finding reports. Defaults to stderr and stdout.
    pub fn diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn coverage(mut self, recorder: impl CoverageRecorder + 'static) -> Self {
        self.coverage = Some(Box::new(recorder));
        self
    }

    /// Replaces the stock [`InjectedFrameStripper`]. Only used when hooks are enabled.
    pub fn normalizer(mut self, normalizer: impl FindingNormalizer + 'static) -> Self {
        self.normalizer = Some(Box::new(normalizer));
        self
    }

    /// Validates the configuration and initializes the target.
    pub fn build(self) -> Result<FuzzTargetRunner<E>, RunnerError> {
        let Self {
            mut target,
            config,
            engine,
            diagnostics,
            coverage,
            normalizer,
        } = self;

        config.validate()?;
        let dedup = config.effective_dedup();
        if dedup && !config.dedup {
            warn!("Deduplication enabled because keep-going or ignore is set");
        }
        let keep_going = KeepGoing::new(
            config.keep_going,
            IgnoreSet::with_tokens(config.ignored_tokens()?),
        );

        info!(
            fuzz_target = %target.name(),
            mode = %target.mode(),
            keep_going = config.keep_going,
            dedup,
            "Using fuzz target"
        );

        let mut diagnostics = diagnostics.unwrap_or_default();
        if let Err(finding) = target.initialize(&config.target_args) {
            diagnostics.finding(INITIALIZE_HEADER, &finding);
            diagnostics.flush();
            return Err(RunnerError::Initialize(finding));
        }
        // Reports made while initializing do not belong to any input.
        target.reporter().take();

        let configured = |path: &Option<PathBuf>| {
            path.clone().filter(|path| !path.as_os_str().is_empty())
        };
        let mut coverage = CoverageSinks::new(
            coverage,
            configured(&config.coverage_dump),
            configured(&config.coverage_report),
        );
        if config.hooks {
            coverage.record_startup_coverage();
        }

        let normalizer = config.hooks.then(|| {
            normalizer.unwrap_or_else(|| {
                Box::new(InjectedFrameStripper::new()) as Box<dyn FindingNormalizer>
            })
        });

        let tear_down = target.take_tear_down();
        Ok(FuzzTargetRunner {
            executor: InProcessExecutor::new(target),
            classifier: Classifier::new(dedup, normalizer),
            keep_going,
            reproducers: ReproducerGenerator::new(config.reproducer_path),
            shutdown: ShutdownCoordinator::new(coverage, tear_down),
            diagnostics,
            engine,
        })
    }
}

/// Drives a fuzz target one input at a time on behalf of a native engine.
///
/// Dropping the runner shuts it down: coverage is flushed and the teardown hook runs,
/// unless a terminating finding already did so.
pub struct FuzzTargetRunner<E: NativeEngine> {
    executor: InProcessExecutor,
    classifier: Classifier,
    keep_going: KeepGoing,
    reproducers: ReproducerGenerator,
    shutdown: ShutdownCoordinator,
    diagnostics: Diagnostics,
    engine: E,
}

impl<E: NativeEngine> FuzzTargetRunner<E> {
    pub fn builder(target: FuzzTarget, config: HarnessConfig, engine: E) -> RunnerBuilder<E> {
        RunnerBuilder {
            target,
            config,
            engine,
            diagnostics: None,
            coverage: None,
            normalizer: None,
        }
    }

    pub fn new(target: FuzzTarget, config: HarnessConfig, engine: E) -> Result<Self, RunnerError> {
        Self::builder(target, config, engine).build()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn target(&self) -> &FuzzTarget {
        self.executor.target()
    }

    /// Distinct findings so far, counting ignored tokens.
    pub fn distinct_findings(&self) -> usize {
        self.keep_going.distinct_findings()
    }

    /// Runs one input. Returns `0` so the engine carries on; a finding that ends the
    /// run exits the process through [`NativeEngine::hard_exit`] instead.
    pub fn run_one(&mut self, data: &[u8]) -> i32 {
        let Some(finding) = self.executor.execute(data).into_finding() else {
            return 0;
        };
        let Classified { finding, token } = self.classifier.classify(finding);
        let dedup = self.classifier.dedup_enabled();
        if dedup && self.keep_going.admit(token) == Admission::Suppress {
            debug!("Skipping duplicate finding with dedup token {token:016x}");
            return 0;
        }

        self.diagnostics.finding(FINDING_HEADER, &finding);
        if dedup {
            self.diagnostics.dedup_token(token);
        }
        self.diagnostics.error_line(CRASHING_INPUT_HEADER);
        self.diagnostics.flush();
        self.engine.print_crashing_input();

        if let Err(e) = self.reproducers.generate(&mut self.executor, data) {
            self.diagnostics
                .error_line(format_args!("ERROR: Failed to create reproducer: {e}"));
            self.terminate(GENERIC_ERROR_EXIT_CODE);
        }

        if self.keep_going.after_report() == Decision::Terminate {
            self.shutdown();
            self.terminate(LIBFUZZER_ERROR_EXIT_CODE);
        }
        0
    }

    /// Flushes coverage and runs the teardown hook. Does nothing the second time.
    pub fn shutdown(&mut self) {
        if self.shutdown.has_run() {
            return;
        }
        info!(
            distinct_findings = self.keep_going.distinct_findings(),
            "Shutting down fuzz target"
        );
        let Err(failure) = self.shutdown.run() else {
            return;
        };
        let code = failure.exit_code();
        self.diagnostics.finding(TEAR_DOWN_HEADER, &failure.into_finding());
        self.terminate(code);
    }

    fn terminate(&mut self, code: i32) -> ! {
        self.diagnostics.flush();
        self.engine.hard_exit(code)
    }
}

impl<E: NativeEngine> Drop for FuzzTargetRunner<E> {
    fn drop(&mut self) {
        if !std::thread::panicking() && !self.shutdown.has_run() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::SharedCoverageMap;
    use crate::diagnostics::SharedBuffer;
    use crate::finding::FindingReporter;
    use crate::reproducer::{ReproducerArtifact, content_hash};
    use std::panic::{self, AssertUnwindSafe};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};

    /// Payload `RecordingEngine::hard_exit` unwinds with.
    #[derive(Debug)]
    struct HardExit(i32);

    #[derive(Default)]
    struct RecordingEngine {
        crashing_inputs: usize,
    }

    impl NativeEngine for RecordingEngine {
        fn print_crashing_input(&mut self) {
            self.crashing_inputs += 1;
        }

        fn hard_exit(&mut self, code: i32) -> ! {
            panic::resume_unwind(Box::new(HardExit(code)))
        }
    }

    fn exit_code_of(f: impl FnOnce()) -> Option<i32> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => None,
            Err(payload) => match payload.downcast::<HardExit>() {
                Ok(exit) => Some(exit.0),
                Err(payload) => panic::resume_unwind(payload),
            },
        }
    }

    fn distinct_crashes(data: &[u8]) {
        match data.first() {
            Some(1) => panic!("crash one"),
            Some(2) => panic!("crash two"),
            Some(3) => panic!("crash three"),
            Some(4) => panic!("crash four"),
            Some(5) => panic!("crash five"),
            _ => {}
        }
    }

    struct Harness {
        err: SharedBuffer,
        out: SharedBuffer,
        dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                err: SharedBuffer::default(),
                out: SharedBuffer::default(),
                dir: tempdir().unwrap(),
            }
        }

        fn config(&self, keep_going: u64) -> HarnessConfig {
            HarnessConfig {
                keep_going,
                reproducer_path: self.dir.path().to_path_buf(),
                ..Default::default()
            }
        }

        fn diagnostics(&self) -> Diagnostics {
            Diagnostics::new(Box::new(self.err.clone()), Box::new(self.out.clone()))
        }

        fn runner(
            &self,
            target: FuzzTarget,
            config: HarnessConfig,
        ) -> FuzzTargetRunner<RecordingEngine> {
            FuzzTargetRunner::builder(target, config, RecordingEngine::default())
                .diagnostics(self.diagnostics())
                .build()
                .unwrap()
        }

        fn reports(&self) -> usize {
            self.err.contents().matches(FINDING_HEADER).count()
        }
    }

    fn target(f: fn(&[u8])) -> FuzzTarget {
        FuzzTarget::builder("app::fuzz")
            .bytes(f)
            .reporter(FindingReporter::new())
            .build()
            .unwrap()
    }

    #[test]
    fn budget_of_three_stops_after_third_distinct_finding() {
        let harness = Harness::new();
        let mut runner = harness.runner(target(distinct_crashes), harness.config(3));

        let mut exits = Vec::new();
        for input in 1..=5u8 {
            let exit = exit_code_of(|| {
                assert_eq!(runner.run_one(&[input]), 0);
            });
            if let Some(code) = exit {
                exits.push((input, code));
                break;
            }
        }

        assert_eq!(exits, vec![(3, LIBFUZZER_ERROR_EXIT_CODE)]);
        assert_eq!(harness.reports(), 3);
        assert_eq!(runner.engine().crashing_inputs, 3);
        assert_eq!(harness.out.contents().matches("DEDUP_TOKEN: ").count(), 3);
    }

    #[test]
    fn two_distinct_tokens_never_exhaust_budget_of_three() {
        let harness = Harness::new();
        let mut runner = harness.runner(target(distinct_crashes), harness.config(3));

        for input in [1u8, 2, 1, 2, 1] {
            assert_eq!(exit_code_of(|| assert_eq!(runner.run_one(&[input]), 0)), None);
        }
        assert_eq!(harness.reports(), 2);
        assert_eq!(runner.distinct_findings(), 2);
    }

    #[test]
    fn resumed_unwinds_with_different_messages_are_distinct() {
        fn resumed_crashes(data: &[u8]) {
            match data.first() {
                Some(1) => panic::resume_unwind(Box::new("decoder overflow")),
                Some(2) => panic::resume_unwind(Box::new("checksum mismatch")),
                _ => {}
            }
        }
        let harness = Harness::new();
        let mut runner = harness.runner(target(resumed_crashes), harness.config(5));

        for input in [1u8, 2, 1, 2] {
            assert_eq!(exit_code_of(|| assert_eq!(runner.run_one(&[input]), 0)), None);
        }
        assert_eq!(harness.reports(), 2);
        assert_eq!(runner.distinct_findings(), 2);
    }

    #[test]
    fn duplicate_is_suppressed_silently() {
        let harness = Harness::new();
        let mut runner = harness.runner(target(distinct_crashes), harness.config(2));

        assert_eq!(runner.run_one(&[4]), 0);
        let after_first = harness.err.contents();
        assert_eq!(runner.run_one(&[4]), 0);

        assert_eq!(harness.err.contents(), after_first, "duplicate must not print");
        assert_eq!(runner.engine().crashing_inputs, 1);
    }

    #[test]
    fn first_finding_terminates_with_default_budget() {
        let harness = Harness::new();
        let mut runner = harness.runner(target(distinct_crashes), harness.config(1));

        assert_eq!(exit_code_of(|| assert_eq!(runner.run_one(&[0]), 0)), None);
        assert_eq!(
            exit_code_of(|| {
                runner.run_one(&[5]);
            }),
            Some(LIBFUZZER_ERROR_EXIT_CODE)
        );

        let err = harness.err.contents();
        assert!(err.starts_with("\n== Rust Panic: panic: crash five\n"), "got: {err}");
        assert!(err.contains(CRASHING_INPUT_HEADER));
        let token = harness.out.contents();
        assert!(token.starts_with("DEDUP_TOKEN: ") && token.trim_end().len() == 29);
    }

    #[test]
    fn disabled_dedup_prints_no_token() {
        let harness = Harness::new();
        let config = HarnessConfig {
            dedup: false,
            ..harness.config(1)
        };
        let mut runner = harness.runner(target(distinct_crashes), config);

        assert_eq!(
            exit_code_of(|| {
                runner.run_one(&[1]);
            }),
            Some(LIBFUZZER_ERROR_EXIT_CODE)
        );
        assert!(harness.out.contents().is_empty());
    }

    #[test]
    fn preloaded_ignore_token_is_never_reported() {
        let harness = Harness::new();
        let mut first_run = harness.runner(target(distinct_crashes), harness.config(5));
        first_run.run_one(&[2]);
        let out = harness.out.contents();
        let token = out.trim().trim_start_matches("DEDUP_TOKEN: ").to_string();
        drop(first_run);

        let harness = Harness::new();
        let config = HarnessConfig {
            ignore: vec![token],
            ..harness.config(2)
        };
        let mut runner = harness.runner(target(distinct_crashes), config);
        assert_eq!(runner.run_one(&[2]), 0);
        assert_eq!(harness.reports(), 0);
        assert_eq!(
            exit_code_of(|| {
                runner.run_one(&[3]);
            }),
            Some(LIBFUZZER_ERROR_EXIT_CODE),
            "ignored token counts towards the budget"
        );
    }

    #[test]
    fn explicit_report_is_a_finding_and_next_input_continues() {
        let harness = Harness::new();
        let reporter = FindingReporter::new();
        let channel = reporter.clone();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(move |data| {
                if data == b"../etc/passwd" {
                    channel.report(Finding::bare("SecurityIssue", "path traversal"));
                }
            })
            .reporter(reporter)
            .build()
            .unwrap();
        let mut runner = harness.runner(target, harness.config(2));

        assert_eq!(runner.run_one(b"../etc/passwd"), 0);
        assert!(harness
            .err
            .contents()
            .contains("== Rust Panic: SecurityIssue: path traversal\n"));
        assert_eq!(runner.run_one(b"index.html"), 0);
        assert_eq!(harness.reports(), 1);
    }

    #[test]
    fn reproducer_is_written_for_each_report() {
        let harness = Harness::new();
        let mut runner = harness.runner(target(distinct_crashes), harness.config(2));
        runner.run_one(&[1, 0xAA]);

        let path = harness
            .dir
            .path()
            .join(format!("Crash_{}.rs", content_hash(&[1, 0xAA])));
        let artifact = ReproducerArtifact::read_from(&path).unwrap();
        let finding = artifact.replay(runner.target()).unwrap().expect("reproduces");
        assert_eq!(finding.message, "crash one");
    }

    #[test]
    fn unencodable_reproducer_exits_with_generic_code() {
        struct FailingAutofuzz;
        impl crate::target::AutofuzzReproducer for FailingAutofuzz {
            fn dump_reproducer(
                &self,
                _provider: &mut dyn crate::provider::FuzzedDataProvider,
                _dir: &Path,
                _content_hash: &str,
            ) -> anyhow::Result<()> {
                anyhow::bail!("cannot express argument")
            }
        }

        let harness = Harness::new();
        let target = FuzzTarget::builder("app::autofuzz")
            .provider(|provider| {
                if provider.consume_bool() {
                    panic!("autofuzz crash");
                }
            })
            .autofuzz(FailingAutofuzz)
            .reporter(FindingReporter::new())
            .build()
            .unwrap();
        let mut runner = harness.runner(target, harness.config(1));

        assert_eq!(
            exit_code_of(|| {
                runner.run_one(&[1]);
            }),
            Some(GENERIC_ERROR_EXIT_CODE)
        );
        assert!(harness
            .err
            .contents()
            .contains("ERROR: Failed to create reproducer: "));
    }

    #[test]
    fn initialize_panic_is_a_startup_failure() {
        let harness = Harness::new();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(|_| {})
            .initialize(|| panic!("fixture missing"))
            .reporter(FindingReporter::new())
            .build()
            .unwrap();

        let err = FuzzTargetRunner::builder(target, harness.config(1), RecordingEngine::default())
            .diagnostics(harness.diagnostics())
            .build()
            .err()
            .expect("initialize panicked");
        assert!(matches!(err, RunnerError::Initialize(_)));
        assert_eq!(err.exit_code(), GENERIC_ERROR_EXIT_CODE);
        assert!(harness
            .err
            .contents()
            .starts_with("\n== Rust Panic in fuzzer_initialize: panic: fixture missing\n"));
    }

    #[test]
    fn invalid_config_is_a_startup_failure() {
        let harness = Harness::new();
        let err = FuzzTargetRunner::new(
            target(distinct_crashes),
            harness.config(0),
            RecordingEngine::default(),
        )
        .err()
        .expect("zero budget is rejected");
        assert!(matches!(err, RunnerError::Config(ConfigError::ZeroKeepGoing)));
        assert_eq!(err.exit_code(), GENERIC_ERROR_EXIT_CODE);
    }

    #[test]
    fn tear_down_panic_exits_with_finding_code() {
        let harness = Harness::new();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(|_| {})
            .tear_down(|| -> anyhow::Result<()> { panic!("cleanup exploded") })
            .reporter(FindingReporter::new())
            .build()
            .unwrap();
        let mut runner = harness.runner(target, harness.config(1));

        assert_eq!(exit_code_of(|| runner.shutdown()), Some(LIBFUZZER_ERROR_EXIT_CODE));
        assert!(harness
            .err
            .contents()
            .contains("== Rust Panic in fuzzer_tear_down: panic: cleanup exploded\n"));
    }

    #[test]
    fn tear_down_error_is_reported_as_a_finding() {
        let harness = Harness::new();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(|_| {})
            .tear_down(|| anyhow::bail!("lock file busy"))
            .reporter(FindingReporter::new())
            .build()
            .unwrap();
        let mut runner = harness.runner(target, harness.config(1));

        assert_eq!(exit_code_of(|| runner.shutdown()), Some(LIBFUZZER_ERROR_EXIT_CODE));
        assert!(harness
            .err
            .contents()
            .contains("== Rust Panic in fuzzer_tear_down: TearDownError: lock file busy\n"));
    }

    #[test]
    fn shutdown_runs_once_across_both_exit_paths() {
        let harness = Harness::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(distinct_crashes)
            .tear_down(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .reporter(FindingReporter::new())
            .build()
            .unwrap();
        let mut runner = harness.runner(target, harness.config(1));

        assert_eq!(
            exit_code_of(|| {
                runner.run_one(&[1]);
            }),
            Some(LIBFUZZER_ERROR_EXIT_CODE)
        );
        runner.shutdown();
        drop(runner);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_the_runner_shuts_down() {
        let harness = Harness::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(|_| {})
            .tear_down(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .reporter(FindingReporter::new())
            .build()
            .unwrap();

        let mut runner = harness.runner(target, harness.config(1));
        runner.run_one(b"fine");
        drop(runner);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn startup_coverage_is_recorded_after_initialize() {
        let harness = Harness::new();
        let coverage = SharedCoverageMap::new();
        let marks = coverage.clone();
        let target = FuzzTarget::builder("app::fuzz")
            .bytes(|_| {})
            .initialize(move || marks.mark(7))
            .reporter(FindingReporter::new())
            .build()
            .unwrap();
        let config = HarnessConfig {
            coverage_dump: Some(harness.dir.path().join("coverage.json")),
            ..harness.config(1)
        };

        let runner = FuzzTargetRunner::builder(target, config, RecordingEngine::default())
            .diagnostics(harness.diagnostics())
            .coverage(coverage.clone())
            .build()
            .unwrap();
        assert_eq!(coverage.startup_ids(), vec![7]);
        drop(runner);

        let dump = std::fs::read_to_string(harness.dir.path().join("coverage.json")).unwrap();
        assert_eq!(dump, "[7]");
    }

    #[test]
    fn normalizer_runs_only_with_hooks_enabled() {
        fn wrapped(_data: &[u8]) {
            let inner = Finding::bare("Inner", "boom");
            panic::panic_any(Finding::bare("HookWrapper", "sanitizer").with_cause(inner));
        }
        let stripper = || InjectedFrameStripper::new().unwrap_kind("HookWrapper");

        let harness = Harness::new();
        let config = harness.config(2);
        let mut runner =
            FuzzTargetRunner::builder(target(wrapped), config, RecordingEngine::default())
                .diagnostics(harness.diagnostics())
                .normalizer(stripper())
                .build()
                .unwrap();
        runner.run_one(b"x");
        assert!(harness.err.contents().contains("== Rust Panic: Inner: boom\n"));

        let harness = Harness::new();
        let config = HarnessConfig {
            hooks: false,
            ..harness.config(2)
        };
        let mut runner =
            FuzzTargetRunner::builder(target(wrapped), config, RecordingEngine::default())
                .diagnostics(harness.diagnostics())
                .normalizer(stripper())
                .build()
                .unwrap();
        runner.run_one(b"x");
        assert!(harness.err.contents().contains("== Rust Panic: HookWrapper: sanitizer\n"));
    }
}
