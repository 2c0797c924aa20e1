use crate::capture;
use crate::coverage::CoverageSinks;
use crate::engine::LIBFUZZER_ERROR_EXIT_CODE;
use crate::finding::Finding;
use crate::target::TearDown;
use tracing::info;

/// Kind of the finding built from an error returned by the teardown hook.
pub const TEAR_DOWN_ERROR_KIND: &str = "TearDownError";

/// Why shutdown could not complete cleanly. Both cases come from user code and
/// are reported as findings.
#[derive(Debug)]
pub enum ShutdownFailure {
    TearDownPanicked(Finding),
    /// The teardown hook returned an error instead of panicking.
    TearDownFailed(anyhow::Error),
}

impl ShutdownFailure {
    pub fn exit_code(&self) -> i32 {
        LIBFUZZER_ERROR_EXIT_CODE
    }

    pub fn into_finding(self) -> Finding {
        match self {
            ShutdownFailure::TearDownPanicked(finding) => finding,
            ShutdownFailure::TearDownFailed(e) => {
                Finding::bare(TEAR_DOWN_ERROR_KIND, format!("{e:#}"))
            }
        }
    }
}

/// Flushes coverage and tears the target down, at most once per runner.
pub struct ShutdownCoordinator {
    done: bool,
    coverage: CoverageSinks,
    tear_down: Option<TearDown>,
}

impl ShutdownCoordinator {
    pub fn new(coverage: CoverageSinks, tear_down: Option<TearDown>) -> Self {
        Self {
            done: false,
            coverage,
            tear_down,
        }
    }

    pub fn has_run(&self) -> bool {
        self.done
    }

    /// Later calls return `Ok(())` without doing anything.
    pub fn run(&mut self) -> Result<(), ShutdownFailure> {
        if self.done {
            return Ok(());
        }
        self.done = true;

        self.coverage.flush();

        let Some(tear_down) = self.tear_down.take() else {
            return Ok(());
        };
        info!("calling fuzzer_tear_down function");
        match capture::catch_finding(|| capture::target_boundary_hook(&|| tear_down())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ShutdownFailure::TearDownFailed(e)),
            Err(finding) => Err(ShutdownFailure::TearDownPanicked(finding)),
        }
    }
}
