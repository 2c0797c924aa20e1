use anyhow::Context;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// Source of coverage information that can be flushed at shutdown.
pub trait CoverageRecorder: Send {
    /// Ids of every coverage point hit so far, sorted.
    fn ever_covered_ids(&self) -> Vec<u32>;

    fn dump_coverage(&self, ids: &[u32], path: &Path) -> anyhow::Result<()>;

    fn dump_report(&self, ids: &[u32], path: &Path) -> anyhow::Result<()>;

    /// Snapshots coverage collected while the target was initializing.
    fn record_startup_coverage(&mut self) {}
}

/// Coverage map shared between the target, which marks ids, and the harness.
#[derive(Debug, Clone, Default)]
pub struct SharedCoverageMap {
    covered: Arc<Mutex<BTreeSet<u32>>>,
    startup: Arc<Mutex<BTreeSet<u32>>>,
}

impl SharedCoverageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, id: u32) {
        self.covered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    /// Ids that were already covered when startup coverage was recorded.
    pub fn startup_ids(&self) -> Vec<u32> {
        self.startup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl CoverageRecorder for SharedCoverageMap {
    fn ever_covered_ids(&self) -> Vec<u32> {
        self.covered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    fn dump_coverage(&self, ids: &[u32], path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string(ids)?;
        fs::write(path, json).with_context(|| format!("writing coverage dump {}", path.display()))
    }

    fn dump_report(&self, ids: &[u32], path: &Path) -> anyhow::Result<()> {
        let startup = self.startup_ids();
        let mut report = String::new();
        writeln!(report, "Covered ids: {}", ids.len())?;
        writeln!(report, "Covered during startup: {}", startup.len())?;
        for id in ids {
            let marker = if startup.binary_search(id).is_ok() { " (startup)" } else { "" };
            writeln!(report, "{id}{marker}")?;
        }
        fs::write(path, report)
            .with_context(|| format!("writing coverage report {}", path.display()))
    }

    fn record_startup_coverage(&mut self) {
        let covered = self.ever_covered_ids();
        *self.startup.lock().unwrap_or_else(PoisonError::into_inner) = covered.into_iter().collect();
    }
}

/// A recorder plus the sinks configured for it.
#[derive(Default)]
pub struct CoverageSinks {
    recorder: Option<Box<dyn CoverageRecorder>>,
    dump: Option<PathBuf>,
    report: Option<PathBuf>,
}

impl CoverageSinks {
    pub fn new(
        recorder: Option<Box<dyn CoverageRecorder>>,
        dump: Option<PathBuf>,
        report: Option<PathBuf>,
    ) -> Self {
        Self {
            recorder,
            dump,
            report,
        }
    }

    pub fn record_startup_coverage(&mut self) {
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_startup_coverage();
        }
    }

    /// Writes each configured sink. Failures are logged and never stop the others.
    pub fn flush(&self) {
        let Some(recorder) = self.recorder.as_deref() else {
            return;
        };
        if self.dump.is_none() && self.report.is_none() {
            return;
        }
        let ids = recorder.ever_covered_ids();
        if let Some(path) = &self.dump {
            match recorder.dump_coverage(&ids, path) {
                Ok(()) => info!(path = %path.display(), ids = ids.len(), "Coverage dump written"),
                Err(e) => error!("Failed to dump coverage: {e:#}"),
            }
        }
        if let Some(path) = &self.report {
            match recorder.dump_report(&ids, path) {
                Ok(()) => info!(path = %path.display(), "Coverage report written"),
                Err(e) => error!("Failed to write coverage report: {e:#}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flush_writes_configured_sinks() {
        let dir = tempdir().unwrap();
        let map = SharedCoverageMap::new();
        map.mark(3);
        let mut sinks = CoverageSinks::new(
            Some(Box::new(map.clone())),
            Some(dir.path().join("coverage.json")),
            Some(dir.path().join("coverage.txt")),
        );
        sinks.record_startup_coverage();
        map.mark(1);
        map.mark(3);
        sinks.flush();

        let dump = fs::read_to_string(dir.path().join("coverage.json")).unwrap();
        assert_eq!(serde_json::from_str::<Vec<u32>>(&dump).unwrap(), vec![1, 3]);
        let report = fs::read_to_string(dir.path().join("coverage.txt")).unwrap();
        assert!(report.contains("Covered ids: 2"));
        assert!(report.contains("3 (startup)"));
        assert!(report.lines().any(|line| line == "1"));
    }

    #[test]
    fn failing_sink_does_not_stop_the_other() {
        let dir = tempdir().unwrap();
        let map = SharedCoverageMap::new();
        map.mark(9);
        let sinks = CoverageSinks::new(
            Some(Box::new(map)),
            Some(dir.path().join("missing").join("coverage.json")),
            Some(dir.path().join("coverage.txt")),
        );
        sinks.flush();

        assert!(!dir.path().join("missing").exists());
        assert!(dir.path().join("coverage.txt").exists());
    }

    #[test]
    fn unconfigured_sinks_write_nothing() {
        let sinks = CoverageSinks::new(Some(Box::new(SharedCoverageMap::new())), None, None);
        sinks.flush();
        CoverageSinks::default().flush();
    }
}
