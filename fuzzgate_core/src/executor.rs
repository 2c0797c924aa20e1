use crate::capture;
use crate::finding::{FindingReporter, Outcome};
use crate::provider::{ByteProvider, FuzzedDataProvider};
use crate::recording::{Recording, RecordingProvider};
use crate::target::{BytesTarget, FuzzTarget, InvocationMode, ProviderTarget, TestOneInput};
use std::path::Path;

pub(crate) fn run_bytes(target: &BytesTarget, reporter: &FindingReporter, data: &[u8]) -> Outcome {
    let thrown = capture::catch_finding(|| capture::target_boundary_bytes(target, data)).err();
    Outcome::resolve(thrown, reporter.take())
}

pub(crate) fn run_provider(
    target: &ProviderTarget,
    reporter: &FindingReporter,
    provider: &mut dyn FuzzedDataProvider,
) -> Outcome {
    let thrown =
        capture::catch_finding(|| capture::target_boundary_provider(target, provider)).err();
    Outcome::resolve(thrown, reporter.take())
}

/// Runs the fuzz target in this process, one input at a time.
///
/// Owns the target and, for provider-mode targets, the provider that is re-fed
/// with every input.
pub struct InProcessExecutor {
    target: FuzzTarget,
    provider: ByteProvider,
}

impl InProcessExecutor {
    pub fn new(target: FuzzTarget) -> Self {
        Self {
            target,
            provider: ByteProvider::new(),
        }
    }

    pub fn target(&self) -> &FuzzTarget {
        &self.target
    }

    pub fn mode(&self) -> InvocationMode {
        self.target.mode()
    }

    /// Runs one iteration. Panics never escape; an explicit report overrides a panic.
    pub fn execute(&mut self, data: &[u8]) -> Outcome {
        match self.target.entry() {
            TestOneInput::Bytes(target) => run_bytes(target, self.target.reporter(), data),
            TestOneInput::Provider(target) => {
                self.provider.feed(data);
                run_provider(target, self.target.reporter(), &mut self.provider)
            }
        }
    }

    /// Bytes that identify the crashing execution: the input itself, or everything
    /// the provider was fed.
    pub fn canonical_bytes(&mut self, data: &[u8]) -> Vec<u8> {
        match self.mode() {
            InvocationMode::Bytes => data.to_vec(),
            InvocationMode::Provider => {
                self.provider.reset();
                self.provider.consume_remaining_as_bytes()
            }
        }
    }

    /// Re-runs a provider-mode target from the start of the current input, recording
    /// every value it consumes. Returns `None` for bytes-mode targets.
    pub fn record(&mut self) -> Option<(Outcome, Recording)> {
        let TestOneInput::Provider(target) = self.target.entry() else {
            return None;
        };
        self.provider.reset();
        let mut recorder = RecordingProvider::new(&mut self.provider);
        let outcome = run_provider(target, self.target.reporter(), &mut recorder);
        Some((outcome, recorder.into_recording()))
    }

    /// Hands the rewound provider to the target's auto-target reproducer, if it has one.
    pub fn dump_autofuzz_reproducer(
        &mut self,
        reproducer_dir: &Path,
        content_hash: &str,
    ) -> Option<anyhow::Result<()>> {
        let autofuzz = self.target.autofuzz()?;
        self.provider.reset();
        Some(autofuzz.dump_reproducer(&mut self.provider, reproducer_dir, content_hash))
    }
}
