pub mod capture;
pub mod config;
pub mod coverage;
pub mod dedup;
pub mod diagnostics;
pub mod engine;
pub mod executor;
pub mod finding;
pub mod keep_going;
pub mod provider;
pub mod recording;
pub mod reproducer;
pub mod runner;
pub mod shutdown;
pub mod target;

pub use config::{ConfigError, HarnessConfig};
pub use coverage::{CoverageRecorder, SharedCoverageMap};
pub use dedup::{FindingNormalizer, InjectedFrameStripper, compute_dedup_token};
pub use diagnostics::Diagnostics;
pub use engine::{GENERIC_ERROR_EXIT_CODE, LIBFUZZER_ERROR_EXIT_CODE, NativeEngine};
pub use executor::InProcessExecutor;
pub use finding::{Finding, FindingReporter, Frame, Outcome};
pub use provider::{ByteProvider, FuzzedDataProvider};
pub use recording::{Recording, ReplayProvider};
pub use reproducer::{ReproducerArtifact, ReproducerError};
pub use runner::{FuzzTargetRunner, RunnerError};
pub use target::{AutofuzzReproducer, BindingError, FuzzTarget, InvocationMode};
