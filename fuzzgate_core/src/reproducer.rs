//! Standalone Rust reproducers for crashing inputs.
//!
//! Each reproducer is a small source file named after the MD5 of the crashing input.
//! It embeds the input as base64, or for provider-mode targets the recording of every
//! value the target consumed, and calls the target once.

use crate::executor::{self, InProcessExecutor};
use crate::finding::Finding;
use crate::recording::{RecordingError, ReplayProvider};
use crate::target::{FuzzTarget, InvocationMode, TestOneInput};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

const TARGET_PREFIX: &str = "// Fuzz target: ";
const MODE_PREFIX: &str = "// Invocation mode: ";
const HASH_PREFIX: &str = "// Content hash: ";
const DATA_PREFIX: &str = "const DATA: &str = \"";
const DATA_SUFFIX: &str = "\";";

const TEMPLATE: &str = r#"// Fuzz target: %TARGET%
// Invocation mode: %MODE%
// Content hash: %HASH%
//
// Reproduces a crash found by fuzzgate. Build it against the crate that defines
// the fuzz target and run it to trigger the crash again.

const DATA: &str = "%PAYLOAD%";

fn main() {
%BODY%
}
"#;

const BYTES_BODY: &str = r#"    use base64::Engine as _;
    let data = base64::engine::general_purpose::STANDARD
        .decode(DATA)
        .expect("reproducer payload is valid base64");
    %TARGET%(&data);"#;

const PROVIDER_BODY: &str = r#"    let mut provider = fuzzgate_core::recording::ReplayProvider::from_base64(DATA)
        .expect("reproducer payload is a valid recording");
    %TARGET%(&mut provider);"#;

#[derive(Error, Debug)]
pub enum ReproducerError {
    #[error(transparent)]
    Recording(#[from] RecordingError),
    #[error("auto-target reproducer failed: {0:#}")]
    Autofuzz(anyhow::Error),
    #[error("I/O error on reproducer {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("reproducer is missing its {0} line")]
    MissingField(&'static str),
    #[error("reproducer has invalid invocation mode: {0}")]
    InvalidMode(String),
    #[error("reproducer was written for a {artifact} target but the target takes {target}")]
    ModeMismatch {
        artifact: InvocationMode,
        target: InvocationMode,
    },
    #[error("reproducer payload is not valid base64: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Lowercase hex, two digits per byte with leading zeros kept.
pub fn to_hex_string(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut hex, byte| {
        let _ = write!(hex, "{byte:02x}");
        hex
    })
}

/// MD5 of the input as 32 hex digits.
pub fn content_hash(data: &[u8]) -> String {
    to_hex_string(&md5::compute(data).0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReproducerArtifact {
    pub target: String,
    pub mode: InvocationMode,
    /// Base64 of the input bytes, or of the encoded recording in provider mode.
    pub payload: String,
    pub content_hash: String,
}

impl ReproducerArtifact {
    pub fn file_name(&self) -> String {
        format!("Crash_{}.rs", self.content_hash)
    }

    pub fn render(&self) -> String {
        let body = match self.mode {
            InvocationMode::Bytes => BYTES_BODY,
            InvocationMode::Provider => PROVIDER_BODY,
        };
        TEMPLATE
            .replace("%BODY%", body)
            .replace("%TARGET%", &self.target)
            .replace("%MODE%", self.mode.as_str())
            .replace("%HASH%", &self.content_hash)
            .replace("%PAYLOAD%", &self.payload)
    }

    pub fn parse(source: &str) -> Result<Self, ReproducerError> {
        let header = |prefix: &str, field: &'static str| {
            source
                .lines()
                .find_map(|line| line.strip_prefix(prefix))
                .map(|value| value.trim().to_string())
                .ok_or(ReproducerError::MissingField(field))
        };
        let target = header(TARGET_PREFIX, "fuzz target")?;
        let mode = header(MODE_PREFIX, "invocation mode")?;
        let mode = mode.parse().map_err(|_| ReproducerError::InvalidMode(mode))?;
        let content_hash = header(HASH_PREFIX, "content hash")?;
        let payload = source
            .lines()
            .find_map(|line| line.strip_prefix(DATA_PREFIX)?.strip_suffix(DATA_SUFFIX))
            .ok_or(ReproducerError::MissingField("payload"))?
            .to_string();
        Ok(Self {
            target,
            mode,
            payload,
            content_hash,
        })
    }

    pub fn read_from(path: &Path) -> Result<Self, ReproducerError> {
        let source = fs::read_to_string(path).map_err(|source| ReproducerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReproducerError> {
        let path = dir.join(self.file_name());
        fs::write(&path, self.render()).map_err(|source| ReproducerError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Runs the embedded input against `target` in this process.
    pub fn replay(&self, target: &FuzzTarget) -> Result<Option<Finding>, ReproducerError> {
        if target.mode() != self.mode {
            return Err(ReproducerError::ModeMismatch {
                artifact: self.mode,
                target: target.mode(),
            });
        }
        if target.name() != self.target {
            warn!(
                artifact = %self.target,
                fuzz_target = %target.name(),
                "Replaying reproducer against a differently named target"
            );
        }
        let outcome = match target.entry() {
            TestOneInput::Bytes(entry) => {
                let data = BASE64.decode(&self.payload)?;
                executor::run_bytes(entry, target.reporter(), &data)
            }
            TestOneInput::Provider(entry) => {
                let mut provider = ReplayProvider::from_base64(&self.payload)?;
                executor::run_provider(entry, target.reporter(), &mut provider)
            }
        };
        Ok(outcome.into_finding())
    }
}

/// Writes a reproducer for the input the executor last ran.
#[derive(Debug, Clone)]
pub struct ReproducerGenerator {
    dir: PathBuf,
}

impl ReproducerGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns `None` when the target's auto-target reproducer wrote its own.
    ///
    /// Errors are encoding failures. A reproducer that cannot be written is logged
    /// and the artifact is still returned.
    pub fn generate(
        &self,
        executor: &mut InProcessExecutor,
        data: &[u8],
    ) -> Result<Option<ReproducerArtifact>, ReproducerError> {
        let bytes = executor.canonical_bytes(data);
        let content_hash = content_hash(&bytes);

        if let Some(result) = executor.dump_autofuzz_reproducer(&self.dir, &content_hash) {
            result.map_err(ReproducerError::Autofuzz)?;
            return Ok(None);
        }

        let payload = match executor.record() {
            Some((outcome, recording)) => {
                if !outcome.is_finding() {
                    warn!("Failed to reproduce crash when rerunning with recorder");
                }
                recording.encode()?
            }
            None => BASE64.encode(&bytes),
        };

        let artifact = ReproducerArtifact {
            target: executor.target().name().to_string(),
            mode: executor.mode(),
            payload,
            content_hash,
        };
        match artifact.write_to(&self.dir) {
            Ok(path) => info!(path = %path.display(), "Reproducer written"),
            Err(e) => error!("Failed to write reproducer: {e}"),
        }
        Ok(Some(artifact))
    }
}
