use fuzzgate_core::NativeEngine;
use fuzzgate_core::engine::immediate_exit;
use std::fs;
use tracing::error;

/// Runs inputs from disk the way libFuzzer does when given files instead of a corpus.
pub struct StandaloneEngine {
    artifact_prefix: String,
    current: Vec<u8>,
}

impl StandaloneEngine {
    pub fn new(artifact_prefix: impl Into<String>) -> Self {
        Self {
            artifact_prefix: artifact_prefix.into(),
            current: Vec::new(),
        }
    }

    pub fn set_current(&mut self, data: &[u8]) {
        self.current.clear();
        self.current.extend_from_slice(data);
    }

    pub fn artifact_path(&self) -> String {
        format!("{}crash-{:x}", self.artifact_prefix, md5::compute(&self.current))
    }
}

impl NativeEngine for StandaloneEngine {
    fn print_crashing_input(&mut self) {
        let path = self.artifact_path();
        match fs::write(&path, &self.current) {
            Ok(()) => eprintln!("Test unit written to {path}"),
            Err(e) => error!("Failed to write crashing input to {path}: {e}"),
        }
    }

    fn hard_exit(&mut self, code: i32) -> ! {
        immediate_exit(code)
    }
}
