use crate::finding::Finding;
use std::io::{self, Write};

pub const FINDING_HEADER: &str = "== Rust Panic: ";
pub const INITIALIZE_HEADER: &str = "== Rust Panic in fuzzer_initialize: ";
pub const TEAR_DOWN_HEADER: &str = "== Rust Panic in fuzzer_tear_down: ";
pub const CRASHING_INPUT_HEADER: &str = "== libFuzzer crashing input ==";

/// The two product streams: finding reports go to `err`, dedup tokens to `out`.
pub struct Diagnostics {
    err: Box<dyn Write + Send>,
    out: Box<dyn Write + Send>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::stdio()
    }
}

impl Diagnostics {
    pub fn stdio() -> Self {
        Self::new(Box::new(io::stderr()), Box::new(io::stdout()))
    }

    pub fn new(err: Box<dyn Write + Send>, out: Box<dyn Write + Send>) -> Self {
        Self { err, out }
    }

    // Write failures on the diagnostic streams are ignored; there is nowhere left to report them.

    pub fn finding(&mut self, header: &str, finding: &Finding) {
        let _ = write!(self.err, "\n{header}{finding}");
    }

    pub fn dedup_token(&mut self, token: u64) {
        let _ = writeln!(self.out, "DEDUP_TOKEN: {token:016x}");
    }

    pub fn error_line(&mut self, line: impl std::fmt::Display) {
        let _ = writeln!(self.err, "{line}");
    }

    pub fn flush(&mut self) {
        let _ = self.err.flush();
        let _ = self.out.flush();
    }
}

/// In-memory stream whose clones share one buffer.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
