use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::panic::Location;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Kind assigned to findings raised by a plain `panic!`.
pub const PANIC_KIND: &str = "panic";

/// A single resolved stack frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub location: Option<String>,
}

impl Frame {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// A failure captured from the fuzz target, either a panic or an explicit report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// What went wrong, e.g. `panic` or a user-chosen category such as `SecurityIssue`.
    pub kind: String,
    pub message: String,
    /// Source location of the panic or of the `Finding::new` call.
    pub location: Option<String>,
    /// Frames from innermost to outermost.
    pub frames: Vec<Frame>,
    pub cause: Option<Box<Finding>>,
    /// Payload type of a panic that unwound without passing the panic hook, which
    /// leaves it with no location or frames to identify it by.
    pub unhooked_payload: Option<&'static str>,
}

impl Finding {
    /// Creates a finding located at the caller, with the current stack captured.
    ///
    /// Targets pass the result to [`FindingReporter::report`] or to
    /// `std::panic::panic_any`.
    #[track_caller]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            location: Some(Location::caller().to_string()),
            frames: parse_backtrace(&Backtrace::force_capture()),
            cause: None,
            unhooked_payload: None,
        }
    }

    /// Creates a finding without a location or frames.
    pub fn bare(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            location: None,
            frames: Vec::new(),
            cause: None,
            unhooked_payload: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_cause(mut self, cause: Finding) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Iterates over this finding followed by its causes.
    pub fn chain(&self) -> impl Iterator<Item = &Finding> {
        std::iter::successors(Some(self), |finding| finding.cause.as_deref())
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, link) in self.chain().enumerate() {
            if depth > 0 {
                write!(f, "Caused by: ")?;
            }
            if link.message.is_empty() {
                writeln!(f, "{}", link.kind)?;
            } else {
                writeln!(f, "{}: {}", link.kind, link.message)?;
            }
            if let Some(location) = &link.location {
                writeln!(f, "\tat {location}")?;
            }
            for frame in &link.frames {
                match &frame.location {
                    Some(location) => writeln!(f, "\tat {} ({location})", frame.function)?,
                    None => writeln!(f, "\tat {}", frame.function)?,
                }
            }
        }
        Ok(())
    }
}

/// Resolves a captured backtrace into frames. Returns nothing if capture was unsupported.
pub fn parse_backtrace(backtrace: &Backtrace) -> Vec<Frame> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    parse_backtrace_text(&backtrace.to_string())
}

/// Parses the `Display` rendering of a `std::backtrace::Backtrace`.
pub fn parse_backtrace_text(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.location.is_none() {
                    frame.location = Some(location.to_string());
                }
            }
            continue;
        }
        let symbol = match line.split_once(": ") {
            Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => line,
        };
        frames.push(Frame::new(strip_symbol_hash(symbol)));
    }
    frames
}

/// Drops the `::h0123456789abcdef` suffix legacy mangling appends to symbols.
fn strip_symbol_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::") {
        Some((path, last))
            if last.len() == 17
                && last.starts_with('h')
                && last[1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            path
        }
        _ => symbol,
    }
}

/// Result of a single iteration.
///
/// An explicit report always takes precedence over a panic raised in the same iteration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    None,
    Reported(Finding),
    Thrown(Finding),
}

impl Outcome {
    pub fn resolve(thrown: Option<Finding>, reported: Option<Finding>) -> Self {
        match (reported, thrown) {
            (Some(reported), _) => Outcome::Reported(reported),
            (None, Some(thrown)) => Outcome::Thrown(thrown),
            (None, None) => Outcome::None,
        }
    }

    pub fn is_finding(&self) -> bool {
        !matches!(self, Outcome::None)
    }

    pub fn into_finding(self) -> Option<Finding> {
        match self {
            Outcome::None => None,
            Outcome::Reported(finding) | Outcome::Thrown(finding) => Some(finding),
        }
    }
}

/// Side channel through which a target reports a finding without panicking.
///
/// Clones share one slot. Concurrent writers are allowed and the last write wins;
/// the harness reads and clears the slot once the target call has returned.
#[derive(Debug, Clone, Default)]
pub struct FindingReporter {
    slot: Arc<Mutex<Option<Finding>>>,
}

impl FindingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide reporter used by targets that are not given their own.
    pub fn global() -> &'static FindingReporter {
        static GLOBAL: OnceLock<FindingReporter> = OnceLock::new();
        GLOBAL.get_or_init(FindingReporter::new)
    }

    pub fn report(&self, finding: Finding) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(finding);
    }

    pub fn take(&self) -> Option<Finding> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
