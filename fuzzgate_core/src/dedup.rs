use crate::capture::BOUNDARY_PREFIX;
use crate::finding::{Finding, Frame};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Token reported when deduplication is disabled. Never used for suppression.
pub const DISABLED_DEDUP_TOKEN: u64 = 0;

/// How many significant frames per finding contribute to its dedup token.
pub const DEDUP_FRAME_LIMIT: usize = 5;

const HARNESS_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "rust_begin_unwind",
    "__rust",
    "fuzzgate_core::capture::",
    "fuzzgate_core::finding::",
    "<unknown>",
];

fn is_harness_frame(frame: &Frame) -> bool {
    let function = frame.function.trim_start_matches('<');
    HARNESS_FRAME_PREFIXES
        .iter()
        .any(|prefix| function.starts_with(prefix))
        || function.contains(" as core::ops::function::")
}

/// Frames written by the target: panic machinery above it and harness frames
/// from the entry boundary down are dropped.
pub fn significant_frames(frames: &[Frame]) -> impl Iterator<Item = &Frame> {
    frames
        .iter()
        .take_while(|frame| !frame.function.starts_with(BOUNDARY_PREFIX))
        .filter(|frame| !is_harness_frame(frame))
        .take(DEDUP_FRAME_LIMIT)
}

/// Derives a stable identity from the kind, location and significant frames of
/// every finding in the cause chain. Messages do not contribute, except for panics
/// that bypassed the panic hook and have nothing else to tell them apart.
pub fn compute_dedup_token(finding: &Finding) -> u64 {
    let mut hasher = Sha256::new();
    for link in finding.chain() {
        hasher.update(link.kind.as_bytes());
        hasher.update([0]);
        if let Some(location) = &link.location {
            hasher.update(location.as_bytes());
        }
        hasher.update([0]);
        for frame in significant_frames(&link.frames) {
            hasher.update(frame.function.as_bytes());
            hasher.update([0]);
        }
        if let Some(payload_type) = link.unhooked_payload {
            hasher.update(payload_type.as_bytes());
            hasher.update([0]);
            hasher.update(link.message.as_bytes());
            hasher.update([0]);
        }
        hasher.update([0xff]);
    }
    let digest = hasher.finalize();
    let mut token = [0u8; 8];
    token.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(token)
}

/// Rewrites a finding before it is deduplicated and reported.
pub trait FindingNormalizer: Send + Sync {
    fn normalize(&self, finding: Finding) -> Finding;
}

/// Unwraps findings raised by injected hooks and drops the hooks' own frames.
#[derive(Debug, Clone, Default)]
pub struct InjectedFrameStripper {
    wrapper_kinds: Vec<String>,
    injected_prefixes: Vec<String>,
}

impl InjectedFrameStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Findings of this kind are replaced by their cause.
    pub fn unwrap_kind(mut self, kind: impl Into<String>) -> Self {
        self.wrapper_kinds.push(kind.into());
        self
    }

    /// Frames whose function starts with this prefix are removed.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.injected_prefixes.push(prefix.into());
        self
    }

    fn strip_frames(&self, finding: &mut Finding) {
        finding.frames.retain(|frame| {
            !self
                .injected_prefixes
                .iter()
                .any(|prefix| frame.function.starts_with(prefix.as_str()))
        });
        if let Some(cause) = finding.cause.as_deref_mut() {
            self.strip_frames(cause);
        }
    }
}

impl FindingNormalizer for InjectedFrameStripper {
    fn normalize(&self, mut finding: Finding) -> Finding {
        while self.wrapper_kinds.contains(&finding.kind) {
            match finding.cause.take() {
                Some(cause) => finding = *cause,
                None => break,
            }
        }
        self.strip_frames(&mut finding);
        finding
    }
}

/// Tokens of findings that were already reported, or that the user asked to ignore.
#[derive(Debug, Default)]
pub struct IgnoreSet {
    tokens: HashSet<u64>,
}

impl IgnoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: impl IntoIterator<Item = u64>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }

    /// Returns `true` if the token was not present yet.
    pub fn insert(&mut self, token: u64) -> bool {
        self.tokens.insert(token)
    }

    pub fn contains(&self, token: u64) -> bool {
        self.tokens.contains(&token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A finding after normalization, with its dedup token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub finding: Finding,
    pub token: u64,
}

pub struct Classifier {
    dedup: bool,
    normalizer: Option<Box<dyn FindingNormalizer>>,
}

impl Classifier {
    pub fn new(dedup: bool, normalizer: Option<Box<dyn FindingNormalizer>>) -> Self {
        Self { dedup, normalizer }
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup
    }

    pub fn classify(&self, finding: Finding) -> Classified {
        let finding = match &self.normalizer {
            Some(normalizer) => normalizer.normalize(finding),
            None => finding,
        };
        let token = if self.dedup {
            compute_dedup_token(&finding)
        } else {
            DISABLED_DEDUP_TOKEN
        };
        Classified { finding, token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::catch_finding;

    fn sample() -> Finding {
        Finding::bare("panic", "index out of bounds")
            .with_location("src/parse.rs:10:9")
            .with_frames(vec![
                Frame::new("std::panicking::begin_panic_handler"),
                Frame::new("core::panicking::panic_bounds_check"),
                Frame::new("app::parse::header"),
                Frame::new("app::parse::document"),
                Frame::new("<F as core::ops::function::Fn<(&[u8],)>>::call"),
                Frame::new("fuzzgate_core::capture::target_boundary_bytes"),
                Frame::new("fuzzgate_core::executor::run_bytes"),
                Frame::new("main"),
            ])
    }

    #[test]
    fn token_is_pure() {
        let finding = sample();
        assert_eq!(compute_dedup_token(&finding), compute_dedup_token(&finding));
        assert_eq!(compute_dedup_token(&finding), compute_dedup_token(&finding.clone()));
    }

    #[test]
    fn only_target_frames_are_significant() {
        let finding = sample();
        let functions: Vec<_> = significant_frames(&finding.frames)
            .map(|frame| frame.function.as_str())
            .collect();
        assert_eq!(functions, vec!["app::parse::header", "app::parse::document"]);
    }

    #[test]
    fn harness_frames_do_not_affect_token() {
        let mut relocated = sample();
        relocated.frames.truncate(5);
        relocated.frames.push(Frame::new("fuzzgate_core::capture::target_boundary_bytes"));
        relocated.frames.push(Frame::new("fuzzgate_core::reproducer::replay"));
        assert_eq!(compute_dedup_token(&sample()), compute_dedup_token(&relocated));
    }

    #[test]
    fn message_does_not_affect_token() {
        let mut other = sample();
        other.message = "index 7 out of bounds".to_string();
        assert_eq!(compute_dedup_token(&sample()), compute_dedup_token(&other));
    }

    #[test]
    fn kind_location_frames_and_causes_affect_token() {
        let base = compute_dedup_token(&sample());

        let mut kind = sample();
        kind.kind = "SecurityIssue".to_string();
        assert_ne!(base, compute_dedup_token(&kind));

        let mut location = sample();
        location.location = Some("src/parse.rs:11:9".to_string());
        assert_ne!(base, compute_dedup_token(&location));

        let mut frames = sample();
        frames.frames[2] = Frame::new("app::parse::trailer");
        assert_ne!(base, compute_dedup_token(&frames));

        let caused = sample().with_cause(Finding::bare("panic", "inner"));
        assert_ne!(base, compute_dedup_token(&caused));
    }

    #[test]
    fn repeated_panics_at_one_site_share_a_token() {
        fn crash(n: u8) {
            if n > 0 {
                panic!("crash number {n}");
            }
        }
        let run = |n| catch_finding(|| crash(n)).unwrap_err();
        let (first, second) = (run(1), run(2));
        assert_ne!(first.message, second.message);
        assert_eq!(compute_dedup_token(&first), compute_dedup_token(&second));
    }

    #[test]
    fn unhooked_panics_are_told_apart_by_message() {
        let unhooked = |message: &str| {
            let mut finding = Finding::bare("panic", message);
            finding.unhooked_payload = Some("&str");
            finding
        };
        let overflow = compute_dedup_token(&unhooked("decoder overflow"));
        assert_eq!(overflow, compute_dedup_token(&unhooked("decoder overflow")));
        assert_ne!(overflow, compute_dedup_token(&unhooked("checksum mismatch")));
        assert_ne!(overflow, compute_dedup_token(&Finding::bare("panic", "decoder overflow")));
    }

    #[test]
    fn stripper_unwraps_wrappers_and_strips_injected_frames() {
        let wrapped = Finding::bare("HookWrapper", "sanitizer fired")
            .with_cause(sample().with_frames(vec![
                Frame::new("sanitizers::hooks::check_path"),
                Frame::new("app::parse::header"),
            ]));
        let stripper = InjectedFrameStripper::new()
            .unwrap_kind("HookWrapper")
            .strip_prefix("sanitizers::hooks::");

        let normalized = stripper.normalize(wrapped);
        assert_eq!(normalized.kind, "panic");
        assert_eq!(normalized.frames, vec![Frame::new("app::parse::header")]);
    }

    #[test]
    fn ignore_set_insert_reports_novelty() {
        let mut set = IgnoreSet::with_tokens([7]);
        assert!(set.contains(7));
        assert!(!set.insert(7), "preloaded token is not new");
        assert!(set.insert(8));
        assert!(!set.insert(8));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn disabled_dedup_yields_sentinel() {
        let classifier = Classifier::new(false, None);
        assert_eq!(classifier.classify(sample()).token, DISABLED_DEDUP_TOKEN);

        let classifier = Classifier::new(true, None);
        assert_eq!(classifier.classify(sample()).token, compute_dedup_token(&sample()));
    }
}
