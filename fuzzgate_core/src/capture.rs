//! Converts panics raised by target code into [`Finding`]s.
//!
//! A process-wide panic hook is installed on first use. While a thread is running
//! target code the hook records the panic location and stack instead of printing;
//! panics anywhere else are forwarded to the previously installed hook.

use crate::finding::{Finding, Frame, PANIC_KIND, parse_backtrace};
use crate::provider::FuzzedDataProvider;
use crate::target::{BytesTarget, ProviderTarget};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use tracing::warn;

/// Symbol prefix shared by the functions through which target code is entered.
/// Frames at and below the first such frame belong to the harness.
pub(crate) const BOUNDARY_PREFIX: &str = "fuzzgate_core::capture::target_boundary";

struct PanicRecord {
    location: Option<String>,
    frames: Vec<Frame>,
}

thread_local! {
    static IN_TARGET: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicRecord>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if IN_TARGET.with(Cell::get) {
                let record = PanicRecord {
                    location: info.location().map(|location| location.to_string()),
                    frames: parse_backtrace(&Backtrace::force_capture()),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(record));
            } else {
                previous(info);
            }
        }));
    });
}

struct TargetScope {
    was_in_target: bool,
}

impl TargetScope {
    fn enter() -> Self {
        LAST_PANIC.with(|slot| slot.borrow_mut().take());
        Self {
            was_in_target: IN_TARGET.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for TargetScope {
    fn drop(&mut self) {
        IN_TARGET.with(|flag| flag.set(self.was_in_target));
    }
}

/// Runs `f` as target code. A panic becomes `Err(Finding)`.
pub fn catch_finding<R>(f: impl FnOnce() -> R) -> Result<R, Finding> {
    install_panic_hook();
    let scope = TargetScope::enter();
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    drop(scope);
    result.map_err(finding_from_payload)
}

fn finding_from_payload(payload: Box<dyn Any + Send>) -> Finding {
    let record = LAST_PANIC.with(|slot| slot.borrow_mut().take());
    let payload = match payload.downcast::<Finding>() {
        Ok(finding) => return *finding,
        Err(payload) => payload,
    };
    let (message, payload_type) = if let Some(s) = payload.downcast_ref::<&str>() {
        (s.to_string(), "&str")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        (s.clone(), "String")
    } else {
        ("Unknown panic type".to_string(), "unknown")
    };
    let mut finding = Finding::bare(PANIC_KIND, message);
    match record {
        Some(record) => {
            finding.location = record.location;
            finding.frames = record.frames;
        }
        None => {
            warn!(
                payload_type,
                "Panic unwound without reaching the panic hook; deduplicating it by message"
            );
            finding.unhooked_payload = Some(payload_type);
        }
    }
    finding
}

#[inline(never)]
pub(crate) fn target_boundary_bytes(target: &BytesTarget, data: &[u8]) {
    target(data);
    black_box(());
}

#[inline(never)]
pub(crate) fn target_boundary_provider(
    target: &ProviderTarget,
    provider: &mut dyn FuzzedDataProvider,
) {
    target(provider);
    black_box(());
}

/// Boundary for lifecycle hooks such as initialize and tear-down.
#[inline(never)]
pub(crate) fn target_boundary_hook<R>(hook: &dyn Fn() -> R) -> R {
    black_box(hook())
}
