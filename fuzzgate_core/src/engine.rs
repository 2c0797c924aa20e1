/// Exit code for a reported finding, matching libFuzzer's `-error_exitcode` default.
pub const LIBFUZZER_ERROR_EXIT_CODE: i32 = 77;
/// Exit code for harness failures that are not findings.
pub const GENERIC_ERROR_EXIT_CODE: i32 = 1;

/// What the harness needs from the native fuzzing engine driving it.
pub trait NativeEngine {
    /// Describes the current input on stderr, e.g. where it was saved.
    fn print_crashing_input(&mut self);

    /// Ends the process immediately, without unwinding or running exit handlers.
    fn hard_exit(&mut self, code: i32) -> !;
}

/// Terminates the process with `code`, skipping atexit handlers and stdio buffers.
pub fn immediate_exit(code: i32) -> ! {
    // SAFETY: `_exit` takes no pointers and never returns.
    unsafe { libc::_exit(code) }
}
