//! Fatal-condition reporting with captured source locations
//!
//! Recoverable failures travel as [`crate::error::FloeError`]. Everything
//! that indicates a broken API contract or corrupted shared memory ends up
//! here instead: the handler is invoked with the source location and the
//! process terminates. The handler slot is swappable so embedders can hook
//! their own crash reporting before the process goes down.

use std::panic::Location;
use std::sync::Mutex;

/// Classification of a fatal condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    /// The caller violated an API contract (release of an unowned chunk,
    /// capacity outside the legal range, use after shutdown)
    ContractViolation,
    /// Shared memory contains values that can only result from corruption
    /// (reference count underflow, bad header version)
    Corruption,
}

/// Everything a fatal handler learns about the condition
#[derive(Debug, Clone, Copy)]
pub struct FatalInfo<'a> {
    /// Condition classification
    pub kind: FatalKind,
    /// Human-readable description
    pub message: &'a str,
    /// Call site that detected the condition
    pub location: &'static Location<'static>,
}

/// Handler invoked for every fatal condition before termination
pub type FatalHandler = fn(&FatalInfo<'_>);

static HANDLER: Mutex<FatalHandler> = Mutex::new(default_handler);

fn default_handler(info: &FatalInfo<'_>) {
    log::error!(
        "fatal {:?} at {}:{}: {}",
        info.kind,
        info.location.file(),
        info.location.line(),
        info.message
    );
}

/// Install a replacement fatal handler, returning the previous one
///
/// The handler runs before termination; it must not assume the library is
/// in a usable state.
pub fn set_fatal_handler(handler: FatalHandler) -> FatalHandler {
    let mut slot = HANDLER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::replace(&mut *slot, handler)
}

/// Report a fatal condition and terminate
///
/// Contract violations panic so the source location surfaces in the panic
/// message and unwinding test harnesses can observe them. Corruption aborts
/// outright: a process that detected corrupted shared memory must not keep
/// running long enough to propagate it.
#[track_caller]
pub fn fatal(kind: FatalKind, message: &str) -> ! {
    let location = Location::caller();
    let info = FatalInfo {
        kind,
        message,
        location,
    };

    let handler = *HANDLER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    handler(&info);

    match kind {
        FatalKind::ContractViolation => {
            panic!(
                "contract violation at {}:{}: {}",
                location.file(),
                location.line(),
                message
            );
        }
        FatalKind::Corruption => {
            std::process::abort();
        }
    }
}

/// Always-on check for conditions that may happen during incorrect use
///
/// Failure is a contract violation and terminates the process.
#[macro_export]
macro_rules! enforce {
    ($cond:expr, $msg:expr) => {
        if !$cond {
            $crate::fault::fatal($crate::fault::FatalKind::ContractViolation, $msg);
        }
    };
}

/// Debug-build-only check for conditions that cannot happen with correct use
///
/// Compiled out in release builds.
#[macro_export]
macro_rules! debug_enforce {
    ($cond:expr, $msg:expr) => {
        if cfg!(debug_assertions) && !$cond {
            $crate::fault::fatal($crate::fault::FatalKind::ContractViolation, $msg);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_contract_violation_panics() {
        enforce!(1 + 1 == 3, "arithmetic is broken");
    }

    #[test]
    fn test_enforce_passes_on_true() {
        enforce!(1 + 1 == 2, "arithmetic is broken");
    }

    #[test]
    fn test_handler_swap_returns_previous() {
        fn noop(_: &FatalInfo<'_>) {}
        let noop_ptr: FatalHandler = noop;

        let previous = set_fatal_handler(noop_ptr);
        let restored = set_fatal_handler(previous);
        assert_eq!(restored as usize, noop_ptr as usize);
    }
}
