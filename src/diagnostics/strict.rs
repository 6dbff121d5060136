//! Strict mode handling for warnings.
//!
//! Contract violations are always fatal. Strict mode decides whether
//! shutdown warnings (leaks, quarantined blocks) panic too, which is useful
//! in CI.

use std::sync::atomic::{AtomicU8, Ordering};

/// Strict mode behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StrictMode {
    /// Just warn, don't panic.
    Warn = 0,
    /// Panic on warnings as well as errors.
    PanicOnWarning = 1,
}

impl From<u8> for StrictMode {
    fn from(val: u8) -> Self {
        match val {
            1 => StrictMode::PanicOnWarning,
            _ => StrictMode::Warn,
        }
    }
}

/// Global strict mode setting.
static STRICT_MODE: AtomicU8 = AtomicU8::new(0);

/// Set the strict mode.
pub fn set_strict_mode(mode: StrictMode) {
    STRICT_MODE.store(mode as u8, Ordering::Relaxed);
}

/// Get the current strict mode.
pub fn strict_mode() -> StrictMode {
    StrictMode::from(STRICT_MODE.load(Ordering::Relaxed))
}

/// Check if we should panic for warnings.
pub fn should_panic_on_warning() -> bool {
    strict_mode() == StrictMode::PanicOnWarning
}

/// RAII guard for temporarily setting strict mode.
pub struct StrictModeGuard {
    previous: StrictMode,
}

impl StrictModeGuard {
    /// Create a new guard that sets strict mode.
    pub fn new(mode: StrictMode) -> Self {
        let previous = strict_mode();
        set_strict_mode(mode);
        Self { previous }
    }

    /// Create a guard that enables panic-on-warning.
    pub fn panic_on_warning() -> Self {
        Self::new(StrictMode::PanicOnWarning)
    }
}

impl Drop for StrictModeGuard {
    fn drop(&mut self) {
        set_strict_mode(self.previous);
    }
}

/// Parse a `POISONALLOC_STRICT` value.
fn parse_mode(val: &str) -> StrictMode {
    match val.to_lowercase().as_str() {
        "1" | "true" | "warning" | "all" => StrictMode::PanicOnWarning,
        _ => StrictMode::Warn,
    }
}

/// Initialize strict mode from environment variable.
///
/// Checks `POISONALLOC_STRICT`:
/// - "0", "warn" or unset -> Warn
/// - "1", "true", "warning" or "all" -> PanicOnWarning
pub fn init_from_env() {
    if let Ok(val) = std::env::var("POISONALLOC_STRICT") {
        set_strict_mode(parse_mode(&val));
    }
}
