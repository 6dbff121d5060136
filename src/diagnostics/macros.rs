//! Diagnostic macros.

/// Emit a predefined diagnostic by code, optionally with formatted context.
///
/// Compiles to nothing in release builds without the `diagnostics` or
/// `log` feature.
///
/// # Example
///
/// ```rust,ignore
/// pa_emit!(PA101);
/// pa_emit!(PA102, "{} blocks", leaked);
/// ```
#[macro_export]
macro_rules! pa_emit {
    ($code:ident) => {{
        #[cfg(any(debug_assertions, feature = "diagnostics", feature = "log"))]
        {
            $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
        }
    }};
    ($code:ident, $($ctx:tt)+) => {{
        #[cfg(any(debug_assertions, feature = "diagnostics", feature = "log"))]
        {
            $crate::diagnostics::emit::emit_with_context(
                &$crate::diagnostics::$code,
                &format!($($ctx)+),
            );
        }
    }};
}
