//! Rendering of panic payloads caught around application callbacks.

use std::any::Any;

/// Best-effort text for a caught panic payload.
///
/// `panic!` with a literal carries a `&'static str` and with format
/// arguments a `String`; any other payload renders as a placeholder.
///
/// ```
/// use wiresession::panic::panic_message;
///
/// let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
/// assert_eq!(panic_message(&*caught), "boom 7");
/// assert_eq!(panic_message(&5_u32), "<non-string panic payload>");
/// ```
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
