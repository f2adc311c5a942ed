//! Small shared utilities.

use std::borrow::Cow;

/// Strips C0 control characters and DEL from a string, preserving tabs,
/// newlines and carriage returns. Applied to user-entered and imported feed
/// titles before they reach the store.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .bytes()
        .any(|b| b == 0x7f || (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d));

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    Cow::Owned(
        s.chars()
            .filter(|&c| {
                c == '\t' || c == '\n' || c == '\r' || (c != '\u{7f}' && c >= '\u{20}')
            })
            .collect(),
    )
}
