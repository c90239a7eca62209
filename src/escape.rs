//! Escaping of untrusted text before it is spliced into transcript markup.
//!
//! The transcript grammar (see [`crate::markup`]) treats `[` and `]` as tag
//! delimiters and `\` as the escape prefix. Everything else is literal.
//! Each character is mapped on its own, so `escape(a + b) == escape(a) + escape(b)`
//! and streamed chunks can be escaped one at a time.

/// Characters that carry meaning in the markup grammar.
pub const SPECIAL_CHARS: [char; 3] = ['\\', '[', ']'];

/// Escape `text` so the markup parser displays it verbatim.
#[must_use]
pub fn escape(text: &str) -> String {
    let extra = text.chars().filter(|c| SPECIAL_CHARS.contains(c)).count();
    let mut escaped = String::with_capacity(text.len() + extra);
    for c in text.chars() {
        if SPECIAL_CHARS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
