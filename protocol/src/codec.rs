//! Reply framing — deciding when a buffered reply is complete.
//!
//! The wire is newline-delimited, but large replies may span several
//! reads and some servers emit pretty-printed JSON across multiple
//! lines. The reader therefore accumulates input until the brace
//! structure balances outside of string literals.

/// Maximum reply size the client will buffer before giving up.
pub const MAX_REPLY_SIZE: usize = 16 * 1024 * 1024; // 16 MiB

/// Returns `true` once `buf` contains at least one structurally complete
/// JSON object: the first `{` has been matched by its closing `}`.
///
/// Braces inside string literals and escaped quotes are ignored. Input
/// before the first `{` (blank lines, stray whitespace) is skipped.
pub fn is_complete(buf: &str) -> bool {
    let mut depth = 0usize;
    let mut seen_object = false;
    let mut in_string = false;
    let mut escaped = false;

    for ch in buf.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => {
                depth += 1;
                seen_object = true;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if seen_object && depth == 0 {
                    return true;
                }
            }
            _ => {}
        }
    }

    false
}
