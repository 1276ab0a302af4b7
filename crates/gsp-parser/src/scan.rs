//! Byte-level helpers for balanced `${ }` and string literal scanning.
//!
//! Shared by the template scanner and the expression lexer so that both agree
//! on where an embedded expression ends.

/// Finds the `}` that closes a brace opened just before `from`.
///
/// Nested braces and quoted strings (including `"${...}"` interpolations
/// inside them) are skipped. Returns the index of the closing brace.
pub(crate) fn find_closing_brace(bytes: &[u8], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'\'' | b'"' => {
                i = skip_string(bytes, i)?;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Skips the string literal whose opening quote is at `at`.
///
/// Returns the index just past the closing quote. Double-quoted strings may
/// contain `${...}` interpolations, which may in turn contain strings.
pub(crate) fn skip_string(bytes: &[u8], at: usize) -> Option<usize> {
    let quote = bytes[at];
    let mut i = at + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i + 1),
            b'$' if quote == b'"' && bytes.get(i + 1) == Some(&b'{') => {
                i = find_closing_brace(bytes, i + 2)? + 1;
            }
            _ => i += 1,
        }
    }
    None
}

/// Finds the first occurrence of `needle` at or after `from`.
pub(crate) fn find(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    haystack[from..].find(needle).map(|pos| from + pos)
}
