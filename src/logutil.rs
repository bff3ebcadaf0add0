//! Helpers that keep user-supplied text on a single, bounded log line.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///
/// Other control characters become `\xNN`. Output is capped at 300 characters.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Truncate to at most `max_bytes`, never splitting a UTF-8 sequence, appending `…` when cut.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&input[..end]);
    out.push('…');
    out
}

/// Render a node number the way the Meshtastic apps do (`!1a2b3c4d`).
pub fn node_label(id: u32) -> String {
    format!("!{:08x}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_tabs() {
        let s = "Line1\nLine2\r\tEnd";
        assert_eq!(escape_log(s), "Line1\\nLine2\\r\\tEnd");
    }

    #[test]
    fn truncate_does_not_split_multibyte() {
        // "你" is 3 bytes; a 4 byte budget keeps only the first char
        let out = truncate_for_log("你好", 4);
        assert_eq!(out, "你…");
    }

    #[test]
    fn no_truncation_when_within_limit() {
        assert_eq!(truncate_for_log("short", 10), "short");
    }

    #[test]
    fn node_label_is_zero_padded_hex() {
        assert_eq!(node_label(0x1a2b), "!00001a2b");
    }
}
