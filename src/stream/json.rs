//! Balanced-JSON extraction from noisy text.
//!
//! Producers embed JSON payloads in surrounding prose and stream
//! argument text in fragments, so the merge engine never assumes a
//! clean document: it scans for the first opening brace or bracket,
//! tracks nesting depth while honoring quoted-string and escape state,
//! and parses only the matched balanced substring.

use serde_json::Value;

/// Extracts the first balanced JSON object or array from `text`.
///
/// Returns the matched substring, or `None` when no opener exists or
/// the text ends before the opener is balanced (an incomplete stream).
#[must_use]
pub fn extract_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(byte) {
                    // Mismatched closer: not valid JSON from here.
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extracts and parses the first balanced JSON value from `text`.
///
/// Returns `None` on a missing opener, an unbalanced span, or a span
/// that fails to parse — callers degrade rather than error.
#[must_use]
pub fn parse_embedded(text: &str) -> Option<Value> {
    let span = extract_balanced(text)?;
    serde_json::from_str(span).ok()
}
