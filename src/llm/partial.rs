//! Lenient parsing of a JSON document that is still being streamed.

use serde_json::Value;

/// Parses the longest prefix of `text` that can be closed into valid JSON.
///
/// Open strings, arrays and objects are terminated; a dangling key, separator
/// or half-written literal is trimmed away. Returns `None` until at least the
/// outermost container has started.
pub fn parse_partial(text: &str) -> Option<Value> {
    let text = text.trim_start();
    let mut end = text.len();
    while end > 0 {
        if text.is_char_boundary(end) {
            if let Some(closed) = close(&text[..end]) {
                if let Ok(value) = serde_json::from_str::<Value>(&closed) {
                    return Some(value);
                }
            }
        }
        end -= 1;
    }
    None
}

/// Appends whatever closing quote/brackets `prefix` needs. `None` when the
/// prefix ends inside an escape sequence.
fn close(prefix: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in prefix.chars() {
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
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    if escaped {
        return None;
    }

    let mut closed = String::with_capacity(prefix.len() + stack.len() + 1);
    closed.push_str(prefix);
    if in_string {
        closed.push('"');
    }
    while let Some(closer) = stack.pop() {
        closed.push(closer);
    }
    Some(closed)
}
