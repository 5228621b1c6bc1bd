//! Best-effort repair of almost-JSON model output.
//!
//! Models asked for JSON often wrap it in markdown fences, add a sentence of
//! preamble, leave trailing commas, use typographic quotes, or stop before
//! closing every bracket. [`repair_json`] undoes those without trying to be a
//! general parser: whatever it returns is still handed to `serde_json`.

/// Returns a repaired candidate for `raw`, or `None` when no JSON object or
/// array can be located at all.
#[must_use]
pub fn repair_json(raw: &str) -> Option<String> {
    let unfenced = strip_fences(raw);
    let normalized = normalize_quotes(unfenced);
    let body = extract_outer(&normalized)?;
    let without_commas = remove_trailing_commas(body);
    Some(close_unbalanced(&without_commas))
}

/// Strips a surrounding markdown code fence, with or without a language tag.
#[must_use]
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
        return text[content_start..].trim();
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201c}' | '\u{201d}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// From the first `{` or `[` to the last matching closer, or to the end of
/// input when the closer is missing.
fn extract_outer(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    match text.rfind(closer) {
        Some(end) if end > start => Some(&text[start..=end]),
        _ => Some(&text[start..]),
    }
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}' | ']') | None) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn close_unbalanced(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_owned();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn parsed(raw: &str) -> Value {
        serde_json::from_str(&repair_json(raw).unwrap()).unwrap()
    }

    #[test]
    fn test_strip_fences_with_language_tag() {
        let text = "```json\n{\"a\": 1}\n```";

        assert_eq!(strip_fences(text), "{\"a\": 1}");
    }

    #[test]
    fn test_preamble_and_trailing_commas_are_removed() {
        let raw = "Sure! Here is the JSON:\n{\"beats\": [\"a\", \"b\",], \"tone\": \"grim\",}";

        assert_eq!(parsed(raw), json!({ "beats": ["a", "b"], "tone": "grim" }));
    }

    #[test]
    fn test_commas_inside_strings_survive() {
        let raw = "{\"text\": \"wait, ]\",}";

        assert_eq!(parsed(raw), json!({ "text": "wait, ]" }));
    }

    #[test]
    fn test_typographic_quotes_are_normalized() {
        let raw = "{\u{201c}route\u{201d}: \u{201c}talk\u{201d}}";

        assert_eq!(parsed(raw), json!({ "route": "talk" }));
    }

    #[test]
    fn test_truncated_output_is_closed() {
        let raw = "```json\n{\"suggestions\": [\"Run\", \"Hide";

        assert_eq!(parsed(raw), json!({ "suggestions": ["Run", "Hide"] }));
    }

    #[test]
    fn test_prose_without_json_is_not_repairable() {
        assert!(repair_json("I cannot help with that.").is_none());
    }
}
