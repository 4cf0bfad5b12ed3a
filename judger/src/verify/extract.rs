//! Locating a result set inside whatever the engine printed.

use once_cell::sync::Lazy;
use regex::Regex;

use super::model::{ExtractError, StructuredResult};

/// The opening of an array whose first element is an object.
static PAYLOAD_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\s*\{").unwrap());

/// Extract the first complete array-of-records payload from `text`.
///
/// Text that is empty or only whitespace is an empty result set: the engine
/// prints nothing at all for a query that returns no rows.
///
/// Every `[{` is a candidate. Candidates that never close are skipped, which
/// keeps engine errors quoting the offending token readable. If no candidate
/// closes at all the text is returned as is; if some close but none parse,
/// the first of those is reported.
pub fn extract(text: &str) -> Result<StructuredResult, ExtractError> {
    if text.trim().is_empty() {
        return Ok(StructuredResult::default());
    }

    let mut first_failure = None;
    for m in PAYLOAD_START.find_iter(text) {
        let start = m.start();
        let payload = match matching_close(&text.as_bytes()[start..]) {
            Some(len) => &text[start..start + len],
            None => continue,
        };
        match serde_json::from_str::<StructuredResult>(payload) {
            Ok(res) => return Ok(res),
            Err(e) => {
                tracing::trace!(%payload, "Skipping unparsable candidate: {}", e);
                first_failure.get_or_insert_with(|| ExtractError::MalformedStructuredOutput {
                    payload: payload.to_owned(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(first_failure
        .unwrap_or_else(|| ExtractError::NoStructuredOutput(text.trim().to_owned())))
}

/// Length of the bracketed span starting at `s[0]`, brackets inside JSON
/// strings ignored. `None` if it never closes.
fn matching_close(s: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in s.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
