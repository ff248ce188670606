use serde::Serialize;

use crate::error::{AuthError, Result};

/// Serialize a value as a JavaScript literal that is safe to inline inside a
/// `<script>` element.
pub(crate) fn script_literal<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| AuthError::InvalidPayload(format!("Failed to encode script value: {e}")))?;
    Ok(json
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029"))
}

pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_literal_escapes_closing_tags() {
        let literal = script_literal(&"</script><script>alert(1)").unwrap();
        assert!(!literal.contains("</script>"));
        assert_eq!(literal, r#""<\/script><script>alert(1)""#);
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(
            escape_attr(r#"https://x/?a=1&b="2""#),
            "https://x/?a=1&amp;b=&quot;2&quot;"
        );
    }
}
