use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub(super) fn load_key_value_file(path: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let raw = fs::read_to_string(path)?;
    Ok(parse_key_value_content(raw.as_str()))
}

/// Parses `KEY=value` lines; supports `export`, quoted values, blank lines,
/// `#` comments and trailing ` #` comments on unquoted values.
pub(super) fn parse_key_value_content(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let mut entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if let Some(rest) = entry.strip_prefix("export ") {
            entry = rest.trim_start();
        }
        let Some((key_raw, value_raw)) = entry.split_once('=') else {
            continue;
        };
        let key = key_raw.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), unquote_value(value_raw.trim()));
    }
    out
}

fn unquote_value(value: &str) -> String {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        return value[1..value.len() - 1].to_string();
    }
    match value.split_once(" #") {
        Some((before_comment, _)) => before_comment.trim_end().to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_export_quotes_and_comments() {
        let parsed = parse_key_value_content(
            r#"
                # comment
                OPENAI_API_KEY = sk-test
                export GEMINI_API_KEY="g-key"
                TRYON_API_KEY=ym-123 # inline comment
                QUOTED_HASH='a #b'
                INVALID_LINE
                =no-key
            "#,
        );

        assert_eq!(parsed.get("OPENAI_API_KEY").map(String::as_str), Some("sk-test"));
        assert_eq!(parsed.get("GEMINI_API_KEY").map(String::as_str), Some("g-key"));
        assert_eq!(parsed.get("TRYON_API_KEY").map(String::as_str), Some("ym-123"));
        assert_eq!(parsed.get("QUOTED_HASH").map(String::as_str), Some("a #b"));
        assert!(!parsed.contains_key("INVALID_LINE"));
        assert_eq!(parsed.len(), 4);
    }
}
