//! Text post-processing helpers for pipeline output.

/// Extract the first well-formed JSON object embedded in `text`.
///
/// Models are instructed to answer with one JSON object but routinely wrap
/// it in prose. The scanner walks brace depth while respecting string
/// literals and escapes, and tries each balanced candidate until one
/// parses.
pub fn first_json_object(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(open) = text[start..].find('{').map(|i| start + i) {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if in_string => escaped = true,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(value) = serde_json::from_str(&text[open..=i]) {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        start = open + 1;
    }
    None
}

/// Strip control characters and normalize line endings.
pub fn sanitize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Trim entries, drop blanks, and dedupe while preserving order.
pub fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| sanitize(s.trim()))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Clip text at a character boundary (UTF-8 safe).
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{}…", clipped.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_wrapped_in_prose() {
        let text = "Here is the result: {\"summary\": \"ok\", \"confidence\": 0.8}\nThanks";
        let v = first_json_object(text).unwrap();
        assert_eq!(v["summary"], "ok");
        assert_eq!(v["confidence"], 0.8);
    }

    #[test]
    fn test_json_with_nested_braces_and_strings() {
        let text = "x {\"a\": {\"b\": \"} tricky {\"}, \"c\": 1} y";
        let v = first_json_object(text).unwrap();
        assert_eq!(v["c"], 1);
        assert_eq!(v["a"]["b"], "} tricky {");
    }

    #[test]
    fn test_skips_unparseable_candidate() {
        let text = "{not json} then {\"ok\": true}";
        let v = first_json_object(text).unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(first_json_object("no objects here").is_none());
        assert!(first_json_object("{unclosed").is_none());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a\r\nb\rc"), "a\nb\nc");
        assert_eq!(sanitize("x\u{0007}y\tz"), "xy\tz");
    }

    #[test]
    fn test_clean_list() {
        let out = clean_list(vec![
            " a ".into(),
            "".into(),
            "a".into(),
            "  ".into(),
            "b".into(),
        ]);
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn test_clip_multibyte() {
        let s = "智能调度引擎执行计划";
        let clipped = clip(s, 4);
        assert!(clipped.starts_with("智能调度"));
    }
}
