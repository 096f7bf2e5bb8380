//! Extraction of fenced blocks from model replies.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[ \t]*\r?\n(.*?)```").expect("valid fence regex")
});

/// All fenced blocks as `(info, body)` pairs in order of appearance.
fn fences(text: &str) -> Vec<(&str, &str)> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let info = caps.get(1)?.as_str();
            let body = caps.get(2)?.as_str();
            Some((info, body))
        })
        .collect()
}

/// Locate the JSON payload in a reply.
///
/// Preference order: a ```json fence, any fence whose body looks like an
/// object, then the span from the first `{` to the last `}`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let blocks = fences(text);
    if let Some((_, body)) = blocks
        .iter()
        .find(|(info, _)| info.eq_ignore_ascii_case("json"))
    {
        return Some(body.trim());
    }
    if let Some((_, body)) = blocks
        .iter()
        .find(|(_, body)| body.trim_start().starts_with('{'))
    {
        return Some(body.trim());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Locate a code block for `language`, falling back to any fence, then to the
/// whole reply.
pub fn extract_code_block<'a>(text: &'a str, language: &str) -> &'a str {
    let blocks = fences(text);
    let aliases = language_aliases(language);
    if let Some((_, body)) = blocks
        .iter()
        .find(|(info, _)| aliases.iter().any(|alias| info.eq_ignore_ascii_case(alias)))
    {
        return body.trim_end();
    }
    if let Some((_, body)) = blocks.first() {
        return body.trim_end();
    }
    text.trim()
}

fn language_aliases(language: &str) -> Vec<&str> {
    match language {
        "python" => vec!["python", "py", "python3"],
        "rust" => vec!["rust", "rs"],
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_json_fence() {
        let text = "Plan:\n```json\n{\"tasks\": []}\n```\nand {\"other\": 1}";
        assert_eq!(extract_json_block(text), Some("{\"tasks\": []}"));
    }

    #[test]
    fn falls_back_to_braces() {
        let text = "Sure! {\"score\": 0.7, \"feedback\": \"ok\"} hope that helps";
        assert_eq!(
            extract_json_block(text),
            Some("{\"score\": 0.7, \"feedback\": \"ok\"}")
        );
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn code_block_by_language_alias() {
        let text = "```text\nnotes\n```\n```py\nprint(1)\n```";
        assert_eq!(extract_code_block(text, "python"), "print(1)");
    }

    #[test]
    fn code_block_falls_back_to_whole_text() {
        assert_eq!(extract_code_block("  fn main() {}\n", "rust"), "fn main() {}");
    }
}
