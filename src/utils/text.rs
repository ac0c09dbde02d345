/// Removes a leading ```lang fence line and a trailing ``` fence, if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(idx) => &text[idx + 1..],
            None => "",
        };
    }
    let text = text.trim_end();
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

/// Key used for case-insensitive duplicate detection.
pub fn question_key(question: &str) -> String {
    question.trim().to_lowercase()
}

/// Id prefix for a category: first four alphanumerics, upper-cased.
pub fn id_prefix(category: &str) -> String {
    let prefix: String = category
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(4)
        .flat_map(|c| c.to_uppercase())
        .collect();
    if prefix.is_empty() {
        "QUIZ".to_string()
    } else {
        prefix
    }
}
