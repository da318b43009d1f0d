//! Conversation titles

/// Title of a conversation before anything was said
pub const DEFAULT_TITLE: &str = "New Chat";

const MAX_TITLE_CHARS: usize = 50;
const FALLBACK_WORDS: usize = 5;

/// Title used from the first send until a generated one arrives
#[must_use]
pub fn initial_title(first_message: &str) -> String {
    let text = first_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    clamp(text)
}

/// Title derived from the first few words when generation fails
#[must_use]
pub fn fallback_title(first_message: &str) -> String {
    let words: Vec<&str> = first_message.split_whitespace().collect();
    if words.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    let mut title = words
        .iter()
        .take(FALLBACK_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > FALLBACK_WORDS {
        title.push_str("...");
    }
    clamp(title)
}

fn clamp(title: String) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }
    let kept: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", kept.trim_end())
}
