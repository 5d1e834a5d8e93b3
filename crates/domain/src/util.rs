use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub const PREVIEW_MAX_CHARS: usize = 140;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Truncates message content to the thread-summary preview length,
/// respecting char boundaries.
pub fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_MAX_CHARS {
        return content.to_string();
    }
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_content_intact() {
        assert_eq!(preview("We'll look into it"), "We'll look into it");
    }

    #[test]
    fn preview_truncates_long_content_at_char_boundary() {
        let long = "é".repeat(300);
        let short = preview(&long);
        assert_eq!(short.chars().count(), PREVIEW_MAX_CHARS);
    }
}
