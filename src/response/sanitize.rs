//! Text cleanup before speech synthesis
//!
//! Model output is written for a screen: markdown, the odd HTML tag, emoji.
//! None of that should be read aloud.

use std::sync::LazyLock;

use regex::Regex;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_+\-]*").expect("valid regex"));

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid regex"));

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)#{1,6}\s+").expect("valid regex"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)[-*+•]\s+").expect("valid regex"));

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*{1,3}|_{2,3}|~~|`").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip markup and emoji so the text reads naturally when spoken
#[must_use]
pub fn sanitize_for_speech(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, " ");
    let text = LINK.replace_all(&text, "${1}");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = HEADING.replace_all(&text, "${1}");
    let text = BULLET.replace_all(&text, "${1}");
    let text = EMPHASIS.replace_all(&text, "");

    let text: String = text.chars().filter(|&c| !is_emoji(c)).collect();

    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Pictographs, dingbats and the joiners used to compose them
fn is_emoji(c: char) -> bool {
    matches!(
        u32::from(c),
        0x1F000..=0x1FAFF
            | 0x2600..=0x27BF
            | 0x2B00..=0x2BFF
            | 0xFE00..=0xFE0F
            | 0x200D
            | 0x20E3
            | 0xE0020..=0xE007F
    )
}
