use regex::Regex;
use std::sync::LazyLock;

static PICTOGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{Extended_Pictographic}").expect("hardcoded regex"));

/// Emoji presentation selector.
const VS16: char = '\u{FE0F}';

/// Append U+FE0F after the first pictographic character of a message segment
/// so the renderer draws it as an emoji rather than a text glyph.
///
/// Only the first match is touched. Later pictographs in the same segment are
/// left as they came from the platform.
pub fn normalize(text: &str) -> String {
    PICTOGRAPH
        .replace(text, |caps: &regex::Captures| format!("{}{}", &caps[0], VS16))
        .into_owned()
}
