// Key support for text entry on the mirrored keyboard path.
// Only characters that map onto a single physical key are typed; anything
// that would need a modifier chord or an IME is refused.

const UNSHIFTED_PUNCTUATION: &str = "-=[]\\;',./`";

/// Returns true if `c` can be produced by pressing one physical key.
pub fn is_physical_key(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '\n' | '\t') || UNSHIFTED_PUNCTUATION.contains(c)
}

/// Returns true if the text contains CJK (Chinese/Japanese/Korean) characters.
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c)
        || ('\u{3040}'..='\u{309f}').contains(&c)
        || ('\u{30a0}'..='\u{30ff}').contains(&c))
}

/// Error text for a refused character. Never mentions how far entry got.
pub fn unsupported_message(c: char) -> String {
    if contains_cjk(&c.to_string()) {
        format!("Text entry aborted: '{c}' needs an input method, only physical keys are supported")
    } else {
        format!("Text entry aborted: '{c}' cannot be typed with a single physical key")
    }
}
