use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI, OSC (BEL or ST terminated), DCS/PM/APC strings, charset selection,
        // then any remaining two-byte escape
        Regex::new(concat!(
            r"\x1b\[[0-?]*[ -/]*[@-~]",
            r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
            r"|\x1b[P^_][^\x1b]*\x1b\\",
            r"|\x1b[()][0-9A-Za-z]",
            r"|\x1b[@-Z\\-_]",
        ))
        .expect("ANSI pattern is valid")
    })
}

/// Strip ANSI escape sequences from text
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if !text.contains('\x1b') {
        return Cow::Borrowed(text);
    }
    ansi_regex().replace_all(text, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_colors_and_cursor_moves() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m"), "ok");
        assert_eq!(strip_ansi("\x1b[2K\x1b[1Gprompt?"), "prompt?");
        assert_eq!(strip_ansi("\x1b[?25lhidden\x1b[?25h"), "hidden");
    }

    #[test]
    fn test_strip_osc_title() {
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_ansi("\x1b]8;;http://x\x1b\\link"), "link");
    }

    #[test]
    fn test_plain_text_is_borrowed() {
        assert!(matches!(strip_ansi("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_keeps_non_ascii() {
        assert_eq!(strip_ansi("\x1b[31mこんにちは\x1b[0m"), "こんにちは");
    }
}
