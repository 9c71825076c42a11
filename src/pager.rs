//! Pagination prompt handling.
//!
//! Devices pause long output behind a marker such as `--More--` and wait for
//! a keystroke. The session engine checks the buffer tail with
//! [`contains_pager_prompt`], sends [`DISMISS_KEY`], and removes the marker
//! with [`strip_pager_artifacts`]. The device then erases the marker with a
//! `\r<spaces>\r` sequence, removed by [`strip_pager_dismissal_artifacts`].

use regex::Regex;
use std::sync::LazyLock;

/// Keystroke that requests the next page.
pub const DISMISS_KEY: &[u8] = b" ";

/// Marker variants:
/// `--More--`, `-- More --`, `<--- More --->`, `--More--(45%)`,
/// `---(more 45%)---`, `-- MORE --, next page: Space, ...`,
/// `Press any key to continue`, `Press <SPACE> to continue`.
const MARKER: &str = r"(?:<?-+[ \t]*\(?[ \t]*more(?:[ \t]+\d+%)?[ \t]*\)?[ \t]*-+>?(?:[ \t]*\(\d+%\))?(?:,[ \t]*next page:[^\r\n]*)?|press any key to continue(?:[ \t]*\(q to quit\))?|press[ \t]+<?space>?[ \t]+(?:bar[ \t]+)?to continue)";

/// A marker that starts a line (or follows `\r` or a space) and ends it.
#[allow(clippy::expect_used)]
static PAGER_PROMPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?im)(?:^|[\r ])[ \t]*{MARKER}[ \t]*(?:\r+|$)"))
        .expect("constant regex pattern is valid")
});

/// A marker the device is waiting on: the last thing on its line.
#[allow(clippy::expect_used)]
static PAGER_WAITING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:^|[\r ])[ \t]*{MARKER}[ \t]*\r*\z"))
        .expect("constant regex pattern is valid")
});

/// A marker alone on its line, including the line break that follows it.
#[allow(clippy::expect_used)]
static PAGER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(?:^|\n)[ \t\r]*{MARKER}[ \t]*\r*(?:\n|$)"))
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static DISMISSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r +\r|\x08+ +\x08+").expect("constant regex pattern is valid")
});

/// True iff the last line of `text` ends in a pagination marker.
///
/// Trailing line breaks are ignored. Marker-like text earlier in the buffer,
/// or in the middle of a line, does not count.
pub fn contains_pager_prompt(text: &str) -> bool {
    let text = text.trim_end_matches(['\r', '\n']);
    let last_line = text.rsplit('\n').next().unwrap_or(text);
    PAGER_WAITING.is_match(last_line)
}

/// Remove every pagination marker from `text`.
///
/// Returns the cleaned text and whether any marker was found. A marker that
/// sits alone on a line takes its line break with it, so the surrounding
/// lines join up exactly as they would have without pagination.
pub fn strip_pager_artifacts(text: &str) -> (String, bool) {
    if !PAGER_LINE.is_match(text) && !PAGER_PROMPT.is_match(text) {
        return (text.to_string(), false);
    }
    let whole_lines = PAGER_LINE.replace_all(text, |caps: &regex::Captures<'_>| {
        if caps[0].starts_with('\n') { "\n" } else { "" }
    });
    let cleaned = PAGER_PROMPT.replace_all(&whole_lines, "").into_owned();
    (cleaned, true)
}

/// Remove the erase sequence a device prints after accepting [`DISMISS_KEY`].
pub fn strip_pager_dismissal_artifacts(text: &str) -> String {
    DISMISSAL.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_markers() {
        assert!(contains_pager_prompt("output\r\n--More--"));
        assert!(contains_pager_prompt(" --more-- "));
        assert!(contains_pager_prompt("-- More --"));
        assert!(contains_pager_prompt("<--- More --->"));
        assert!(contains_pager_prompt("---(more 45%)---"));
        assert!(contains_pager_prompt("--More--(12%)"));
        assert!(contains_pager_prompt("Press any key to continue (Q to quit)"));
        assert!(contains_pager_prompt("Press <SPACE> to continue"));
        assert!(!contains_pager_prompt("more output follows"));
        assert!(!contains_pager_prompt("----------"));
    }

    #[test]
    fn test_marker_must_end_the_last_line() {
        assert!(contains_pager_prompt("line1\r\n--More--\r\n"));
        assert!(contains_pager_prompt("line1\r\nline2\r--More-- "));
        assert!(!contains_pager_prompt("--More--\r\nline2\r\n"));
        assert!(!contains_pager_prompt("see --more-- for details"));
        assert!(!contains_pager_prompt("usage: pager [--more-lines N]\r\n  --less-\r\n"));
        assert!(!contains_pager_prompt("usage: pager [--more-]"));
    }

    #[test]
    fn test_marker_like_text_is_kept() {
        let help = "usage: pager [--more-lines N]\r\n  --less-\r\n";
        assert_eq!(strip_pager_artifacts(help), (help.to_string(), false));

        let prose = "see --more-- for details\r\n";
        assert_eq!(strip_pager_artifacts(prose), (prose.to_string(), false));
    }

    #[test]
    fn test_strip_marker_line() {
        let (out, saw) = strip_pager_artifacts("line1\r\n--More--\r\nline2\r\n");
        assert!(saw);
        assert!(!out.to_lowercase().contains("more"));
        assert!(out.contains("line1"));
        assert!(out.contains("line2"));
        assert_eq!(out, "line1\r\nline2\r\n");
    }

    #[test]
    fn test_strip_inline_marker() {
        let (out, saw) = strip_pager_artifacts("line1\r\n --More-- \r\x08\x08line2");
        assert!(saw);
        assert!(out.contains("line1"));
        assert!(out.ends_with("line2"));
    }

    #[test]
    fn test_strip_percentage_and_hp_variants() {
        let (out, saw) = strip_pager_artifacts("a\n-- MORE --, next page: Space, next line: Enter, quit: Control-C\nb");
        assert!(saw);
        assert_eq!(out, "a\nb");

        let (out, saw) = strip_pager_artifacts("a\n--More--(45%)");
        assert!(saw);
        assert_eq!(out, "a\n");
    }

    #[test]
    fn test_strip_without_marker() {
        let (out, saw) = strip_pager_artifacts("plain\r\ntext");
        assert!(!saw);
        assert_eq!(out, "plain\r\ntext");
    }

    #[test]
    fn test_strip_dismissal_sequence() {
        assert_eq!(strip_pager_dismissal_artifacts("a\r\n\r        \rb"), "a\r\nb");
        assert_eq!(strip_pager_dismissal_artifacts("x\x08\x08  \x08\x08y"), "xy");
        assert_eq!(strip_pager_dismissal_artifacts("no artifacts"), "no artifacts");
    }
}
