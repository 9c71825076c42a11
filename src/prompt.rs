//! Heuristic shell-prompt detection.
//!
//! Remote shells are too varied to know the prompt up front, so a prompt is
//! any short line that ends in one of [`PROMPT_TERMINATORS`] and does not look
//! like tabular output. Once a prompt is observed, [`PromptMatcher`] keeps
//! recognizing it across configuration modes: a matcher built from
//! `router#` also accepts `router(config-if)#`.
//!
//! All checks run on the tail of the buffer only, so cost does not grow with
//! command output.

use crate::normalize::normalize;
use regex::Regex;

/// Characters a prompt line may end with.
pub const PROMPT_TERMINATORS: &[char] = &['#', '>', '$', '%'];

const MAX_PROMPT_LEN: usize = 50;
const DETECT_TAIL_CHARS: usize = 500;
const MATCH_TAIL_CHARS: usize = 200;
const DETECT_MAX_LINES: usize = 5;

/// True iff the trimmed line is 1–50 characters, ends with a prompt
/// terminator, and contains no tab or double space.
pub fn is_likely_prompt(line: &str) -> bool {
    let line = line.trim();
    let len = line.chars().count();
    (1..=MAX_PROMPT_LEN).contains(&len)
        && line.ends_with(PROMPT_TERMINATORS)
        && !line.contains('\t')
        && !line.contains("  ")
}

/// Scan the last few lines of `buffer` bottom-up and return the first one
/// that looks like a prompt.
pub fn try_detect_prompt(buffer: &str) -> Option<String> {
    normalize(tail(buffer, DETECT_TAIL_CHARS))
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(DETECT_MAX_LINES)
        .find(|line| is_likely_prompt(line))
        .map(|line| line.trim().to_string())
}

/// The buffer's final (unterminated) line, if it looks like a prompt.
///
/// Unlike [`try_detect_prompt`] this never looks above the last line: output
/// still followed by a newline is not a prompt yet.
pub fn tail_prompt(buffer: &str) -> Option<String> {
    let text = normalize(tail(buffer, DETECT_TAIL_CHARS));
    let last = text.rsplit('\n').next().unwrap_or_default();
    is_likely_prompt(last).then(|| last.trim().to_string())
}

/// Build a regex matching `prompt` in any parenthesized mode.
///
/// The trailing terminator is split off, a mode suffix already present in the
/// literal is dropped, and the remaining base text is escaped:
/// `router(config)#` and `router#` both yield
/// `^router(?:\([^)]*\))?\s*#$`.
pub fn build_prompt_regex(prompt: &str) -> Result<Regex, regex::Error> {
    let prompt = prompt.trim();
    let (base, terminator) = match prompt.chars().last() {
        Some(c) if PROMPT_TERMINATORS.contains(&c) => (&prompt[..prompt.len() - c.len_utf8()], Some(c)),
        _ => (prompt, None),
    };
    let base = strip_mode_suffix(base.trim_end());

    let mut pattern = format!(r"^{}(?:\([^)]*\))?\s*", regex::escape(base));
    if let Some(c) = terminator {
        pattern.push_str(&regex::escape(&c.to_string()));
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// True iff the last line of `buffer` matches `regex`.
pub fn buffer_ends_with_prompt(buffer: &str, regex: &Regex) -> bool {
    let text = normalize(tail(buffer, MATCH_TAIL_CHARS));
    let last = text.rsplit('\n').next().unwrap_or_default();
    regex.is_match(last.trim())
}

fn strip_mode_suffix(base: &str) -> &str {
    if base.ends_with(')') {
        if let Some(open) = base.rfind('(') {
            if open > 0 {
                return &base[..open];
            }
        }
    }
    base
}

/// Last `max_chars` characters of `s`.
pub(crate) fn tail(s: &str, max_chars: usize) -> &str {
    match s.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if max_chars > 0 => &s[idx..],
        _ if max_chars == 0 => "",
        _ => s,
    }
}

/// A confirmed prompt and the matcher derived from it.
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    literal: String,
    regex: Regex,
}

impl PromptMatcher {
    pub fn new(literal: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            literal: literal.trim().to_string(),
            regex: build_prompt_regex(literal)?,
        })
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// True iff `line` is this prompt, in any mode.
    pub fn matches_line(&self, line: &str) -> bool {
        self.regex.is_match(line.trim())
    }

    /// True iff the buffer currently ends at this prompt.
    pub fn ends(&self, buffer: &str) -> bool {
        buffer_ends_with_prompt(buffer, &self.regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_likely_prompt() {
        assert!(is_likely_prompt("router#"));
        assert!(is_likely_prompt("  user@host:~$ "));
        assert!(is_likely_prompt("switch(config-if)#"));
        assert!(is_likely_prompt("C:\\>"));
        assert!(!is_likely_prompt(""));
        assert!(!is_likely_prompt("Version 1.0.3"));
        assert!(!is_likely_prompt("Gi0/1  up  up  #"));
        assert!(!is_likely_prompt("a\tb#"));
        assert!(!is_likely_prompt(&format!("{}#", "x".repeat(60))));
    }

    #[test]
    fn test_prompt_regex_tolerates_mode_suffix() {
        let re = build_prompt_regex("router#").unwrap();
        assert!(re.is_match("router#"));
        assert!(re.is_match("router(config)#"));
        assert!(re.is_match("router(config-if)#"));
        assert!(!re.is_match("router2#"));
        assert!(!re.is_match("router>"));
    }

    #[test]
    fn test_prompt_regex_from_mode_prompt() {
        let re = build_prompt_regex("router(config)#").unwrap();
        assert!(re.is_match("router#"));
        assert!(re.is_match("router(config-router)#"));
    }

    #[test]
    fn test_prompt_regex_escapes_base() {
        let re = build_prompt_regex("[admin@fw] >").unwrap();
        assert!(re.is_match("[admin@fw] >"));
        assert!(!re.is_match("xadmin@fw] >"));
    }

    #[test]
    fn test_try_detect_prompt_scans_bottom_up() {
        let buffer = "Welcome\r\n\r\nlast login: today\r\nhost#\r\n";
        assert_eq!(try_detect_prompt(buffer).as_deref(), Some("host#"));
        assert_eq!(try_detect_prompt("no prompt here\r\n"), None);
    }

    #[test]
    fn test_tail_prompt_only_checks_last_line() {
        assert_eq!(tail_prompt("output\r\nhost# ").as_deref(), Some("host#"));
        assert_eq!(tail_prompt("host#\r\nmore output"), None);
        assert_eq!(tail_prompt("host#\r\n"), None);
    }

    #[test]
    fn test_buffer_ends_with_prompt_uses_tail() {
        let matcher = PromptMatcher::new("host#").unwrap();
        let mut buffer = "line\r\n".repeat(1000);
        buffer.push_str("host(config)#");
        assert!(matcher.ends(&buffer));
        assert!(!matcher.ends("host#\r\nstill running"));
    }

    #[test]
    fn test_tail_is_char_safe() {
        assert_eq!(tail("héllo", 4), "éllo");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abc", 0), "");
    }
}
