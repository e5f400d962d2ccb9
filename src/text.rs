//! Deterministic text clean-up for extracted and model-generated text.
//!
//! PDF text layers and model output both carry artefacts that are cheap to
//! fix with plain rules: CRLF line endings, zero-width characters, trailing
//! whitespace, runs of blank lines, and code fences the model was told not
//! to emit. Each rule is a pure `&str → String` pass, applied in a fixed
//! order by [`clean_text`].

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every clean-up rule, in order:
///
/// 1. Strip outer code fences
/// 2. Normalise line endings (CRLF → LF)
/// 3. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Collapse runs of spaces and tabs inside a line
/// 5. Trim trailing whitespace per line
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Trim the ends and finish with exactly one newline (none if empty)
pub fn clean_text(input: &str) -> String {
    let s = strip_fences(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_inline_spaces(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = s.trim();
    if s.is_empty() {
        String::new()
    } else {
        format!("{s}\n")
    }
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").expect("valid regex"));

/// Remove a fence wrapping the whole text (models sometimes disobey).
pub fn strip_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

static RE_INLINE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

fn collapse_inline_spaces(input: &str) -> String {
    RE_INLINE_SPACES.replace_all(input, " ").into_owned()
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").into_owned()
}

/// At most `max_chars` characters, cut at a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split into sentences on `.`, `!` or `?` followed by whitespace.
///
/// Line breaks without terminal punctuation do not split; extracted PDF
/// text wraps mid-sentence.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next, n)) = chars.peek() {
            if n.is_whitespace() {
                let s = text[start..next].trim();
                if !s.is_empty() {
                    out.push(s);
                }
                start = next;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Group sentences into chunks of at most `max_chars` characters.
///
/// A single sentence longer than the limit is split on character
/// boundaries. Order is preserved.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in sentences(text) {
        let len = sentence.chars().count();
        if len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = sentence.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let joined = if current.is_empty() { len } else { current_len + 1 + len };
        if joined > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(sentence);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_pipeline() {
        let raw = "```text\nHello\u{200B}   world  \r\n\r\n\r\n\r\n\r\nBye\n```";
        assert_eq!(clean_text(raw), "Hello world\n\n\nBye\n");
    }

    #[test]
    fn clean_text_of_blank_is_empty() {
        assert_eq!(clean_text("  \n\t\n"), "");
    }

    #[test]
    fn strip_fences_leaves_unfenced_text() {
        assert_eq!(strip_fences("plain"), "plain");
        assert_eq!(strip_fences("```\ninner\n```"), "inner");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn sentence_split() {
        let s = sentences("One. Two!  Three?\nFour v1.2 stays whole");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four v1.2 stays whole"]);
    }

    #[test]
    fn chunks_stay_under_limit_and_keep_order() {
        let text = "Alpha beta. Gamma delta. Epsilon zeta. Eta theta.";
        let chunks = chunk_text(text, 25);
        assert!(chunks.iter().all(|c| c.chars().count() <= 25), "{chunks:?}");
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn overlong_sentence_is_hard_split() {
        let chunks = chunk_text(&"x".repeat(10), 4);
        assert_eq!(chunks, vec!["xxxx", "xxxx", "xx"]);
    }
}
