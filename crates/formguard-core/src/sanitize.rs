//! Free-form text sanitization.
//!
//! Strips markup, stray angle brackets, `javascript:` prefixes and inline
//! event-handler patterns from user input. Output never contains `<` or `>`.

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum length (in characters) of a sanitized generic field.
pub const MAX_INPUT_LEN: usize = 1000;

/// Maximum length (in characters) of a sanitized message field.
pub const MAX_MESSAGE_LEN: usize = 2000;

lazy_static! {
    /// Elements whose content is dropped along with the tags.
    static ref CONTENT_BLOCKS: Vec<Regex> = vec![
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap(),
        Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap(),
        Regex::new(r"(?is)<noscript\b[^>]*>.*?</noscript\s*>").unwrap(),
        Regex::new(r"(?is)<template\b[^>]*>.*?</template\s*>").unwrap(),
    ];

    /// Comments, doctype and any opening or closing tag with its attributes.
    static ref MARKUP: Regex = Regex::new(r"(?s)<!--.*?-->|</?[A-Za-z!?][^>]*>").unwrap();

    static ref ANGLE_BRACKETS: Regex = Regex::new(r"[<>]").unwrap();

    /// Injection indicators watched for in typed input.
    static ref INJECTION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)<script").unwrap(),
        Regex::new(r"(?i)javascript:").unwrap(),
        Regex::new(r"(?i)on\w+=").unwrap(),
        Regex::new(r"(?i)eval\(").unwrap(),
        Regex::new(r"(?i)document\.cookie").unwrap(),
        Regex::new(r"(?i)window\.location").unwrap(),
    ];
}

/// Sanitize generic input, bounded to [`MAX_INPUT_LEN`] characters.
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, MAX_INPUT_LEN)
}

/// Sanitize message-length input, bounded to [`MAX_MESSAGE_LEN`] characters.
pub fn sanitize_message(input: &str) -> String {
    sanitize_with_limit(input, MAX_MESSAGE_LEN)
}

/// Sanitize and truncate to at most `max_chars` characters.
pub fn sanitize_with_limit(input: &str, max_chars: usize) -> String {
    let mut cleaned = clean(input);
    truncate_chars(&mut cleaned, max_chars);
    cleaned
}

/// Sanitize without truncation.
///
/// Validators use this so that length bounds see the real input length.
pub fn clean(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut text = input.to_owned();
    for block in CONTENT_BLOCKS.iter() {
        text = block.replace_all(&text, "").into_owned();
    }
    text = MARKUP.replace_all(&text, "").into_owned();
    text = ANGLE_BRACKETS.replace_all(&text, "").into_owned();

    let text = strip_script_vectors(&text);
    text.trim().to_owned()
}

/// Protocol prefix removed from free text, matched ASCII case-insensitively.
const JS_PROTOCOL: &str = "javascript:";

/// A character kept by [`strip_script_vectors`].
struct Kept {
    ch: char,
    /// Start of the word run ending here, if `ch` is a word character.
    run_start: Option<usize>,
    /// Leftmost `on` inside that run.
    first_on: Option<usize>,
}

/// Drop `javascript:` and inline `on<name>=` handlers in a single pass.
///
/// Kept characters form a stack and a match is popped as soon as its last
/// character arrives. A removal that splices a new match together
/// ("jajavascript:vascript:") is caught when that match completes, so the
/// output contains neither pattern and the work stays linear in the input.
fn strip_script_vectors(text: &str) -> String {
    let mut kept: Vec<Kept> = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let idx = kept.len();
        let (run_start, first_on) = if is_word_char(ch) {
            match kept.last() {
                Some(prev) if prev.run_start.is_some() => {
                    let first_on = prev.first_on.or_else(|| {
                        (prev.ch.eq_ignore_ascii_case(&'o') && ch.eq_ignore_ascii_case(&'n'))
                            .then(|| idx - 1)
                    });
                    (prev.run_start, first_on)
                }
                _ => (Some(idx), None),
            }
        } else {
            (None, None)
        };
        kept.push(Kept {
            ch,
            run_start,
            first_on,
        });

        let cut = match ch {
            ':' if ends_with_js_protocol(&kept) => Some(kept.len() - JS_PROTOCOL.len()),
            '=' => handler_start(&kept),
            _ => None,
        };
        if let Some(cut) = cut {
            kept.truncate(cut);
        }
    }
    kept.into_iter().map(|k| k.ch).collect()
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn ends_with_js_protocol(kept: &[Kept]) -> bool {
    kept.len() >= JS_PROTOCOL.len()
        && kept[kept.len() - JS_PROTOCOL.len()..]
            .iter()
            .zip(JS_PROTOCOL.chars())
            .all(|(k, c)| k.ch.eq_ignore_ascii_case(&c))
}

/// Start of an `on\w+=` match ending at the `=` on top of `kept`.
fn handler_start(kept: &[Kept]) -> Option<usize> {
    let before = kept.len().checked_sub(2)?;
    let on = kept[before].first_on?;
    // At least one word character between `on` and `=`.
    (on + 2 <= before).then_some(on)
}

/// Whether `value` matches any of the injection indicator patterns.
pub fn contains_injection_pattern(value: &str) -> bool {
    INJECTION_PATTERNS.iter().any(|pattern| pattern.is_match(value))
}

/// Truncate `text` in place to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}
