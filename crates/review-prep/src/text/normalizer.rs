//! Review text cleaning.
//!
//! Raw comments carry store artifacts (NUL bytes, non-breaking spaces,
//! embedded newlines, wrapping quotes) and chat-style noise such as
//! `ㅋㅋㅋㅋㅋ` or `쿠ㅜㅜ`. Normalization makes those spell the same way
//! every time so they share a vocabulary entry.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const SYLLABLE_BASE: u32 = 0xAC00;
const SYLLABLE_LAST: u32 = 0xD7A3;
const CONSONANT_FIRST: u32 = 0x3131;
const CONSONANT_LAST: u32 = 0x314E;
const VOWEL_FIRST: u32 = 0x314F;
const VOWEL_LAST: u32 = 0x3163;

const N_JUNGSEONG: u32 = 21;
const N_JONGSEONG: u32 = 28;

/// Initial consonants in syllable order, as compatibility jamo.
const CHOSEONG: [char; 19] = [
    'ㄱ', 'ㄲ', 'ㄴ', 'ㄷ', 'ㄸ', 'ㄹ', 'ㅁ', 'ㅂ', 'ㅃ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅉ', 'ㅊ', 'ㅋ', 'ㅌ',
    'ㅍ', 'ㅎ',
];

/// Final consonants in syllable order; index 0 is "no final".
const JONGSEONG: [Option<char>; 28] = [
    None,
    Some('ㄱ'),
    Some('ㄲ'),
    Some('ㄳ'),
    Some('ㄴ'),
    Some('ㄵ'),
    Some('ㄶ'),
    Some('ㄷ'),
    Some('ㄹ'),
    Some('ㄺ'),
    Some('ㄻ'),
    Some('ㄼ'),
    Some('ㄽ'),
    Some('ㄾ'),
    Some('ㄿ'),
    Some('ㅀ'),
    Some('ㅁ'),
    Some('ㅂ'),
    Some('ㅄ'),
    Some('ㅅ'),
    Some('ㅆ'),
    Some('ㅇ'),
    Some('ㅈ'),
    Some('ㅊ'),
    Some('ㅋ'),
    Some('ㅌ'),
    Some('ㅍ'),
    Some('ㅎ'),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HangulClass {
    Consonant,
    Vowel,
    Syllable,
    Other,
}

fn classify(c: char) -> HangulClass {
    match c as u32 {
        CONSONANT_FIRST..=CONSONANT_LAST => HangulClass::Consonant,
        VOWEL_FIRST..=VOWEL_LAST => HangulClass::Vowel,
        SYLLABLE_BASE..=SYLLABLE_LAST => HangulClass::Syllable,
        _ => HangulClass::Other,
    }
}

/// A decomposed syllable: initial, medial and optional final jamo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Jamo {
    cho: char,
    jung: char,
    jong: Option<char>,
    cho_index: u32,
    jung_index: u32,
}

fn decompose(c: char) -> Option<Jamo> {
    if classify(c) != HangulClass::Syllable {
        return None;
    }
    let offset = c as u32 - SYLLABLE_BASE;
    let cho_index = offset / (N_JUNGSEONG * N_JONGSEONG);
    let jung_index = (offset % (N_JUNGSEONG * N_JONGSEONG)) / N_JONGSEONG;
    let jong_index = offset % N_JONGSEONG;
    Some(Jamo {
        cho: CHOSEONG[cho_index as usize],
        jung: char::from_u32(VOWEL_FIRST + jung_index)?,
        jong: JONGSEONG[jong_index as usize],
        cho_index,
        jung_index,
    })
}

/// Syllable with the given initial and medial and no final consonant.
fn compose_open(cho_index: u32, jung_index: u32) -> Option<char> {
    char::from_u32(SYLLABLE_BASE + (cho_index * N_JUNGSEONG + jung_index) * N_JONGSEONG)
}

/// Clean a raw comment the way the record store needs it.
///
/// Removes NUL, non-breaking space and line breaks, then trims whitespace
/// and wrapping double quotes.
pub fn sanitize_comment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\0' | '\u{a0}' | '\n' | '\r'))
        .collect();
    cleaned.trim().trim_matches('"').trim().to_string()
}

/// Split syllables that are really stretched jamo emoticons.
///
/// `ㅋ쿠ㅜ` becomes `ㅋㅋㅜㅜ`, `앜ㅋ` becomes `아ㅋㅋ`, `ㅋ쿸` becomes `ㅋㅋㅜ`.
pub fn normalize_emoticons(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let classes: Vec<HangulClass> = chars.iter().map(|&c| classify(c)).collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| (chars[p], classes[p]));
        let next = chars.get(i + 1).map(|&n| (n, classes[i + 1]));

        let Some(jamo) = decompose(c) else {
            out.push(c);
            continue;
        };

        match (prev, next) {
            // consonant + open syllable + vowel, e.g. ㅋ쿠ㅜ
            (Some((p, HangulClass::Consonant)), Some((n, HangulClass::Vowel)))
                if jamo.jong.is_none() && jamo.cho == p && jamo.jung == n =>
            {
                out.push(jamo.cho);
                out.push(jamo.jung);
            }
            // syllable whose final repeats the next consonant, e.g. 앜ㅋ
            (_, Some((n, HangulClass::Consonant))) => {
                match (jamo.jong, compose_open(jamo.cho_index, jamo.jung_index)) {
                    (Some(jong), Some(open)) if jong == n => {
                        out.push(open);
                        out.push(jong);
                    }
                    _ => out.push(c),
                }
            }
            // consonant + syllable starting with the same consonant, e.g. ㅋ쿸
            (Some((p, HangulClass::Consonant)), _) if jamo.cho == p => {
                out.push(jamo.cho);
                out.push(jamo.jung);
            }
            _ => out.push(c),
        }
    }

    out
}

/// Collapse word characters repeated three or more times to `max_repeats` copies.
///
/// A `max_repeats` of 0 leaves the text unchanged.
pub fn collapse_repeats(text: &str, max_repeats: usize) -> String {
    if max_repeats == 0 {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            run += 1;
        }
        let is_word = c.is_alphanumeric() || c == '_';
        let keep = if is_word && run >= 3 {
            run.min(max_repeats)
        } else {
            run
        };
        out.extend(std::iter::repeat_n(c, keep));
    }
    out
}

/// Collapse whitespace runs to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Applies emoticon, repeat and whitespace normalization in that order.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_repeats: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Normalizer {
    pub fn new(max_repeats: usize) -> Self {
        Self { max_repeats }
    }

    pub fn normalize(&self, text: &str) -> String {
        let text = normalize_emoticons(text);
        let text = collapse_repeats(&text, self.max_repeats);
        collapse_whitespace(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_comment() {
        assert_eq!(sanitize_comment("\"good movie\"\n"), "good movie");
        assert_eq!(sanitize_comment("a\u{a0}b\0c"), "abc");
        assert_eq!(sanitize_comment("  plain  "), "plain");
    }

    #[test]
    fn test_decompose_syllable() {
        // 쿠 = ㅋ + ㅜ
        let jamo = decompose('\u{CFE0}').unwrap();
        assert_eq!(jamo.cho, 'ㅋ');
        assert_eq!(jamo.jung, 'ㅜ');
        assert_eq!(jamo.jong, None);
        assert!(decompose('a').is_none());
    }

    #[test]
    fn test_emoticon_split_between_jamo() {
        let input = format!("ㅋ{}ㅜ", '\u{CFE0}');
        assert_eq!(normalize_emoticons(&input), "ㅋㅋㅜㅜ");
    }

    #[test]
    fn test_emoticon_final_consonant_moves_out() {
        // 앜 = 아 + final ㅋ
        let input = format!("{}ㅋㅋ", '\u{C55C}');
        assert_eq!(normalize_emoticons(&input), "아ㅋㅋㅋ");
    }

    #[test]
    fn test_emoticon_leaves_plain_words() {
        assert_eq!(normalize_emoticons("영화 재밌다"), "영화 재밌다");
        assert_eq!(normalize_emoticons("hello"), "hello");
    }

    #[test]
    fn test_collapse_repeats() {
        assert_eq!(collapse_repeats("ㅋㅋㅋㅋㅋㅋ", 2), "ㅋㅋ");
        assert_eq!(collapse_repeats("sooooo good", 2), "soo good");
        // two in a row is below the threshold
        assert_eq!(collapse_repeats("good", 2), "good");
        // punctuation is not a word character
        assert_eq!(collapse_repeats("!!!!", 2), "!!!!");
        assert_eq!(collapse_repeats("ㅋㅋㅋㅋ", 0), "ㅋㅋㅋㅋ");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \t b\n\nc "), "a b c");
    }

    #[test]
    fn test_normalizer_pipeline() {
        let normalizer = Normalizer::default();
        let input = format!("최고  ㅋ{}ㅜㅜㅜㅜ", '\u{CFE0}');
        assert_eq!(normalizer.normalize(&input), "최고 ㅋㅋㅜㅜ");
    }
}
