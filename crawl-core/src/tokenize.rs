use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

static WORD_RE: OnceLock<Regex> = OnceLock::new();

fn word_regex() -> &'static Regex {
    WORD_RE.get_or_init(|| {
        Regex::new(r"[A-Za-zА-Яа-яЁё0-9]+(?:-[A-Za-zА-Яа-яЁё0-9]+)?").expect("static regex")
    })
}

/// Counts words per the crawler's tokenizer contract: Latin/Cyrillic
/// alphanumeric runs, optionally joined by a single hyphen.
pub fn word_count(text: &str) -> usize {
    word_regex().find_iter(text).count()
}

/// Content hash used for change detection: SHA-256 of the parsed text,
/// hex-encoded.
pub fn content_hash(parsed_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parsed_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_hyphenated_and_cyrillic_words() {
        assert_eq!(word_count("Hello-world, 2024; мир-труд."), 3);
    }

    #[test]
    fn empty_text_has_zero_words() {
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn hash_is_stable_for_same_text() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
