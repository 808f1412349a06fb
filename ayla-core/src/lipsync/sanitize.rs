//! Transcript cleanup before frames are generated.

use super::phoneme::NEUTRAL_CHAR;

/// Letters the phoneme table knows about (Azerbaijani alphabet).
pub const ALPHABET: &str = "abcçdeəfgğhxıijkqlmnoöprsştüuvyz";

/// Consonants whose repeats read as one mouth shape.
pub const SOFT_CONSONANTS: &str = "rnstdkgyçzşqxjhğcl";

fn is_allowed(ch: char) -> bool {
    ALPHABET.contains(ch) || ch.is_ascii_digit() || ch.is_whitespace()
}

fn is_soft(ch: char) -> bool {
    SOFT_CONSONANTS.contains(ch)
}

/// Lowercase `text`, replace foreign characters with `_`, drop whitespace and
/// collapse soft-consonant runs.
pub fn sanitize(text: &str) -> Vec<char> {
    let cleaned: Vec<char> = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|ch| if is_allowed(ch) { ch } else { NEUTRAL_CHAR })
        .filter(|ch| !ch.is_whitespace())
        .collect();
    collapse_soft_consonants(&cleaned)
}

/// Replace every run of two or more soft consonants with its first character.
/// Idempotent.
pub fn collapse_soft_consonants(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len());
    let mut in_run = false;
    for &ch in chars {
        if is_soft(ch) {
            if !in_run {
                out.push(ch);
            }
            in_run = true;
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> String {
        sanitize(text).into_iter().collect()
    }

    #[test]
    fn keeps_alphabet_and_digits() {
        assert_eq!(s("Salam"), "salam");
        assert_eq!(s("Nə var?"), "nəvar_");
        assert_eq!(s("2024"), "2024");
    }

    #[test]
    fn foreign_characters_become_placeholders() {
        assert_eq!(s("wow!"), "_o__");
        assert_eq!(s("Привет"), "______");
    }

    #[test]
    fn uppercase_azerbaijani_letters_lowercase() {
        // 'İ' lowercases to 'i' plus a combining dot above.
        assert_eq!(s("ŞƏKİ"), "şəki_");
        assert_eq!(s("ÇÖL"), "çöl");
    }

    #[test]
    fn collapses_soft_runs() {
        assert_eq!(s("necəsən"), "necəsən");
        assert_eq!(s("extra"), "exa");
        assert_eq!(s("strand"), "san");
    }

    #[test]
    fn output_only_contains_permitted_characters() {
        let out = sanitize("Hello, Dünya! Necə-sən? ✨ 42");
        assert!(out
            .iter()
            .all(|c| ALPHABET.contains(*c) || c.is_ascii_digit() || *c == NEUTRAL_CHAR));
    }

    #[test]
    fn collapse_is_idempotent() {
        for text in ["strstr", "ltlt a kkk", "yyyçzş", "abc", ""] {
            let once = sanitize(text);
            assert_eq!(collapse_soft_consonants(&once), once, "input {text:?}");
        }
    }
}
