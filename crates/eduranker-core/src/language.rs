//! Stopword-based language detection for user questions
//!
//! Good enough to tag queries as French or English for fetcher routing;
//! anything else comes back as None.

const FRENCH: &[&str] = &[
    "le", "la", "les", "de", "des", "du", "et", "un", "une", "est", "pour", "dans", "que", "qui",
    "comment", "pourquoi", "avec", "sur", "apprendre", "quoi", "quel", "quelle",
];

const ENGLISH: &[&str] = &[
    "the", "of", "and", "a", "to", "in", "is", "are", "that", "it", "for", "on", "with", "as",
    "how", "what", "why", "learn", "which", "this", "can", "do",
];

/// Detect the dominant language of a short text.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let fr = words.iter().filter(|w| FRENCH.contains(w)).count();
    let en = words.iter().filter(|w| ENGLISH.contains(w)).count();

    if fr > en {
        Some("fr")
    } else if en > 0 {
        Some("en")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_french() {
        assert_eq!(
            detect_language("comment apprendre le machine learning"),
            Some("fr")
        );
    }

    #[test]
    fn test_detects_english() {
        assert_eq!(
            detect_language("how to learn machine learning"),
            Some("en")
        );
    }

    #[test]
    fn test_unknown_language() {
        assert_eq!(detect_language("機械学習"), None);
        assert_eq!(detect_language(""), None);
    }
}
